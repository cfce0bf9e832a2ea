use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kobold_ipc::{ExtensionMessage, Status, Task};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::api::GenerateRequest;
use crate::chunker::text_chunker;
use crate::client::KoboldClient;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::history::ConversationStore;
use crate::prompt;

/// Everything a single dispatched turn needs: its cancellation flag and the
/// channel its incremental chunks flow out on.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub cancel: Arc<AtomicBool>,
    pub chunks: mpsc::Sender<String>,
}

impl TurnContext {
    pub fn new(cancel: Arc<AtomicBool>, chunks: mpsc::Sender<String>) -> Self {
        TurnContext { cancel, chunks }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Per-process conversation state, shared by all in-flight turns. Replaces
/// process-wide globals: the store and the page context sit behind mutexes so
/// concurrent turns never interleave file writes.
pub struct ChatSession {
    client: KoboldClient,
    history: Arc<Mutex<ConversationStore>>,
    page_context: Arc<Mutex<String>>,
    max_length: u32,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChatSession {
    pub fn new(config: &BridgeConfig, client: KoboldClient) -> Result<Self> {
        let store = ConversationStore::open(&config.history_file)?;
        Ok(ChatSession {
            client,
            history: Arc::new(Mutex::new(store)),
            page_context: Arc::new(Mutex::new(String::new())),
            max_length: config.max_length,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        })
    }

    /// Handle one inbound message end to end. `Ok(None)` means "no response";
    /// the relay stays silent in that case.
    pub async fn handle_message(
        &self,
        message: &ExtensionMessage,
        ctx: &TurnContext,
    ) -> Result<Option<String>> {
        if message.status() == Some(Status::NewChat) {
            info!("new chat requested, clearing conversation history");
            self.history.lock().await.clear()?;
        }

        let text = message.text().trim();
        if text.is_empty() {
            warn!("dropping message with empty text");
            return Ok(None);
        }

        match message.task().unwrap_or(Task::Chat) {
            Task::Chat => self.chat_turn(text, text.to_string(), ctx).await,
            Task::SummaryChat => {
                let page = self.page_context.lock().await.clone();
                let instruction = prompt::page_question_instruction(&page, text);
                self.chat_turn(text, instruction, ctx).await
            }
            Task::Summary => {
                *self.page_context.lock().await = text.to_string();
                self.summarise(text, prompt::summary_instruction, ctx).await
            }
            Task::SummariseFurther => {
                self.summarise(text, prompt::condense_instruction, ctx).await
            }
            Task::Ping | Task::Unknown => {
                warn!(task = ?message.task(), "ignoring message with unhandled task");
                Ok(None)
            }
        }
    }

    /// One conversational exchange: stream the reply, then record the turn.
    /// `recorded` is what lands in the history file; `instruction` is what
    /// the model sees (they differ for page questions).
    async fn chat_turn(
        &self,
        recorded: &str,
        instruction: String,
        ctx: &TurnContext,
    ) -> Result<Option<String>> {
        let max_context = self.client.true_max_context_length().await;
        let full_prompt = {
            let history = self.history.lock().await;
            prompt::build_prompt(history.contents(), &instruction)
        };
        let request = GenerateRequest::new(full_prompt, max_context, self.max_length);

        let raw = self
            .client
            .generate_streaming(&request, ctx.chunks.clone(), Arc::clone(&ctx.cancel))
            .await?;

        match raw {
            Some(raw) => {
                let reply = prompt::trim_response(&raw);
                if reply.is_empty() {
                    warn!("backend produced an empty reply");
                    return Ok(None);
                }
                self.history.lock().await.append_turn(recorded, &reply)?;
                Ok(Some(reply))
            }
            None => {
                warn!("backend returned no results for chat turn");
                Ok(None)
            }
        }
    }

    /// Summarise long text chunk by chunk, checking the cancel flag between
    /// chunks. Summaries are working output, not conversation turns, so they
    /// are not appended to the history.
    async fn summarise(
        &self,
        text: &str,
        make_instruction: fn(&str) -> String,
        ctx: &TurnContext,
    ) -> Result<Option<String>> {
        let max_context = self.client.true_max_context_length().await;
        let chunks = text_chunker(text, self.chunk_size, self.chunk_overlap);
        info!(parts = chunks.len(), "summarising text");

        let mut partials = Vec::new();
        for chunk in &chunks {
            if ctx.is_cancelled() {
                info!("summarisation cancelled between chunks");
                break;
            }
            let request = GenerateRequest::new(
                prompt::build_prompt("", &make_instruction(chunk)),
                max_context,
                self.max_length,
            );
            let raw = self
                .client
                .generate_streaming(&request, ctx.chunks.clone(), Arc::clone(&ctx.cancel))
                .await?;
            match raw {
                Some(raw) => {
                    let part = prompt::trim_response(&raw);
                    if !part.is_empty() {
                        partials.push(part);
                    }
                }
                None => warn!("backend returned no results for summary chunk"),
            }
        }

        if partials.is_empty() {
            Ok(None)
        } else {
            Ok(Some(partials.join("\n\n")))
        }
    }

    /// Shared handle to the conversation store, for callers that need to
    /// inspect or reset it outside a turn.
    pub fn history(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.history)
    }
}
