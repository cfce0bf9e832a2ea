use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use kobold_core::{ChatSession, KoboldClient, TurnContext};
use kobold_ipc::{
    read_frame, write_message, ExtensionMessage, FrameError, HostMessage, Status, Task,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::supervisor::Supervisor;

/// What the relay does with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Cancel every in-flight turn and tell the backend to stop.
    Abort,
    /// Liveness probe, answered synchronously.
    Ping,
    /// Everything else: hand the message to a spawned turn.
    Dispatch,
}

pub fn classify(message: &ExtensionMessage) -> Action {
    if message.status() == Some(Status::Abort) {
        Action::Abort
    } else if message.task() == Some(Task::Ping) {
        Action::Ping
    } else {
        Action::Dispatch
    }
}

/// Shared relay state: the session, the backend client for out-of-band abort
/// calls, the supervisor, the outbound channel, and the cancel flags of every
/// turn still in flight.
pub struct RelayState {
    session: Arc<ChatSession>,
    client: KoboldClient,
    supervisor: Supervisor,
    out_tx: mpsc::Sender<HostMessage>,
    active_turns: Mutex<Vec<Weak<AtomicBool>>>,
}

impl RelayState {
    pub fn new(
        session: Arc<ChatSession>,
        client: KoboldClient,
        supervisor: Supervisor,
        out_tx: mpsc::Sender<HostMessage>,
    ) -> Arc<Self> {
        Arc::new(RelayState {
            session,
            client,
            supervisor,
            out_tx,
            active_turns: Mutex::new(Vec::new()),
        })
    }

    /// Mint the cancel flag for a new turn and track it weakly, pruning
    /// flags whose turns have already finished.
    fn register_turn(&self) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut turns = self.active_turns.lock().unwrap_or_else(|e| e.into_inner());
        turns.retain(|weak| weak.strong_count() > 0);
        turns.push(Arc::downgrade(&cancel));
        cancel
    }

    /// Set every live turn's cancel flag; returns how many were signalled.
    fn cancel_all(&self) -> usize {
        let turns = self.active_turns.lock().unwrap_or_else(|e| e.into_inner());
        let mut signalled = 0;
        for weak in turns.iter() {
            if let Some(flag) = weak.upgrade() {
                flag.store(true, Ordering::SeqCst);
                signalled += 1;
            }
        }
        signalled
    }
}

/// Read frames until EOF, acting on each. EOF is the browser closing the
/// pipe: the loop returns `Ok(())` and the process exits cleanly. Malformed
/// JSON is logged and dropped; framing-level corruption is fatal because the
/// byte stream cannot be resynchronized.
pub async fn run_relay<R>(mut reader: R, state: Arc<RelayState>) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    info!("relay loop started");
    loop {
        let payload = match read_frame(&mut reader).await? {
            Some(payload) => payload,
            None => {
                info!("stdin closed, shutting down");
                return Ok(());
            }
        };

        let message: ExtensionMessage = match serde_json::from_slice(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = payload.len(), "dropping malformed frame");
                continue;
            }
        };
        debug!(status = ?message.status(), task = ?message.task(), "received frame");

        match classify(&message) {
            Action::Abort => {
                let signalled = state.cancel_all();
                info!(turns = signalled, "abort requested by extension");
                if let Err(e) = state.client.abort_generation().await {
                    error!(error = %e, "abort request to backend failed");
                }
            }
            Action::Ping => {
                if state.supervisor.is_backend_running() {
                    send(&state.out_tx, HostMessage::pong()).await;
                } else {
                    warn!("backend not running, relaunching");
                    send(&state.out_tx, HostMessage::error("relaunching koboldcpp executable"))
                        .await;
                    state.supervisor.ensure_running();
                }
            }
            Action::Dispatch => dispatch_turn(Arc::clone(&state), message),
        }
    }
}

/// Run one turn on its own task so the relay keeps reading. Chunks stream out
/// while the turn runs; the final response and the stop sentinel follow once
/// every chunk has been forwarded. Failures stay off the wire (the extension
/// sees silence), but they are all logged.
fn dispatch_turn(state: Arc<RelayState>, message: ExtensionMessage) {
    let cancel = state.register_turn();
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);

    let chunk_out = state.out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            if chunk_out.send(HostMessage::chunk(chunk)).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let ctx = TurnContext::new(cancel, chunk_tx);
        let result = state.session.handle_message(&message, &ctx).await;
        // Closing the chunk channel lets the forwarder drain and exit, so
        // the final response never overtakes a chunk.
        drop(ctx);
        if let Err(e) = forwarder.await {
            error!(error = %e, "chunk forwarder panicked");
        }
        match result {
            Ok(Some(text)) => {
                send(&state.out_tx, HostMessage::response(text)).await;
                send(&state.out_tx, HostMessage::stop()).await;
            }
            Ok(None) => info!("turn produced no response"),
            Err(e) => error!(error = %e, "turn failed"),
        }
    });
}

/// Single writer for the outbound half of the protocol. Everything the host
/// says goes through this one task, so frames never interleave mid-write.
pub async fn write_outbound<W>(mut writer: W, mut rx: mpsc::Receiver<HostMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            error!(error = %e, "failed to write outbound frame");
            break;
        }
    }
    info!("outbound channel closed, writer exiting");
}

async fn send(out_tx: &mpsc::Sender<HostMessage>, message: HostMessage) {
    if out_tx.send(message).await.is_err() {
        warn!("outbound writer is gone, dropping message");
    }
}
