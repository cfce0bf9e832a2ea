//! Request and response bodies for the koboldcpp REST API.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/generate`. The sampling parameters are fixed; only
/// the prompt and the context/length budgets vary per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_context_length: u32,
    pub max_length: u32,
    pub use_story: bool,
    pub use_memory: bool,
    pub use_authors_note: bool,
    pub use_world_info: bool,
    pub rep_pen: f64,
    pub rep_pen_range: u32,
    pub rep_pen_slope: f64,
    pub temperature: f64,
    pub tfs: f64,
    pub top_a: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub typical: f64,
    pub sampler_order: Vec<u8>,
    pub singleline: bool,
    pub frmttriminc: bool,
    pub frmtrmblln: bool,
}

impl GenerateRequest {
    pub fn new(prompt: String, max_context_length: u32, max_length: u32) -> Self {
        GenerateRequest {
            prompt,
            max_context_length,
            max_length,
            use_story: false,
            use_memory: true,
            use_authors_note: false,
            use_world_info: false,
            rep_pen: 1.0,
            rep_pen_range: 2048,
            rep_pen_slope: 0.7,
            temperature: 0.8,
            tfs: 0.97,
            top_a: 0.8,
            top_k: 0,
            top_p: 0.5,
            typical: 0.19,
            sampler_order: vec![6, 0, 1, 3, 4, 2, 5],
            singleline: false,
            frmttriminc: false,
            frmtrmblln: false,
        }
    }
}

/// Shape shared by `/api/v1/generate` and `/api/extra/generate/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub results: Vec<GenerationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
}

impl GenerateResponse {
    /// Text of the first result, if the backend produced one.
    pub fn into_text(mut self) -> Option<String> {
        if self.results.is_empty() {
            None
        } else {
            Some(self.results.remove(0).text)
        }
    }
}

/// Shape of `GET /api/extra/true_max_context_length`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxContextResponse {
    pub value: u32,
}
