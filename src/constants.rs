// Configuration constants, loaded from the environment at first use.

use serde::Serialize;
use std::env;

lazy_static::lazy_static! {
    /// Chat-completions endpoint. Overridable so tests can point at a mock server.
    pub static ref GROQ_URL: String = env::var("GROQ_URL")
        .unwrap_or_else(|_| "https://api.groq.com/openai/v1/chat/completions".to_string());
    /// Bearer credential for the completions endpoint. Empty if unset; requests
    /// will then fail with a 401 that surfaces as an inline error fragment.
    pub static ref GROQ_API_KEY: String = env::var("GROQ_API_KEY").unwrap_or_default();
    /// Master switch for speech output. The per-session UI toggle only takes
    /// effect when this is on. Defaults to enabled.
    pub static ref USE_TTS: bool = env::var("USE_TTS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);
    /// Text-to-speech binary. Defaults to the platform's usual choice.
    pub static ref TTS_BIN: String = env::var("SPARKY_TTS_BIN")
        .unwrap_or_else(|_| default_tts_bin().to_string());
}

/// Persona prepended to every completion request.
pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant who always replies in friendly conversational English.";

/// Words-per-minute speech rate passed to espeak.
pub const TTS_RATE: u32 = 170;

/// Static model catalog: human label -> provider model slug.
pub const AVAILABLE_MODELS: &[(&str, &str)] = &[
    ("LLaMA 3 8B", "llama3-8b-8192"),
    ("LLaMA 3 70B", "llama3-70b-8192"),
];

/// One catalog row, shaped for template context and the models CLI listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub label: String,
    pub slug: String,
}

pub fn model_catalog() -> Vec<ModelEntry> {
    AVAILABLE_MODELS
        .iter()
        .map(|(label, slug)| ModelEntry {
            label: (*label).to_string(),
            slug: (*slug).to_string(),
        })
        .collect()
}

/// Whether a slug names a catalog model.
pub fn is_known_model(slug: &str) -> bool {
    AVAILABLE_MODELS.iter().any(|(_, s)| *s == slug)
}

/// Slug of the first catalog entry, used until the client picks one.
pub fn default_model_slug() -> String {
    AVAILABLE_MODELS[0].1.to_string()
}

fn default_tts_bin() -> &'static str {
    if cfg!(target_os = "macos") {
        "say"
    } else {
        "espeak"
    }
}
