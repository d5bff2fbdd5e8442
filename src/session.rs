//! Chat session state: the ordered transcript, the pending input, and the
//! per-session controls (model choice, voice toggle). One `ChatSession` is
//! owned by each WebSocket connection and lives exactly as long as it does.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

#[derive(Debug)]
pub struct ChatSession {
    transcript: Vec<TranscriptEntry>,
    pending_input: String,
    model_slug: String,
    voice_enabled: bool,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            transcript: Vec::new(),
            pending_input: String::new(),
            model_slug: constants::default_model_slug(),
            voice_enabled: true,
        }
    }

    /// Record the user's submission: remember it as the pending input and
    /// append it to the transcript.
    pub fn begin_turn(&mut self, text: String) {
        self.pending_input = text.clone();
        self.transcript.push(TranscriptEntry {
            role: Role::User,
            text,
        });
    }

    /// Append the finished assistant reply (trimmed) and clear the pending
    /// input, completing the turn started by `begin_turn`.
    pub fn complete_turn(&mut self, reply: &str) {
        self.transcript.push(TranscriptEntry {
            role: Role::Assistant,
            text: reply.trim().to_string(),
        });
        self.pending_input.clear();
    }

    /// Wholesale reset: empties the transcript and the pending input.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.pending_input.clear();
    }

    /// Switch the session to another catalog model. Unknown slugs are
    /// ignored: the UI only offers catalog entries, so anything else is a
    /// hand-crafted message.
    pub fn set_model(&mut self, slug: &str) {
        if constants::is_known_model(slug) {
            self.model_slug = slug.to_string();
        } else {
            warn!("Ignoring unknown model slug: {}", slug);
        }
    }

    pub fn set_voice_enabled(&mut self, enabled: bool) {
        self.voice_enabled = enabled;
    }

    pub fn model_slug(&self) -> &str {
        &self.model_slug
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice_enabled
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_empty() {
        let session = ChatSession::new();
        assert!(session.transcript().is_empty());
        assert_eq!(session.pending_input(), "");
        assert_eq!(session.model_slug(), constants::default_model_slug());
        assert!(session.voice_enabled());
    }

    #[test]
    fn test_turn_ordering_and_roles() {
        let mut session = ChatSession::new();
        session.begin_turn("Hello".to_string());
        assert_eq!(session.pending_input(), "Hello");
        session.complete_turn("Hi there! ");

        session.begin_turn("How are you?".to_string());
        session.complete_turn("Doing well.");

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].text, "Hello");
        assert_eq!(transcript[1].role, Role::Assistant);
        // Replies are stored trimmed.
        assert_eq!(transcript[1].text, "Hi there!");
        assert_eq!(transcript[2].role, Role::User);
        assert_eq!(transcript[3].role, Role::Assistant);
        assert_eq!(session.pending_input(), "");
    }

    #[test]
    fn test_clear_resets_regardless_of_length() {
        let mut session = ChatSession::new();
        for i in 0..25 {
            session.begin_turn(format!("message {}", i));
            session.complete_turn("ok");
        }
        session.begin_turn("unanswered".to_string());
        assert_eq!(session.transcript().len(), 51);

        session.clear();
        assert!(session.transcript().is_empty());
        assert_eq!(session.pending_input(), "");

        // Clearing an already-empty session is a no-op.
        session.clear();
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_set_model_validates_against_catalog() {
        let mut session = ChatSession::new();
        session.set_model("llama3-70b-8192");
        assert_eq!(session.model_slug(), "llama3-70b-8192");

        session.set_model("made-up-model");
        assert_eq!(session.model_slug(), "llama3-70b-8192");
    }

    #[test]
    fn test_role_serialization_is_lowercase() {
        let entry = TranscriptEntry {
            role: Role::Assistant,
            text: "hi".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"role":"assistant","text":"hi"}"#);
    }
}
