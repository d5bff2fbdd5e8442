//! Best-effort spoken playback of a finished reply via the system TTS binary.

use tokio::process::Command;
use tracing::{debug, warn};

use crate::constants;

/// Speak `text` aloud in a detached background task. Fire-and-forget: the
/// task is never awaited, never reports back, and may outlive the UI update
/// that triggered it. Failures are logged and swallowed.
pub fn speak_text(text: String) {
    if text.trim().is_empty() {
        return;
    }
    tokio::spawn(async move {
        let (program, args) = tts_invocation(&text);
        debug!("Speaking {} chars via {}", text.len(), program);
        match Command::new(&program).args(&args).output().await {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                warn!("TTS command {} exited with {}", program, output.status);
            }
            Err(e) => {
                warn!("Failed to run TTS command {}: {}", program, e);
            }
        }
    });
}

/// Build the TTS command line for `text`. espeak takes a speech rate flag;
/// other binaries (e.g. macOS `say`) just get the text.
fn tts_invocation(text: &str) -> (String, Vec<String>) {
    let program = constants::TTS_BIN.clone();
    let mut args = Vec::new();
    if program.ends_with("espeak") {
        args.push("-s".to_string());
        args.push(constants::TTS_RATE.to_string());
    }
    args.push(text.to_string());
    (program, args)
}
