//! Chat command classification and the fixed reply texts.

use wecomrelay_connectors::{BackendKind, SessionInfo};

pub const HELP_TEXT: &str = "🤖 AI agent relay\n\
\n\
/help - show this message\n\
/new - start a new session (clears the current context)\n\
/status - show session status\n\
/run <instruction> - send an instruction to the agent\n\
\n\
Any other text is sent to the agent as an instruction.";

pub const UNKNOWN_TEXT: &str = "❓ Unrecognized command. Send /help for usage.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    New,
    Status,
    /// Instruction for the agent, already trimmed and non-empty.
    Run(String),
    Unknown,
}

impl Command {
    /// Classify message content, matched against its trimmed form.
    pub fn parse(content: &str) -> Self {
        let content = content.trim();
        match content {
            "/help" => Command::Help,
            "/new" => Command::New,
            "/status" => Command::Status,
            _ => {
                if let Some(rest) = content.strip_prefix("/run ") {
                    let instruction = rest.trim();
                    if instruction.is_empty() {
                        Command::Unknown
                    } else {
                        Command::Run(instruction.to_string())
                    }
                } else if !content.is_empty() && !content.starts_with('/') {
                    Command::Run(content.to_string())
                } else {
                    Command::Unknown
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::New => "new",
            Command::Status => "status",
            Command::Run(_) => "run",
            Command::Unknown => "unknown",
        }
    }
}

/// User-facing `/status` report.
pub fn status_text(backend: BackendKind, info: &SessionInfo) -> String {
    let latest = info
        .latest_artifact
        .as_deref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "none".to_string());

    format!(
        "📊 Session status\n\
         Backend: {backend}\n\
         Has session: {}\n\
         Workspace: {}\n\
         Latest session file: {latest}\n\
         Session files: {}",
        if info.exists { "yes" } else { "no" },
        info.path.display(),
        info.artifact_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn exact_commands_after_trim() {
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("  /new\n"), Command::New);
        assert_eq!(Command::parse("/status"), Command::Status);
    }

    #[test]
    fn commands_are_matched_verbatim() {
        assert_eq!(Command::parse("/HELP"), Command::Unknown);
        assert_eq!(Command::parse("/help me"), Command::Unknown);
        assert_eq!(Command::parse("/newer"), Command::Unknown);
    }

    #[test]
    fn run_prefix_and_plain_text() {
        assert_eq!(
            Command::parse("/run  cargo test "),
            Command::Run("cargo test".to_string())
        );
        assert_eq!(
            Command::parse("explain main.rs"),
            Command::Run("explain main.rs".to_string())
        );
    }

    #[test]
    fn unknown_inputs() {
        assert_eq!(Command::parse("/run"), Command::Unknown);
        assert_eq!(Command::parse("/run   "), Command::Unknown);
        assert_eq!(Command::parse("/deploy prod"), Command::Unknown);
        assert_eq!(Command::parse("   "), Command::Unknown);
    }

    #[test]
    fn status_lists_backend_and_artifacts() {
        let info = SessionInfo {
            exists: true,
            path: PathBuf::from("/ws/qwen/user_alice"),
            latest_artifact: Some(PathBuf::from("/ws/qwen/user_alice/chat.json")),
            artifact_count: 2,
        };
        let text = status_text(BackendKind::Qwen, &info);
        assert!(text.contains("Backend: qwen"));
        assert!(text.contains("Has session: yes"));
        assert!(text.contains("/ws/qwen/user_alice"));
        assert!(text.contains("Latest session file: chat.json"));
        assert!(text.contains("Session files: 2"));
    }

    #[test]
    fn status_for_missing_session() {
        let info = SessionInfo {
            exists: false,
            path: PathBuf::from("/ws/iflow/user_bob"),
            latest_artifact: None,
            artifact_count: 0,
        };
        let text = status_text(BackendKind::IFlow, &info);
        assert!(text.contains("Has session: no"));
        assert!(text.contains("Latest session file: none"));
    }
}
