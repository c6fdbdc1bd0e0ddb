//! iFlow CLI backend.
//!
//! `iflow --continue -p <instruction> -o <workspace>/last_output.txt`,
//! with session history kept as `session-*.jsonl` in the working directory.

use std::path::Path;

pub const PROGRAM: &str = "iflow";

/// File the CLI mirrors its final answer into.
pub const LAST_OUTPUT_FILE: &str = "last_output.txt";

pub(crate) fn args(instruction: &str, workspace: &Path) -> Vec<String> {
    vec![
        "--continue".to_string(),
        "-p".to_string(),
        instruction.to_string(),
        "-o".to_string(),
        workspace.join(LAST_OUTPUT_FILE).to_string_lossy().into_owned(),
    ]
}

pub(crate) fn is_session_artifact(file_name: &str) -> bool {
    file_name.starts_with("session-") && file_name.ends_with(".jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_continue_session_and_mirror_output() {
        let args = args("fix the bug", Path::new("/w/iflow/user_alice"));
        assert_eq!(
            args,
            vec![
                "--continue",
                "-p",
                "fix the bug",
                "-o",
                "/w/iflow/user_alice/last_output.txt"
            ]
        );
    }

    #[test]
    fn recognizes_session_files() {
        assert!(is_session_artifact("session-20240101.jsonl"));
        assert!(!is_session_artifact("session-20240101.json"));
        assert!(!is_session_artifact("last_output.txt"));
        assert!(!is_session_artifact("notes.jsonl"));
    }
}
