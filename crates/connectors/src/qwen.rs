//! Qwen Code CLI backend.
//!
//! `qwen --continue --yolo <instruction>`; the CLI records its checkpoints as
//! `*.json` files in the working directory.

pub const PROGRAM: &str = "qwen";

pub(crate) fn args(instruction: &str) -> Vec<String> {
    vec![
        "--continue".to_string(),
        "--yolo".to_string(),
        instruction.to_string(),
    ]
}

pub(crate) fn is_session_artifact(file_name: &str) -> bool {
    file_name.ends_with(".json")
}
