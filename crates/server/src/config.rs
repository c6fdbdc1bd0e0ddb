//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tracing::warn;

use wecomrelay_connectors::{BackendKind, EngineConfig};
use wecomrelay_protocol::{DEFAULT_CHUNK_BYTES, TRANSPORT_MAX_BYTES};

use crate::paths;
use crate::wecom::DEFAULT_API_BASE;

/// Accepted range for the per-message reply budget.
pub const MIN_REPLY_CHUNK_BYTES: usize = 64;
pub const MAX_REPLY_CHUNK_BYTES: usize = 2000;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "wecomrelay",
    version,
    about = "Relay WeCom chat commands to a local AI coding agent"
)]
pub struct Cli {
    /// Enterprise (corp) id; also the expected envelope owner
    #[arg(long, env = "CORP_ID")]
    pub corp_id: String,

    /// Application agent id used when sending replies
    #[arg(long, env = "AGENT_ID")]
    pub agent_id: i64,

    /// Application secret for access tokens
    #[arg(long, env = "SECRET", hide_env_values = true)]
    pub secret: String,

    /// Callback signature token
    #[arg(long, env = "RECEIVE_TOKEN", hide_env_values = true)]
    pub receive_token: String,

    /// 43-character base64 callback encryption key
    #[arg(long, env = "RECEIVE_ENCODING_AES_KEY", hide_env_values = true)]
    pub receive_encoding_aes_key: String,

    #[arg(long, env = "BIND_HOST", default_value = "0.0.0.0")]
    pub bind_host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Agent CLI to drive: iflow or qwen
    #[arg(long, env = "AI_BACKEND", default_value = "qwen")]
    pub ai_backend: String,

    /// Base directory for per-user workspaces [default: <data-dir>/workspaces]
    #[arg(long, env = "WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Agent executable, overriding the backend's default lookup on PATH
    #[arg(long, env = "AGENT_BIN")]
    pub agent_bin: Option<PathBuf>,

    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value_t = 600)]
    pub command_timeout_secs: u64,

    #[arg(long, env = "SUMMARY_TIMEOUT_SECS", default_value_t = 120)]
    pub summary_timeout_secs: u64,

    /// WeCom API base URL
    #[arg(long, env = "WECOM_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Byte budget per outbound chat message
    #[arg(long, env = "REPLY_CHUNK_BYTES", default_value_t = DEFAULT_CHUNK_BYTES)]
    pub reply_chunk_bytes: usize,

    /// Data directory [default: ~/.wecom-relay]
    #[arg(long, env = "WECOMRELAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Mirror logs to stderr as well as the log file
    #[arg(long)]
    pub log_stderr: bool,

    /// Start without fetching an access token first
    #[arg(long)]
    pub skip_token_check: bool,
}

impl Cli {
    /// Reject configuration the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("CORP_ID", &self.corp_id),
            ("SECRET", &self.secret),
            ("RECEIVE_TOKEN", &self.receive_token),
            ("RECEIVE_ENCODING_AES_KEY", &self.receive_encoding_aes_key),
        ] {
            if value.trim().is_empty() {
                bail!("{name} must not be empty");
            }
        }
        if !(MIN_REPLY_CHUNK_BYTES..=MAX_REPLY_CHUNK_BYTES).contains(&self.reply_chunk_bytes) {
            bail!(
                "REPLY_CHUNK_BYTES must be within {MIN_REPLY_CHUNK_BYTES}..={MAX_REPLY_CHUNK_BYTES} \
                 (platform limit is {TRANSPORT_MAX_BYTES}), got {}",
                self.reply_chunk_bytes
            );
        }
        if self.command_timeout_secs == 0 || self.summary_timeout_secs == 0 {
            bail!("COMMAND_TIMEOUT_SECS and SUMMARY_TIMEOUT_SECS must be positive");
        }
        Ok(())
    }

    /// Configured backend; unknown names fall back to iflow.
    pub fn backend(&self) -> BackendKind {
        match self.ai_backend.parse() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(
                    component = "config",
                    event = "config.backend_fallback",
                    requested = %self.ai_backend,
                    error = %e,
                    "Unknown AI_BACKEND, falling back to iflow"
                );
                BackendKind::IFlow
            }
        }
    }

    pub fn workspace_base(&self) -> PathBuf {
        self.workspace.clone().unwrap_or_else(paths::workspaces_dir)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            program: self.agent_bin.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            summary_timeout: Duration::from_secs(self.summary_timeout_secs),
            ..EngineConfig::new(self.backend())
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }
}
