//! WeCom Relay Server
//!
//! Receives encrypted WeCom callbacks and relays chat commands to a local
//! AI coding agent, one isolated workspace per user.

mod callback;
mod command;
mod config;
mod dispatch;
mod logging;
mod paths;
mod state;
mod wecom;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use wecomrelay_connectors::{ExecutionEngine, WorkspaceRouter};
use wecomrelay_protocol::CallbackCodec;

use crate::config::Cli;
use crate::dispatch::Pipeline;
use crate::state::AppState;
use crate::wecom::WeComClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = paths::init_data_dir(cli.data_dir.as_deref());
    paths::ensure_dirs()
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let logging = logging::init_logging(cli.log_stderr)?;

    cli.validate()?;
    let codec = CallbackCodec::new(
        &cli.receive_token,
        &cli.receive_encoding_aes_key,
        &cli.corp_id,
    )
    .context("RECEIVE_ENCODING_AES_KEY is not a valid callback key")?;

    let workspaces = WorkspaceRouter::new(cli.workspace_base());
    tokio::fs::create_dir_all(workspaces.base())
        .await
        .with_context(|| format!("failed to create workspace dir {}", workspaces.base().display()))?;
    workspaces.sweep_tombstones().await;
    let engine = ExecutionEngine::new(cli.engine_config(), workspaces);

    let client =
        WeComClient::new(&cli.corp_id, cli.agent_id, &cli.secret)?.with_api_base(&cli.api_base);
    if !cli.skip_token_check {
        client
            .access_token()
            .await
            .context("could not obtain a WeCom access token; check CORP_ID and SECRET")?;
    }

    let state = Arc::new(AppState::new(
        codec,
        Pipeline::new(engine, client, cli.reply_chunk_bytes),
    ));
    let app = callback::router(state.clone());

    let addr = cli.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        component = "server",
        event = "server.listening",
        run_id = %logging.run_id,
        addr = %addr,
        backend = %state.pipeline.engine().backend(),
        workspace = %state.pipeline.engine().router().base().display(),
        callback_path = callback::CALLBACK_PATH,
        "WeCom relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.pipeline.engine().close().await;
    info!(
        component = "server",
        event = "server.stopped",
        run_id = %logging.run_id,
        "Server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            component = "server",
            event = "server.signal_failed",
            error = %e,
            "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(
        component = "server",
        event = "server.shutdown_requested",
        "Shutdown requested"
    );
}
