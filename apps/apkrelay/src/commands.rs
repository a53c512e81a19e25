//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use apkrelay_orchestrator::{
    DirectoryDestination, FileSource, HttpSource, InboundSource, TransferContext, TransferEvent,
    TransferOrchestrator,
};
use apkrelay_protocol::{RetrievalHandle, TransferState};
use apkrelay_relay::{RelayClient, RelayServer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Runs the relay server until Ctrl+C.
pub async fn serve(config: &Config, bind: Option<String>) -> anyhow::Result<()> {
    let mut server_config = config.server_config();
    if let Some(bind) = bind {
        server_config.bind = bind;
    }

    let server = RelayServer::bind(&server_config).await?;
    tracing::info!(
        addr = %server.local_addr(),
        storage = %server_config.storage_dir.display(),
        "relay ready"
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    server.run(cancel).await?;
    Ok(())
}

/// Moves a local file or a URL to the configured output directory.
pub async fn send(
    config: &Config,
    source: &str,
    name: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let http = reqwest::Client::new();

    let destination =
        DirectoryDestination::open(&config.output.dir, config.output.chunk_capable).await?;
    let mut ctx = TransferContext::new(config.transfer_config(), Arc::new(destination));
    if let Some(url) = &config.relay.url {
        ctx = ctx.with_relay(Arc::new(RelayClient::new(http.clone(), url)));
    }

    let source: Box<dyn InboundSource> = if is_url(source) {
        let mut s = HttpSource::new(http, source);
        if let Some(name) = name {
            s = s.with_name(name);
        }
        Box::new(s)
    } else {
        let mut s = FileSource::new(source);
        if let Some(name) = name {
            s = s.with_name(name);
        }
        Box::new(s)
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut orchestrator = TransferOrchestrator::new(ctx, cancel);
    if let Some(events) = orchestrator.take_events() {
        tokio::spawn(log_events(events));
    }
    let report = orchestrator.run(source.as_ref()).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(summary) = &report.summary {
        print!("{summary}");
    }

    if !report.is_success() {
        anyhow::bail!(
            "transfer of {} failed ({}): {}",
            report.name,
            report
                .failure
                .map(|k| k.to_string())
                .unwrap_or_default(),
            report.error.unwrap_or_default()
        );
    }
    Ok(())
}

/// Downloads a staged payload to `out`.
///
/// `target` is either the URL from a transfer summary or a name staged on
/// the configured `relay.url`.
pub async fn fetch(config: &Config, target: &str, out: &Path) -> anyhow::Result<()> {
    let (client, handle) = resolve_fetch(config, target)?;
    let bytes = client.fetch_to_file(&handle, out).await?;
    println!("{bytes} bytes written to {}", out.display());
    Ok(())
}

fn resolve_fetch(
    config: &Config,
    target: &str,
) -> anyhow::Result<(RelayClient, RetrievalHandle)> {
    let http = reqwest::Client::new();
    match (&config.relay.url, is_url(target)) {
        (Some(base), false) => {
            let client = RelayClient::new(http, base);
            let handle = client.handle_for(target)?;
            Ok((client, handle))
        }
        (None, false) => anyhow::bail!("{target} is not a URL and relay.url is not set"),
        (base, true) => {
            // A full URL is requested as-is; the base only matters for staging.
            let client = RelayClient::new(http, base.as_deref().unwrap_or(target));
            let handle = RetrievalHandle::Url {
                url: target.to_string(),
            };
            Ok((client, handle))
        }
    }
}

/// Rebuilds `name` from `<dir>/<name>.part<i>` into `out`.
pub async fn reassemble(
    dir: &Path,
    name: &str,
    out: Option<PathBuf>,
    expected_parts: Option<u32>,
    sha256: Option<&str>,
) -> anyhow::Result<()> {
    let name = apkrelay_transfer::sanitize_name(name)?;
    let out = out.unwrap_or_else(|| dir.join(&name));

    let parts = apkrelay_transfer::discover_parts(dir, &name, expected_parts).await?;
    let bytes = apkrelay_transfer::reassemble_files(&parts, &out, sha256).await?;
    tracing::info!(name = %name, parts = parts.len(), bytes, "payload reassembled");
    println!("{bytes} bytes written to {}", out.display());
    Ok(())
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, shutting down");
            cancel.cancel();
        }
    });
}

async fn log_events(mut events: mpsc::Receiver<TransferEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransferEvent::State { transfer_id, state } => {
                tracing::info!(transfer_id = %transfer_id, state = %state, "transfer state");
                if state.is_terminal() {
                    break;
                }
            }
            TransferEvent::Progress {
                state: TransferState::Acquiring,
                done,
                total,
                ..
            } => {
                tracing::debug!(bytes = done, total, "acquiring");
            }
            TransferEvent::Progress { done, total, .. } => {
                tracing::info!(units = done, total, "delivering");
            }
            TransferEvent::Failed { kind, error, .. } => {
                tracing::warn!(kind = %kind, error = %error, "transfer failed");
            }
        }
    }
}
