//! The gatehouse daemon binary.
//!
//! Reads one JSON request per line from stdin and writes one JSON
//! response line per root request to stdout. Startup registers the
//! built-in services, creates the root account, and replays any
//! configured seed requests as non-delivered synthetic roots.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use gatehouse_core::{ClientRequest, EngineConfig, MemoryStorage};
use gatehouse_daemon::transport::{StdoutTransport, Transport};
use gatehouse_daemon::{bootstrap, orchestrator, EngineContext, SharedContext};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "gatehoused", about = "Request dispatch and authorization daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay internal fault detail to clients.
    #[arg(long)]
    debug: bool,
}

/// On-disk configuration: the engine knobs plus optional seed requests
/// dispatched at startup without delivery.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DaemonConfig {
    #[serde(flatten)]
    engine: EngineConfig,
    seeds: Vec<ClientRequest>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if args.debug {
        config.engine.debug = true;
    }

    let ctx = EngineContext::shared(config.engine, Arc::new(MemoryStorage::new()));
    bootstrap(&ctx)
        .await
        .map_err(|err| anyhow::anyhow!("bootstrap failed: {err}"))?;

    for seed in config.seeds {
        // Seeds run for their side effects; the response is dropped.
        if let Err(err) = orchestrator::dispatch(&ctx, &seed).await {
            warn!(service = %seed.service, message = %seed.message, error = %err, "seed request failed");
        }
    }

    info!("accepting requests on stdin");
    let transport = Arc::new(StdoutTransport::new(ctx.config.debug));
    serve(ctx, transport).await
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<DaemonConfig> {
    match path {
        None => Ok(DaemonConfig::default()),
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))
        }
    }
}

/// One stdin line: an optional correlation id plus the request itself.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(flatten)]
    request: ClientRequest,
}

async fn serve(ctx: SharedContext, transport: Arc<StdoutTransport>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                let failure = gatehouse_core::DispatchError::malformed(err.to_string());
                transport.deliver_error("unparsed", &failure).await?;
                continue;
            }
        };
        let root_id = envelope
            .id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let ctx = ctx.clone();
        let transport = transport.clone();
        tokio::spawn(async move {
            let outcome = match orchestrator::dispatch(&ctx, &envelope.request).await {
                Ok(payload) => transport.deliver(&root_id, payload).await,
                Err(err) => transport.deliver_error(&root_id, &err).await,
            };
            if let Err(err) = outcome {
                warn!(root_id = %root_id, error = %err, "delivery failed");
            }
        });
    }
    Ok(())
}
