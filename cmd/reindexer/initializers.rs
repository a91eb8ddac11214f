use std::{path::Path, sync::Arc};

use eyre::{Result, WrapErr};
use reindexer_gateway::{ClusterGateway, ElasticsearchGateway};
use reindexer_ledger::{EngineType, Ledger};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, fmt, layer::SubscriberExt};

use crate::cli::{ClusterOptions, Options};

pub fn init_tracing(opts: &Options) {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    // stdout is reserved for reports
    let fmt_layer = fmt::layer()
        .with_target(include_target)
        .with_ansi(opts.log_color.enabled())
        .with_writer(std::io::stderr);

    let subscriber = Registry::default().with(fmt_layer.with_filter(log_filter));

    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Cannot install the log subscriber: {error}");
    }
}

/// If the ledger path is the word `memory`, the in-memory engine is used.
pub fn is_memory_ledger(path: &Path) -> bool {
    path.to_str() == Some("memory")
}

pub fn open_ledger(path: &Path) -> Result<Ledger> {
    if is_memory_ledger(path) {
        warn!("Using the in-memory ledger: progress will be lost when the process exits");
        return Ledger::new(path, EngineType::InMemory).wrap_err("Cannot open in-memory ledger");
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Cannot create ledger directory {parent:?}"))?;
    }
    info!(path = %path.display(), "Opening ledger");
    Ledger::new(path, EngineType::SQLite)
        .wrap_err_with(|| format!("Cannot open ledger at {path:?}"))
}

pub fn init_gateway(cluster: &ClusterOptions) -> Result<Arc<dyn ClusterGateway>> {
    let gateway = ElasticsearchGateway::new(cluster.gateway_config())
        .wrap_err_with(|| format!("Cannot reach cluster at {}", cluster.url))?;
    Ok(Arc::new(gateway))
}

/// Token fired on the first Ctrl-C. The orchestrator stops at its next
/// checkpoint and records the migration as cancelled.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next checkpoint");
            trigger.cancel();
        }
    });
    token
}
