//! TDengine connector process
//!
//! Sink mode reads one record per line from stdin and writes it to TDengine.
//! Source mode extracts the configured tables and prints one line per row to
//! stdout.

use anyhow::Context;
use tdengine_connect_core::{
    FileOffsetStore, LineStream, MemoryOffsetStore, OffsetStore, SinkRuntime, SourceRuntime,
    WriterEmitter,
};
use tdengine_connector::{Mode, TDengineConnectorConfig, TDengineSinkConnector, TDengineSourceConnector};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TDengineConnectorConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    match config.tdengine.mode {
        Mode::Sink => run_sink(config).await,
        Mode::Source => run_source(config).await,
    }
}

async fn run_sink(config: TDengineConnectorConfig) -> anyhow::Result<()> {
    let TDengineConnectorConfig { core, tdengine } = config;
    let topic = core.connector_name.clone();

    let connector = TDengineSinkConnector::with_config(tdengine)?;
    let stream = LineStream::new(BufReader::new(tokio::io::stdin()), topic);
    let mut runtime = SinkRuntime::new(connector, stream, core)?;

    tracing::info!("Starting TDengine sink, version {}", env!("CARGO_PKG_VERSION"));
    runtime.run().await.context("sink stopped with an error")?;
    Ok(())
}

async fn run_source(config: TDengineConnectorConfig) -> anyhow::Result<()> {
    let TDengineConnectorConfig { core, tdengine } = config;

    match tdengine.offset_file.clone() {
        Some(path) => {
            let store = FileOffsetStore::open(&path)
                .await
                .with_context(|| format!("failed to open offset file {}", path))?;
            source_with_store(core, tdengine, store).await
        }
        None => source_with_store(core, tdengine, MemoryOffsetStore::new()).await,
    }
}

async fn source_with_store<O: OffsetStore>(
    core: tdengine_connect_core::ConnectorConfig,
    tdengine: tdengine_connector::TDengineConfig,
    store: O,
) -> anyhow::Result<()> {
    let connector = TDengineSourceConnector::with_config(tdengine)?;
    let emitter = WriterEmitter::new(tokio::io::stdout());
    let mut runtime = SourceRuntime::new(connector, emitter, store, core)?;

    tracing::info!("Starting TDengine source, version {}", env!("CARGO_PKG_VERSION"));
    runtime.run().await.context("source stopped with an error")?;
    Ok(())
}
