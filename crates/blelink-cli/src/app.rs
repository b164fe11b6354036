//! Bridge wiring: stdin commands into the engine, engine events onto stdout

use std::sync::Arc;

use blelink_ble::BleBackend;
use blelink_core::{AdapterEvent, BleAdapter, Engine, Event};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::CliConfig;
use crate::error::Result;
use crate::stdio::{read_commands, write_events};

/// Capacity of the queue between stdin decoding and the engine
const COMMAND_BUFFER: usize = 64;

/// Run the bridge over stdio until stdin closes
pub async fn run(config: CliConfig) -> Result<()> {
    let (backend, adapter_events) = BleBackend::new(&config.backend).await?;
    let (engine, events) = Engine::new(Arc::new(backend), config.engine.clone());
    let writer = spawn_writer(tokio::io::stdout(), events);

    bridge(
        engine,
        adapter_events,
        BufReader::new(tokio::io::stdin()),
        writer,
    )
    .await
}

/// Feed `input` into the engine until it ends, then wait for `writer` to drain.
///
/// The writer is always joined before any error is returned, so the events of the
/// final teardown reach the host even when the input fails.
pub async fn bridge<A, R>(
    engine: Engine<A>,
    adapter_events: mpsc::Receiver<AdapterEvent>,
    input: R,
    writer: tokio::task::JoinHandle<Result<usize>>,
) -> Result<()>
where
    A: BleAdapter,
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let reader = tokio::spawn(read_commands(input, command_tx));

    let served = engine.run(command_rx, adapter_events).await;
    let commands = reader.await;

    // The writer finishes once the last event sink is gone
    drop(engine);
    let events = writer.await??;

    served?;
    let commands = commands?.map_err(|e| {
        warn!("Command input failed: {}", e);
        e
    })?;
    info!(
        "Bridge finished ({} commands, {} events)",
        commands, events
    );
    Ok(())
}

/// Spawn the event writer for `output`
pub fn spawn_writer<W>(
    output: W,
    events: mpsc::UnboundedReceiver<Event>,
) -> tokio::task::JoinHandle<Result<usize>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(write_events(output, events))
}
