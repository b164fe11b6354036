//! Line-oriented command intake and event output

use blelink_core::{Command, Event};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;

/// Decode one JSON command per line and forward it to the engine.
///
/// Blank lines are skipped and malformed ones are logged and dropped. Returns the
/// number of commands forwarded once the input ends or the engine stops listening.
pub async fn read_commands<R>(reader: R, commands: mpsc::Sender<Command>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match Command::decode(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping malformed command: {}", e);
                continue;
            }
        };
        if commands.send(command).await.is_err() {
            debug!("Engine stopped accepting commands");
            break;
        }
        forwarded += 1;
    }

    debug!("Command input ended after {} commands", forwarded);
    Ok(forwarded)
}

/// Write every event as one encoded line until the engine drops its event sink
pub async fn write_events<W>(mut writer: W, mut events: mpsc::UnboundedReceiver<Event>) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(event) = events.recv().await {
        let mut line = event.encode();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}
