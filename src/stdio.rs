//! Stream mode: pipeline events in on one pipe, advanced events out on another.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::types::PipelineEvent;

/// Process newline-delimited JSON events from `reader`.
///
/// Each event has its current step dispatched, is advanced by one step, and
/// is written to `writer` as a single JSON line. Nothing is forwarded over
/// HTTP; the next stage reads `writer`. Lines that do not decode are logged
/// and skipped.
///
/// Returns the number of events written.
pub async fn run_stdio<R, W>(dispatcher: &Dispatcher, reader: R, mut writer: W) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut written = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut event: PipelineEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "skipping undecodable event");
                continue;
            }
        };

        let outcome = dispatcher.dispatch(&event).await;
        debug!(run_id = %event.run.run_id, step = event.run.step, ?outcome, "event processed");
        event.advance();

        let mut encoded = serde_json::to_vec(&event).map_err(std::io::Error::other)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        written += 1;
    }

    writer.flush().await?;
    Ok(written)
}
