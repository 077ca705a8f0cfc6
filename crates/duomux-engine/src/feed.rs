//! Reading the combiner's progress feed.
//!
//! Pipe reads do not respect line boundaries: one read may end halfway
//! through `speed=1.0`. [`ProgressFeedReader`] keeps the trailing partial line
//! until the rest of it arrives, and yields each read's complete lines as one
//! burst.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::combiner::CombinerChannel;
use crate::error::MuxError;
use crate::parser::{FeedState, parse_chunk};
use crate::progress::CombinerWriter;

const READ_BUFFER_SIZE: usize = 4096;

/// Longest partial line kept while waiting for its newline.
const MAX_PENDING_LINE: usize = 64 * 1024;

/// Yields progress bursts made of complete lines.
pub struct ProgressFeedReader<R> {
    reader: R,
    pending: Vec<u8>,
    scratch: Box<[u8]>,
}

impl<R> ProgressFeedReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            scratch: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Returns the next burst, or `None` at end of feed.
    ///
    /// A burst holds every complete line received so far. At end of feed the
    /// remaining partial line, if any, is returned as the final burst.
    pub async fn next_burst(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') {
                let burst: Vec<u8> = self.pending.drain(..=last_newline).collect();
                return Ok(Some(String::from_utf8_lossy(&burst).into_owned()));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.pending);
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }

            self.pending.extend_from_slice(&self.scratch[..n]);
            if self.pending.len() > MAX_PENDING_LINE && !self.scratch[..n].contains(&b'\n') {
                trace!(len = self.pending.len(), "Dropping oversized progress line");
                self.pending.clear();
            }
        }
    }
}

/// Read the feed until it closes, merging each burst into the model.
///
/// `first_burst` is notified once, when the first burst carrying a display
/// field has been applied.
pub async fn pump_progress_feed<R>(
    feed: R,
    writer: CombinerWriter,
    first_burst: Arc<Notify>,
    token: CancellationToken,
) -> Result<u64, MuxError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = ProgressFeedReader::new(feed);
    let mut bursts = 0u64;
    let mut notified = false;

    loop {
        let burst = tokio::select! {
            _ = token.cancelled() => return Err(MuxError::Cancelled),
            burst = reader.next_burst() => burst,
        };
        let burst = match burst {
            Ok(Some(burst)) => burst,
            Ok(None) => break,
            Err(e) => return Err(MuxError::channel(CombinerChannel::ProgressFeed, e)),
        };

        let update = parse_chunk(&burst);
        trace!(?update, "Progress burst");
        bursts += 1;

        if update.state == Some(FeedState::End) {
            debug!("Combiner reported end of progress feed");
        }
        if update.is_empty() {
            continue;
        }

        writer.apply(&update);
        if !notified {
            notified = true;
            first_burst.notify_one();
        }
    }

    debug!(bursts, "Progress feed closed");
    Ok(bursts)
}
