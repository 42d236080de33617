//! Continuous reading as a `Stream` of chunks.

use super::session::ReadLease;
use crate::error::{SessionError, SessionResult};
use futures::stream::{self, BoxStream};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Chunks read from the open port, each at most `buffer_size` bytes.
///
/// The stream owns the session's reader until it ends or is dropped; `read()` calls
/// meanwhile fail with `ReaderBusy`. It ends quietly on close or end of stream, yields
/// `DeviceGone` once if the device is unplugged, and passes other errors through
/// without ending. It cannot be restarted: ask the manager for a new one.
///
/// Keep polling or drop the stream once the session closes: until then it holds the
/// device, and [`SessionManager::close`](super::SessionManager::close) only waits a
/// short while for it.
pub struct ByteChunks {
    inner: BoxStream<'static, SessionResult<Vec<u8>>>,
}

impl ByteChunks {
    pub(crate) fn new(lease: ReadLease) -> Self {
        let inner = stream::unfold(Some(lease), |lease| async move {
            let mut lease = lease?;
            match lease.next_chunk().await {
                Ok(chunk) if chunk.is_empty() => {
                    debug!("Serial stream reached end of input");
                    None
                }
                Ok(chunk) => Some((Ok(chunk), Some(lease))),
                Err(SessionError::PortNotOpen) => None,
                Err(SessionError::DeviceGone) => Some((Err(SessionError::DeviceGone), None)),
                Err(e) => Some((Err(e), Some(lease))),
            }
        });
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl Stream for ByteChunks {
    type Item = SessionResult<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ByteChunks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteChunks").finish_non_exhaustive()
    }
}
