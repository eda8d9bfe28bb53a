use std::pin::Pin;
use std::task::{Context, Poll};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

/// An [`AsyncRead`] adapter which counts and hashes everything read through it.
#[derive(Debug)]
pub(crate) struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
    size: u64,
}

impl<R> DigestReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Total bytes read and the lower-case hex SHA-256 of them.
    pub(crate) fn finish(self) -> (u64, String) {
        (self.size, hex::encode(self.hasher.finalize()))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DigestReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);

        if let Poll::Ready(Ok(())) = &poll {
            let fresh = &buf.filled()[before..];
            this.hasher.update(fresh);
            this.size += fresh.len() as u64;
        }

        poll
    }
}
