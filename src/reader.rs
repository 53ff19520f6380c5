use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::counter::Counter;

/// Wraps a data source and records every byte read through it in a [`Counter`].
pub struct AccountedReader<R> {
    inner: R,
    counter: Arc<Counter>,
}

impl<R> AccountedReader<R> {
    pub fn new(inner: R, counter: Arc<Counter>) -> Self {
        Self { inner, counter }
    }

    pub fn counter(&self) -> &Arc<Counter> {
        &self.counter
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for AccountedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.counter.update(count as u64);
        Ok(count)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for AccountedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            this.counter.update((buf.filled().len() - before) as u64);
        }
        polled
    }
}
