use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use crate::transport::TransferReporter;

pin_project! {
    /// Body stream that reports the running byte count as chunks are read.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        reporter: TransferReporter,
        bytes_uploaded: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, reporter: TransferReporter, initial_offset: u64) -> Self {
        Self {
            inner,
            reporter,
            bytes_uploaded: initial_offset,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_uploaded += chunk.len() as u64;
                    this.reporter.progress(*this.bytes_uploaded);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
