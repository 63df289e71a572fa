//! Byte streams over USB endpoints
//!
//! [`EndpointConn`] turns one bidirectional bulk endpoint into a tokio
//! byte stream: reading takes host OUT data, writing answers host IN
//! requests. [`EndpointListener`] hands out such streams from a pool of
//! endpoints, so a stream server written for sockets (e.g. an HTTP server)
//! can run unmodified on top of a USB device.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::EndpointError;
use crate::usb::Endpoint;

/// Read chunk size, one maximum-size bulk transfer
const READ_CHUNK: usize = 16 * 1024;

type ReadFuture = Pin<Box<dyn Future<Output = (Result<usize, EndpointError>, Vec<u8>)> + Send>>;
type WriteFuture = Pin<Box<dyn Future<Output = Result<usize, EndpointError>> + Send>>;

/// Endpoint waiting in a listener pool, with host data already taken
/// from its OUT queue but not yet read by any stream
struct Idle {
    ep: Arc<Endpoint>,
    leftover: Vec<u8>,
}

/// Byte stream on one endpoint
///
/// Dropping the stream cancels any blocked read or write and returns the
/// endpoint to the listener it came from. Received bytes not read yet go
/// back with it and are the first bytes the next stream reads.
pub struct EndpointConn {
    ep: Arc<Endpoint>,
    cancel: CancellationToken,
    /// Pool to return the endpoint to. Does not keep the listener alive.
    pool: Option<async_channel::WeakSender<Idle>>,
    reading: Option<ReadFuture>,
    /// Received bytes that did not fit the caller's buffer
    leftover: Vec<u8>,
    writing: Option<WriteFuture>,
}

impl std::fmt::Debug for EndpointConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConn")
            .field("ep", &self.ep)
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

impl EndpointConn {
    /// Stream on an endpoint, not attached to a listener
    pub fn new(ep: Arc<Endpoint>) -> Self {
        Self {
            ep,
            cancel: CancellationToken::new(),
            pool: None,
            reading: None,
            leftover: Vec::new(),
            writing: None,
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.ep
    }

    /// Unblock pending and future reads and writes
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn take_leftover(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.leftover.len().min(buf.remaining());
        buf.put_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
    }
}

impl AsyncRead for EndpointConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.leftover.is_empty() {
            self.take_leftover(buf);
            return Poll::Ready(Ok(()));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let this = &mut *self;
        loop {
            let fut = this.reading.get_or_insert_with(|| {
                let ep = this.ep.clone();
                let cancel = this.cancel.clone();
                Box::pin(async move {
                    let mut chunk = vec![0u8; READ_CHUNK];
                    let result = ep.read_with(&mut chunk, &cancel).await;
                    (result, chunk)
                })
            });

            let (result, mut chunk) = ready!(fut.as_mut().poll(cx));
            this.reading = None;

            match result {
                // Zero-length packet, not the end of the stream
                Ok(0) => {
                    trace!("endpoint stream: zero-length transfer");
                }
                Ok(n) => {
                    chunk.truncate(n);
                    this.leftover = chunk;
                    this.take_leftover(buf);
                    return Poll::Ready(Ok(()));
                }
                // End of stream
                Err(EndpointError::Closed) => return Poll::Ready(Ok(())),
                Err(e) => return Poll::Ready(Err(e.into())),
            }
        }
    }
}

impl AsyncWrite for EndpointConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let this = &mut *self;
        let fut = this.writing.get_or_insert_with(|| {
            let ep = this.ep.clone();
            let cancel = this.cancel.clone();
            let data = buf.to_vec();
            Box::pin(async move { ep.write_with(&data, &cancel).await })
        });

        let result = ready!(fut.as_mut().poll(cx));
        this.writing = None;

        match result {
            Ok(n) => {
                trace!("endpoint stream: wrote {} of {} bytes", n, buf.len());
                Poll::Ready(Ok(n.min(buf.len())))
            }
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Drop for EndpointConn {
    fn drop(&mut self) {
        self.cancel.cancel();

        if let Some(pool) = self.pool.take().and_then(|weak| weak.upgrade()) {
            // The pool has room for every endpoint it owns
            let _ = pool.try_send(Idle {
                ep: self.ep.clone(),
                leftover: std::mem::take(&mut self.leftover),
            });
        }
    }
}

/// Stream listener on a pool of endpoints
pub struct EndpointListener {
    tx: async_channel::Sender<Idle>,
    rx: async_channel::Receiver<Idle>,
}

impl EndpointListener {
    pub fn new(endpoints: Vec<Arc<Endpoint>>) -> Self {
        let (tx, rx) = async_channel::bounded(endpoints.len().max(1));
        for ep in endpoints {
            let _ = tx.try_send(Idle {
                ep,
                leftover: Vec::new(),
            });
        }
        Self { tx, rx }
    }

    /// Wait for an idle endpoint and wrap it into a stream
    ///
    /// Fails once the listener is closed.
    pub async fn accept(&self) -> io::Result<EndpointConn> {
        let idle = self.rx.recv().await.map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "endpoint listener closed")
        })?;

        let mut conn = EndpointConn::new(idle.ep);
        conn.leftover = idle.leftover;
        conn.pool = Some(self.tx.downgrade());
        Ok(conn)
    }

    /// Count of endpoints waiting in the pool
    pub fn idle(&self) -> usize {
        self.rx.len()
    }

    /// Stop accepting. Blocked and future `accept` calls fail.
    pub fn close(&self) {
        self.rx.close();
    }
}
