//! USB/IP protocol connection
//!
//! Wraps one client byte stream. Receiving is done by the connection's
//! owner (the per-connection task), one message at a time. Transmission is
//! serialized through a queue drained by a dedicated sender task, so
//! replies completed concurrently by different endpoints never interleave
//! on the wire.

use anyhow::{Context, Result};
use bytes::Bytes;
use protocol::{
    HandshakeRequest, HandshakeResponse, IoHeader, IoRequest, IoResponse, OpHeader, ProtocolError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Unique connection identifier, used to record slot ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn test(id: u64) -> Self {
        ConnId(id)
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One queued frame: header, then body. `None` stops the sender.
type Frame = Option<(Bytes, Bytes)>;

/// Cloneable handle queueing I/O replies on a connection
///
/// Submit completions run on whatever task completes the transfer, so
/// queueing never waits.
#[derive(Clone)]
pub struct ReplySender {
    id: ConnId,
    tx: async_channel::Sender<Frame>,
}

impl ReplySender {
    /// Queue an I/O reply
    pub fn send(&self, rsp: IoResponse) -> Result<()> {
        trace!("{}: send {}", self.id, rsp);

        self.tx
            .try_send(Some((rsp.encode_header(), rsp.encode_body())))
            .map_err(|_| anyhow::anyhow!("{}: connection closed", self.id))
    }
}

/// USB/IP connection on a byte stream
pub struct ProtoConn<S> {
    id: ConnId,
    reader: ReadHalf<S>,
    replies: ReplySender,
    sender: JoinHandle<()>,
}

impl<S> ProtoConn<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a stream and start its sender task
    pub fn new(stream: S) -> Self {
        let id = ConnId::next();
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = async_channel::unbounded();

        let sender = tokio::spawn(Self::sender_task(id, writer, rx));

        Self {
            id,
            reader,
            replies: ReplySender { id, tx },
            sender,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Handle for queueing replies from other tasks
    pub fn replies(&self) -> ReplySender {
        self.replies.clone()
    }

    /// Write queued frames in order until the sentinel arrives or the
    /// stream fails
    async fn sender_task(
        id: ConnId,
        mut writer: WriteHalf<S>,
        rx: async_channel::Receiver<Frame>,
    ) {
        while let Ok(Some((header, body))) = rx.recv().await {
            let result = async {
                writer.write_all(&header).await?;
                writer.write_all(&body).await?;
                writer.flush().await
            }
            .await;

            if let Err(e) = result {
                warn!("{}: write failed: {}", id, e);
                break;
            }
        }

        rx.close();
        let _ = writer.shutdown().await;
        trace!("{}: sender stopped", id);
    }

    /// Receive a handshake request
    pub async fn recv_handshake(&mut self) -> Result<HandshakeRequest, ProtocolError> {
        let mut raw = [0u8; OpHeader::SIZE];
        self.reader.read_exact(&mut raw).await?;
        let header = OpHeader::decode(&raw)?;

        let mut body = vec![0u8; HandshakeRequest::body_len(&header)?];
        self.reader.read_exact(&mut body).await?;

        let rq = HandshakeRequest::decode(&header, &body)?;
        debug!("{}: recv {}", self.id, rq);
        Ok(rq)
    }

    /// Queue a handshake reply
    pub fn send_handshake(&self, rsp: &HandshakeResponse) -> Result<()> {
        debug!("{}: send {}", self.id, rsp);

        self.replies
            .tx
            .try_send(Some((rsp.encode(), Bytes::new())))
            .map_err(|_| anyhow::anyhow!("{}: connection closed", self.id))
    }

    /// Receive an I/O request
    ///
    /// The OUT payload of a submit is read into the request, up to the
    /// maximum transfer size. Any excess declared length is read and
    /// discarded.
    pub async fn recv_io(&mut self) -> Result<IoRequest, ProtocolError> {
        let mut raw = [0u8; IoHeader::SIZE];
        self.reader.read_exact(&mut raw).await?;
        let mut body = [0u8; IoHeader::BODY_SIZE];
        self.reader.read_exact(&mut body).await?;

        let mut rq = IoRequest::decode(IoHeader::decode(&raw), &body)?;

        if let IoRequest::Submit(submit) = &mut rq {
            let (keep, drain) = submit.out_payload_split();

            if keep > 0 {
                submit.buffer = vec![0u8; keep];
                self.reader.read_exact(&mut submit.buffer).await?;
            }

            if drain > 0 {
                warn!(
                    "{}: {} bytes over the transfer size limit, dropped",
                    self.id, drain
                );
                let mut excess = (&mut self.reader).take(drain as u64);
                let drained = tokio::io::copy(&mut excess, &mut tokio::io::sink()).await?;
                if drained < drain as u64 {
                    return Err(ProtocolError::UnexpectedEof);
                }
            }
        }

        trace!("{}: recv {}", self.id, rq);
        Ok(rq)
    }

    /// Flush queued replies, stop the sender and close the stream
    pub async fn close(self) -> Result<()> {
        // The queue may already be closed by a failed sender
        let _ = self.replies.tx.send(None).await;
        drop(self.replies);

        self.sender
            .await
            .with_context(|| format!("{}: sender task failed", self.id))?;

        debug!("{}: closed", self.id);
        Ok(())
    }
}
