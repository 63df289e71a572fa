//! Virtual USB endpoint
//!
//! An endpoint connects two sides: the network side submits transfer
//! requests received from the USB/IP client, and the device side (the
//! application code emulating the device function) consumes them through
//! [`Endpoint::read`] and [`Endpoint::write`].
//!
//! Each endpoint keeps two FIFO queues: IN requests waiting for data from
//! the device, and OUT requests carrying data from the host. Queue
//! operations never block the submitter; only the device side waits.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use protocol::{EndpointDescriptor, EndpointType, SubmitRequest, SubmitResponse, UsbError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::EndpointError;

/// Callback invoked exactly once with the reply to a submitted request.
/// It is never called for a request that was unlinked.
pub type Completion = Box<dyn FnOnce(SubmitResponse) + Send + 'static>;

/// Submitted request with its completion callback
struct Pending {
    rq: SubmitRequest,
    done: Completion,
}

impl Pending {
    fn complete(self, status: i32) {
        (self.done)(self.rq.into_response(status));
    }
}

#[derive(Default)]
struct Queues {
    /// IN requests, waiting for data from the device side
    inbound: VecDeque<Pending>,
    /// OUT requests, carrying data for the device side
    outbound: VecDeque<Pending>,
}

/// Virtual USB endpoint
pub struct Endpoint {
    desc: EndpointDescriptor,
    queues: Mutex<Queues>,
    /// Signaled when an IN request is queued
    in_ready: Notify,
    /// Signaled when an OUT request is queued
    out_ready: Notify,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("desc", &self.desc).finish()
    }
}

impl Endpoint {
    pub fn new(desc: EndpointDescriptor) -> Self {
        Self {
            desc,
            queues: Mutex::new(Queues::default()),
            in_ready: Notify::new(),
            out_ready: Notify::new(),
        }
    }

    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.desc
    }

    pub fn kind(&self) -> EndpointType {
        self.desc.kind
    }

    pub fn attributes(&self) -> u8 {
        self.desc.attributes
    }

    pub fn max_packet_size(&self) -> u16 {
        self.desc.max_packet_size
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Count of requests queued in one direction
    pub fn queued(&self, input: bool) -> usize {
        let queues = self.lock();
        if input {
            queues.inbound.len()
        } else {
            queues.outbound.len()
        }
    }

    /// Queue a request. The caller has already checked that the request
    /// direction is supported by the endpoint.
    pub fn submit(&self, mut rq: SubmitRequest, done: Completion) {
        let input = rq.is_in();
        if input {
            rq.buffer = Vec::with_capacity(rq.transfer_length());
        }

        trace!("endpoint queue: {}", rq);

        let mut queues = self.lock();
        if input {
            queues.inbound.push_back(Pending { rq, done });
            drop(queues);
            self.in_ready.notify_one();
        } else {
            queues.outbound.push_back(Pending { rq, done });
            drop(queues);
            self.out_ready.notify_one();
        }
    }

    /// Remove a queued request by sequence number.
    ///
    /// Returns true if the request was found. Its completion is dropped
    /// without being invoked.
    pub fn unlink(&self, seqnum: u32, input: bool) -> bool {
        let mut queues = self.lock();
        let queue = if input {
            &mut queues.inbound
        } else {
            &mut queues.outbound
        };

        match queue.iter().position(|p| p.rq.seqnum() == seqnum) {
            Some(idx) => {
                queue.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Cancel all queued requests, completing them with a
    /// connection reset status
    pub fn shutdown(&self) {
        let cancelled: Vec<Pending> = {
            let mut queues = self.lock();
            let mut all: Vec<Pending> = queues.inbound.drain(..).collect();
            all.extend(queues.outbound.drain(..));
            all
        };

        for pending in cancelled {
            pending.complete(UsbError::ConnectionReset.status());
        }
    }

    /// Receive data sent by the host. Waits until an OUT request is queued.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, EndpointError> {
        self.read_with(buf, &CancellationToken::new()).await
    }

    /// Like [`Endpoint::read`], but returns [`EndpointError::Closed`] once
    /// `cancel` is triggered.
    ///
    /// An OUT request may be drained by several reads; it completes when
    /// its whole payload has been consumed.
    pub async fn read_with(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize, EndpointError> {
        if !self.desc.kind.has_out() {
            return Err(EndpointError::BadDirection);
        }

        loop {
            if cancel.is_cancelled() {
                return Err(EndpointError::Closed);
            }

            {
                let mut queues = self.lock();
                if let Some(head) = queues.outbound.front_mut() {
                    let n = head.rq.consume_out(buf);
                    let done = if head.rq.out_complete() {
                        queues.outbound.pop_front()
                    } else {
                        None
                    };
                    let more = !queues.outbound.is_empty();
                    drop(queues);

                    if more {
                        self.out_ready.notify_one();
                    }
                    if let Some(pending) = done {
                        pending.complete(0);
                    }
                    return Ok(n);
                }
            }

            tokio::select! {
                _ = self.out_ready.notified() => {}
                _ = cancel.cancelled() => return Err(EndpointError::Closed),
            }
        }
    }

    /// Send data to the host. Waits until an IN request is queued.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, EndpointError> {
        self.write_with(buf, &CancellationToken::new()).await
    }

    /// Like [`Endpoint::write`], but returns [`EndpointError::Closed`] once
    /// `cancel` is triggered.
    ///
    /// The head IN request completes as soon as any data is copied into
    /// it, even if the host asked for more. The returned count may be less
    /// than `buf.len()` when the request is shorter.
    pub async fn write_with(
        &self,
        buf: &[u8],
        cancel: &CancellationToken,
    ) -> Result<usize, EndpointError> {
        if !self.desc.kind.has_in() {
            return Err(EndpointError::BadDirection);
        }

        loop {
            if cancel.is_cancelled() {
                return Err(EndpointError::Closed);
            }

            let head = {
                let mut queues = self.lock();
                let head = queues.inbound.pop_front();
                (head, !queues.inbound.is_empty())
            };

            if let (Some(mut pending), more) = head {
                if more {
                    self.in_ready.notify_one();
                }
                let n = pending.rq.produce_in(buf);
                pending.complete(0);
                return Ok(n);
            }

            tokio::select! {
                _ = self.in_ready.notified() => {}
                _ = cancel.cancelled() => return Err(EndpointError::Closed),
            }
        }
    }
}
