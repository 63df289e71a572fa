//! USB/IP server
//!
//! Owns the device slot table and runs one task per client connection.
//! A connection either lists the attachable devices and closes, or
//! imports one device and then exchanges I/O requests until the client
//! goes away.

use protocol::types::MAX_DEVICES;
use protocol::{
    DeviceSummary, HandshakeRequest, HandshakeResponse, IoRequest, Location, SubmitRequest,
    UnlinkRequest, UsbError,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

use super::connection::{ConnId, ProtoConn, ReplySender};
use super::control::handle_control;
use crate::error::ServerError;
use crate::usb::{Device, Endpoint};

/// Default USB/IP TCP port
pub const USBIP_PORT: u16 = 3240;

/// Bus number of every slot
const BUS: u16 = 1;

/// Device slot, at a fixed bus/device location
struct Slot {
    location: Location,
    bus_id: String,
    dev: Option<Arc<Device>>,
    /// Connection which imported the device
    conn: Option<ConnId>,
}

struct SlotTable {
    /// Indexed by device number. Slot 0 is reserved.
    slots: Vec<Slot>,
    by_bus_id: HashMap<String, usize>,
    by_location: HashMap<Location, usize>,
    /// Offset where the next free slot search starts
    next: usize,
}

impl SlotTable {
    fn new() -> Self {
        let slots: Vec<Slot> = (0..=MAX_DEVICES)
            .map(|dev| {
                let location = Location::new(BUS, dev as u16);
                Slot {
                    location,
                    bus_id: location.bus_id(),
                    dev: None,
                    conn: None,
                }
            })
            .collect();

        let by_bus_id = slots
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, slot)| (slot.bus_id.clone(), idx))
            .collect();
        let by_location = slots
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, slot)| (slot.location, idx))
            .collect();

        Self {
            slots,
            by_bus_id,
            by_location,
            next: 0,
        }
    }

    /// Find a free slot, round-robin
    fn next_free(&mut self) -> Option<usize> {
        for i in 0..MAX_DEVICES {
            let idx = 1 + (self.next + i) % MAX_DEVICES;
            if self.slots[idx].dev.is_none() {
                self.next = idx % MAX_DEVICES;
                return Some(idx);
            }
        }
        None
    }
}

/// Submit waiting for completion, by sequence number
///
/// UNLINK only carries the sequence number, so the endpoint is kept here.
/// It stays valid after the host switches configuration or interface.
#[derive(Debug, Clone)]
struct PendingSubmit {
    ep: Arc<Endpoint>,
    input: bool,
}

type PendingTable = Arc<Mutex<HashMap<u32, PendingSubmit>>>;

fn lock_pending(pending: &PendingTable) -> MutexGuard<'_, HashMap<u32, PendingSubmit>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// USB/IP server
///
/// Shared between connection tasks as `Arc<Server>`.
pub struct Server {
    slots: Mutex<SlotTable>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(SlotTable::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Attach a device to a free slot
    ///
    /// # Returns
    /// The location assigned to the device. Its bus-id is what clients
    /// import.
    pub fn add_device(&self, dev: Arc<Device>) -> Result<Location, ServerError> {
        let mut table = self.lock();
        let idx = table.next_free().ok_or(ServerError::NoFreeSlot)?;

        let slot = &mut table.slots[idx];
        slot.dev = Some(dev);
        info!("Device attached as {}", slot.bus_id);
        Ok(slot.location)
    }

    /// Summaries of devices not imported by any connection
    pub fn device_list(&self) -> Vec<DeviceSummary> {
        let table = self.lock();
        table
            .slots
            .iter()
            .filter(|slot| slot.conn.is_none())
            .filter_map(|slot| slot.dev.as_ref().map(|dev| dev.summary(slot.location)))
            .collect()
    }

    /// Bind a device to a connection. Fails if there is no device at
    /// `bus_id` or another connection owns it.
    fn import(&self, bus_id: &str, conn: ConnId) -> Option<(Arc<Device>, Location)> {
        let mut table = self.lock();
        let idx = *table.by_bus_id.get(bus_id)?;

        let slot = &mut table.slots[idx];
        if slot.conn.is_some() {
            return None;
        }

        let dev = slot.dev.clone()?;
        slot.conn = Some(conn);
        Some((dev, slot.location))
    }

    /// Release the device imported by a connection
    fn release(&self, location: Location, conn: ConnId) {
        let mut table = self.lock();
        if let Some(&idx) = table.by_location.get(&location) {
            let slot = &mut table.slots[idx];
            if slot.conn == Some(conn) {
                slot.conn = None;
            }
        }
    }

    /// Accept TCP connections on `addr` forever
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!("USB/IP server listening on {}", listener.local_addr()?);
        self.serve_listener(listener).await
    }

    /// Accept connections on a bound listener, one task per connection
    pub async fn serve_listener(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!("{}: can't set TCP_NODELAY: {}", peer, e);
            }

            info!("Accepted connection from {}", peer);

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(stream).await {
                    error!("Connection {} error: {:#}", peer, e);
                }
                info!("Connection closed: {}", peer);
            });
        }
    }

    /// Run the USB/IP protocol on one client stream until it closes
    pub async fn serve<S>(self: Arc<Self>, stream: S) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut conn = ProtoConn::new(stream);
        let result = self.handshake(&mut conn).await;
        conn.close().await?;
        result
    }

    async fn handshake<S>(&self, conn: &mut ProtoConn<S>) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        match conn.recv_handshake().await? {
            HandshakeRequest::DevList => {
                conn.send_handshake(&HandshakeResponse::DevList(self.device_list()))?;
                Ok(())
            }

            HandshakeRequest::Import { bus_id } => {
                let Some((dev, location)) = self.import(&bus_id, conn.id()) else {
                    warn!("{}: can't import {}: not available", conn.id(), bus_id);
                    conn.send_handshake(&HandshakeResponse::Import(None))?;
                    return Ok(());
                };

                info!("{}: imported {}", conn.id(), bus_id);
                let result = match conn
                    .send_handshake(&HandshakeResponse::Import(Some(dev.summary(location))))
                {
                    Ok(()) => io_loop(conn, &dev, location).await,
                    Err(e) => Err(e),
                };

                // Cancel this connection's requests before another
                // connection can import the device
                dev.shutdown();
                self.release(location, conn.id());
                info!("{}: released {}", conn.id(), bus_id);

                result
            }
        }
    }
}

/// Receive and dispatch I/O requests until the client disconnects
async fn io_loop<S>(conn: &mut ProtoConn<S>, dev: &Device, location: Location) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let replies = conn.replies();
    let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

    loop {
        let rq = match conn.recv_io().await {
            Ok(rq) => rq,
            Err(e) if e.is_eof() => {
                debug!("{}: client disconnected", conn.id());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match rq {
            IoRequest::Submit(rq) => {
                if rq.header.location != location {
                    warn!("{}: {} for wrong device {}", conn.id(), rq, rq.header.location);
                    replies.send(rq.into_response(UsbError::Pipe.status()).into())?;
                } else if rq.endpoint() == 0 {
                    replies.send(handle_control(dev, rq).into())?;
                } else {
                    submit(dev, rq, &pending, &replies)?;
                }
            }

            IoRequest::Unlink(rq) => {
                let status = if rq.header.location != location {
                    warn!("{}: {} for wrong device {}", conn.id(), rq, rq.header.location);
                    0
                } else {
                    unlink(&rq, &pending)
                };
                replies.send(rq.response(status).into())?;
            }
        }
    }
}

/// Forward a non-control submit to its endpoint
fn submit(
    dev: &Device,
    rq: SubmitRequest,
    pending: &PendingTable,
    replies: &ReplySender,
) -> anyhow::Result<()> {
    let seqnum = rq.seqnum();
    let input = rq.is_in();
    let Some(ep) = dev.route(rq.endpoint(), input) else {
        warn!("{} rejected: no such endpoint", rq);
        replies.send(rq.into_response(UsbError::Pipe.status()).into())?;
        return Ok(());
    };

    // Recorded before queueing, so a completion always finds its entry
    lock_pending(pending).insert(
        seqnum,
        PendingSubmit {
            ep: ep.clone(),
            input,
        },
    );

    let done = {
        let pending = pending.clone();
        let replies = replies.clone();
        Box::new(move |rsp: protocol::SubmitResponse| {
            lock_pending(&pending).remove(&seqnum);
            if let Err(e) = replies.send(rsp.into()) {
                trace!("reply #{:08x} dropped: {}", seqnum, e);
            }
        })
    };

    ep.submit(rq, done);
    Ok(())
}

/// Cancel a pending submit; returns the RET_UNLINK status
fn unlink(rq: &UnlinkRequest, pending: &PendingTable) -> i32 {
    let target = lock_pending(pending).remove(&rq.unlink_seqnum);

    match target {
        Some(target) if target.ep.unlink(rq.unlink_seqnum, target.input) => {
            debug!("{}: cancelled", rq);
            UsbError::ConnectionReset.status()
        }
        // Unknown or already completed
        _ => 0,
    }
}
