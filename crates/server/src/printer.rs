//! Legacy (IEEE 1284) printer interfaces
//!
//! Printer class interfaces with protocol 1 (unidirectional) or 2
//! (bidirectional) carry a raw byte stream: print data from the host on
//! the OUT endpoint and status data back on the IN endpoint. The printer
//! emulation behind that stream is not part of this crate; the pipe
//! connects a device endpoint to any byte stream implementing it.

use std::io;
use std::sync::Arc;

use protocol::types::class;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::stream::EndpointConn;
use crate::usb::{Device, Endpoint};

/// Printer class subclass
pub const SUBCLASS_PRINTER: u8 = 1;
/// Unidirectional printer interface
pub const PROTOCOL_UNIDIRECTIONAL: u8 = 1;
/// Bidirectional printer interface
pub const PROTOCOL_BIDIRECTIONAL: u8 = 2;
/// IPP over USB interface
pub const PROTOCOL_IPP_USB: u8 = 4;

/// Endpoints of all legacy (7/1/1 and 7/1/2) printer interfaces
pub fn legacy_endpoints(dev: &Device) -> Vec<Arc<Endpoint>> {
    let mut endpoints =
        dev.endpoints_by_class(class::PRINTER, SUBCLASS_PRINTER, PROTOCOL_UNIDIRECTIONAL);
    endpoints.extend(dev.endpoints_by_class(
        class::PRINTER,
        SUBCLASS_PRINTER,
        PROTOCOL_BIDIRECTIONAL,
    ));
    endpoints
}

/// Pump bytes between a printer endpoint and a stream, in both
/// directions, until the stream fails
///
/// Host to printer: endpoint reads are written to `printer`.
/// Printer to host: `printer` reads are written to the endpoint.
///
/// The task returns the byte counts moved in each direction.
pub fn spawn_legacy_pipe<S>(ep: Arc<Endpoint>, printer: S) -> JoinHandle<io::Result<(u64, u64)>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut conn = EndpointConn::new(ep);
        let mut printer = printer;

        info!("Legacy printer pipe started");
        let result = tokio::io::copy_bidirectional(&mut conn, &mut printer).await;

        match &result {
            Ok((to_printer, to_host)) => info!(
                "Legacy printer pipe closed: {} bytes printed, {} bytes returned",
                to_printer, to_host
            ),
            Err(e) => debug!("Legacy printer pipe failed: {}", e),
        }
        result
    })
}
