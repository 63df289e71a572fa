//! IPP over USB
//!
//! Printer interfaces with protocol 4 carry HTTP/1.1: each bulk endpoint
//! pair is one persistent HTTP connection. The HTTP server runs on an
//! [`EndpointListener`] built from those endpoints.
//!
//! Only the transport is implemented here. Every request is answered with
//! 404 Not Found.

use std::convert::Infallible;
use std::sync::Arc;

use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Request, Response, StatusCode};
use tracing::{debug, info};

use crate::printer::{PROTOCOL_IPP_USB, SUBCLASS_PRINTER};
use crate::stream::EndpointListener;
use crate::usb::Device;
use protocol::types::class;

/// Listener on the endpoints of all IPP over USB interfaces of a device
pub fn listener(dev: &Device) -> EndpointListener {
    EndpointListener::new(dev.endpoints_by_class(
        class::PRINTER,
        SUBCLASS_PRINTER,
        PROTOCOL_IPP_USB,
    ))
}

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    debug!("ipp-usb: {} {}", req.method(), req.uri());

    let mut rsp = Response::new(Body::from("Not Found\n"));
    *rsp.status_mut() = StatusCode::NOT_FOUND;
    Ok(rsp)
}

/// Serve HTTP on every endpoint of the listener until it is closed
pub async fn serve(listener: Arc<EndpointListener>) {
    info!("IPP over USB server started");

    loop {
        let conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                info!("IPP over USB server stopped: {}", e);
                return;
            }
        };

        tokio::spawn(async move {
            let result = Http::new()
                .http1_only(true)
                .serve_connection(conn, service_fn(handle))
                .await;

            if let Err(e) = result {
                debug!("ipp-usb: connection error: {}", e);
            }
        });
    }
}
