//! Control transfer dispatch (endpoint 0)
//!
//! Control requests are answered synchronously by the I/O loop from the
//! device model, without going through an endpoint queue.

use protocol::types::{request, request_type};
use protocol::{DescriptorType, SetupPacket, SubmitRequest, SubmitResponse, UsbError};
use tracing::{debug, warn};

use crate::usb::Device;

/// Execute a control request and build its reply
pub fn handle_control(dev: &Device, mut rq: SubmitRequest) -> SubmitResponse {
    let setup = rq.setup;

    match dispatch(dev, &setup) {
        Ok(data) => {
            debug!("control: {} -> {} bytes", setup, data.len());
            if setup.is_in() {
                rq.produce_in(&data);
            }
            rq.into_response(0)
        }
        Err(err) => {
            warn!("control: {} -> {}", setup, err);
            rq.into_response(err.status())
        }
    }
}

fn dispatch(dev: &Device, setup: &SetupPacket) -> Result<Vec<u8>, UsbError> {
    use request_type::{
        RECIPIENT_DEVICE, RECIPIENT_ENDPOINT, RECIPIENT_INTERFACE, TYPE_CLASS, TYPE_STANDARD,
    };

    match (setup.kind(), setup.recipient(), setup.request) {
        (TYPE_STANDARD, RECIPIENT_DEVICE, request::GET_STATUS) => Ok(dev.get_status().to_vec()),
        (TYPE_STANDARD, RECIPIENT_DEVICE, request::GET_DESCRIPTOR) => {
            let ty = DescriptorType::from((setup.value >> 8) as u8);
            dev.get_descriptor(ty, setup.value as u8)
        }
        (TYPE_STANDARD, RECIPIENT_DEVICE, request::GET_CONFIGURATION) => {
            Ok(vec![dev.get_configuration()])
        }
        (TYPE_STANDARD, RECIPIENT_DEVICE, request::SET_CONFIGURATION) => {
            dev.set_configuration(setup.value).map(|_| Vec::new())
        }

        (TYPE_STANDARD, RECIPIENT_INTERFACE, request::GET_STATUS) => {
            dev.get_interface_status(setup.index).map(|s| s.to_vec())
        }
        (TYPE_STANDARD, RECIPIENT_INTERFACE, request::GET_INTERFACE) => {
            dev.get_interface(setup.index).map(|alt| vec![alt])
        }
        (TYPE_STANDARD, RECIPIENT_INTERFACE, request::SET_INTERFACE) => {
            dev.set_interface(setup.index, setup.value).map(|_| Vec::new())
        }

        // Endpoints never halt
        (TYPE_STANDARD, RECIPIENT_ENDPOINT, request::GET_STATUS) => Ok(vec![0, 0]),
        (TYPE_STANDARD, RECIPIENT_ENDPOINT, request::CLEAR_FEATURE) => Ok(Vec::new()),

        (TYPE_CLASS, RECIPIENT_INTERFACE, request::PRINTER_GET_DEVICE_ID) if setup.is_in() => {
            dev.ieee1284_device_id((setup.index >> 8) as u8, setup.index as u8)
        }

        _ => Err(UsbError::Pipe),
    }
}
