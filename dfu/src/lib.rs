//! Host-side USB Device Firmware Upgrade (DFU) client based on [`nusb`]
//!
//! Implements the device-discovery, status-polling and chunked
//! download/upload sequences of the DFU 1.1 class protocol, including the
//! run-time to DFU mode transition (detach and re-enumeration).
//!
//! Useful references:
//! - [USB Device Firmware Upgrade Specification, Revision 1.1](https://www.usb.org/sites/default/files/DFU_1.1.pdf)
//!
//! # Example
//!
//! The following example shows how to obtain a `Vec` of [DfuDevice]:
//! ```
//! use dfu::{DeviceFilter, find_dfu_devices};
//!
//! match find_dfu_devices(&DeviceFilter::default()) {
//!     Ok(devices) => {
//!         if devices.is_empty() {
//!             println!("No DFU devices found");
//!         } else {
//!             println!("Found {} DFU devices", devices.len());
//!         }
//!     }
//!     Err(e) => println!("Error: {e}"),
//! }
//! ```
//!
//! [`nusb`]: https://docs.rs/nusb

use std::time::Duration;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000u64);
pub(crate) const DEFAULT_TRANSFER_SIZE: u16 = 1024 * 2;

/// Wait after DETACH before re-running discovery.
pub const DEFAULT_DETACH_DELAY: Duration = Duration::from_secs(5);
/// Progress-reporting bound when no expected upload size is given.
pub const DEFAULT_UPLOAD_SIZE: u64 = 32 * 1024 * 1024;

mod connection;
mod descriptor;
mod device;
mod error;
mod session;
mod status;

// Re-exports
pub use connection::{DfuConnection, DfuTransport, UsbTransport};
pub use descriptor::{DFU_VERSION_NUMBER, DfuDescriptor};
pub use device::{
    DFU_PROTOCOL_DFU, DFU_PROTOCOL_RUNTIME, DeviceFilter, DfuDevice,
    find_dfu_device, find_dfu_devices,
};
pub use error::DfuError;
pub use session::{DfuConfig, DfuSession, open_session};
pub use status::{DfuState, DfuStatus, DfuStatusCode};
