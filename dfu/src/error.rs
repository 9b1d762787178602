use crate::status::{DfuState, DfuStatusCode};

#[derive(Debug)]
pub enum DfuError {
    Usb(nusb::Error),
    Transfer(nusb::transfer::TransferError),
    Status { status: DfuStatusCode, state: DfuState },
    MalformedStatus,
    DeviceNotFound,
    AmbiguousDevice(usize),
    NoDfuDescriptor,
    VersionMismatch(u16),
    NotInDfuMode(DfuState),
    AbortFailed,
    DetachFailed,
}

impl std::error::Error for DfuError {}

impl std::fmt::Display for DfuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DfuError::Usb(err) => write!(f, "USB error: {}", err),
            DfuError::Transfer(err) => write!(f, "Transfer error: {}", err),
            DfuError::Status { status, state } => {
                write!(f, "device reported {} in state {}", status, state)
            }
            DfuError::MalformedStatus => {
                write!(f, "malformed GETSTATUS response")
            }
            DfuError::DeviceNotFound => write!(f, "no DFU device found"),
            DfuError::AmbiguousDevice(n) => {
                write!(
                    f,
                    "{} DFU devices match, specify vendor/product ID to \
                     disambiguate",
                    n
                )
            }
            DfuError::NoDfuDescriptor => {
                write!(f, "no DFU functional descriptor, not a DFU device?")
            }
            DfuError::VersionMismatch(version) => {
                write!(f, "unsupported bcdDFUVersion {:#06x}", version)
            }
            DfuError::NotInDfuMode(state) => {
                write!(f, "device is still in run-time mode (state {})", state)
            }
            DfuError::AbortFailed => {
                write!(f, "abort of a stale transfer did not return to idle")
            }
            DfuError::DetachFailed => {
                write!(f, "device still in run-time mode after detach")
            }
        }
    }
}

impl From<nusb::Error> for DfuError {
    fn from(err: nusb::Error) -> Self {
        DfuError::Usb(err)
    }
}

impl From<nusb::transfer::TransferError> for DfuError {
    fn from(err: nusb::transfer::TransferError) -> Self {
        DfuError::Transfer(err)
    }
}
