use std::thread;
use std::time::Duration;

use crate::connection::{DfuConnection, UsbTransport};
use crate::descriptor::{DFU_VERSION_NUMBER, DfuDescriptor};
use crate::device::{DeviceFilter, DfuDevice, find_dfu_device};
use crate::error::DfuError;
use crate::{DEFAULT_DETACH_DELAY, DEFAULT_UPLOAD_SIZE};

/// Everything a session needs to know, resolved from CLI arguments once
/// instead of consulted ad hoc.
#[derive(Clone, Debug)]
pub struct DfuConfig {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// DFU interface number; `None` auto-detects from the descriptors.
    pub interface: Option<u8>,
    pub alt_setting: u8,
    /// Bytes per DNLOAD/UPLOAD transaction; 0 takes the descriptor value.
    pub transfer_size: u16,
    /// Expected upload size, bounds progress reporting only.
    pub expected_upload_size: u64,
    /// Time to wait for re-enumeration after a DETACH.
    pub detach_delay: Duration,
    /// Detach (and reset, unless the device detaches itself) afterwards.
    pub final_reset: bool,
    /// Reject devices whose bcdDFUVersion is not 0x0101.
    pub strict_version: bool,
}

impl Default for DfuConfig {
    fn default() -> Self {
        DfuConfig {
            vendor_id: None,
            product_id: None,
            interface: None,
            alt_setting: 0,
            transfer_size: 0,
            expected_upload_size: DEFAULT_UPLOAD_SIZE,
            detach_delay: DEFAULT_DETACH_DELAY,
            final_reset: false,
            strict_version: false,
        }
    }
}

impl DfuConfig {
    fn filter(&self) -> DeviceFilter {
        DeviceFilter::new(self.vendor_id, self.product_id)
    }
}

/// A selected device together with its parsed functional descriptor and the
/// negotiated interface/transfer size.
pub struct DfuSession {
    device: DfuDevice,
    descriptor: DfuDescriptor,
    interface: u8,
    transfer_size: u16,
}

/// Discover and validate the single matching device.
///
/// Fails if zero or more than one device matches, if the device carries no
/// DFU functional descriptor, or (in strict mode) on a version mismatch.
pub fn open_session(config: &DfuConfig) -> Result<DfuSession, DfuError> {
    let device = find_dfu_device(&config.filter())?;
    let descriptor =
        device.dfu_descriptor()?.ok_or(DfuError::NoDfuDescriptor)?;

    log::debug!(
        "DFU functional descriptor: bcdDFUVersion={:#06x} \
         wDetachTimeOut={} wTransferSize={} canDnload={} canUpload={} \
         manifestationTolerant={} willDetach={}",
        descriptor.dfu_version(),
        descriptor.detach_timeout(),
        descriptor.transfer_size(),
        descriptor.can_download(),
        descriptor.can_upload(),
        descriptor.manifestation_tolerant(),
        descriptor.will_detach(),
    );

    if config.strict_version && descriptor.dfu_version() != DFU_VERSION_NUMBER
    {
        return Err(DfuError::VersionMismatch(descriptor.dfu_version()));
    }

    let transfer_size = if config.transfer_size > 0 {
        config.transfer_size
    } else {
        descriptor.transfer_size()
    };
    let interface = config.interface.unwrap_or(device.interface_number());

    Ok(DfuSession {
        device,
        descriptor,
        interface,
        transfer_size,
    })
}

impl DfuSession {
    pub fn device(&self) -> &DfuDevice {
        &self.device
    }

    pub fn descriptor(&self) -> &DfuDescriptor {
        &self.descriptor
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn transfer_size(&self) -> u16 {
        self.transfer_size
    }

    pub fn in_dfu_mode(&self) -> bool {
        self.device.in_dfu_mode()
    }

    /// Claim the DFU interface for protocol requests.
    pub fn connect(
        &self,
        alt_setting: u8,
    ) -> Result<DfuConnection<UsbTransport>, DfuError> {
        self.device.connect(self.interface, alt_setting, self.transfer_size)
    }

    /// Move a run-time mode device into DFU mode.
    ///
    /// Sends DETACH, releases the interface, waits out the detach delay and
    /// re-runs discovery. Consumes the session: the device re-enumerates and
    /// the old handle is gone. No-op if the device is already in DFU mode.
    pub fn into_dfu_mode(
        self,
        config: &DfuConfig,
    ) -> Result<DfuSession, DfuError> {
        if self.in_dfu_mode() {
            return Ok(self);
        }
        log::info!("device is in run-time mode, requesting detach");

        let must_detach;
        {
            let connection = self.connect(config.alt_setting)?;
            let status = connection.get_status()?;
            thread::sleep(Duration::from_millis(status.poll_timeout as u64));
            if !status.is_ok() {
                connection.clear_status()?;
            }
            must_detach = status.state.is_run_time();
            if must_detach {
                connection.detach()?;
            }
        } // interface released before the device drops off the bus

        if !must_detach {
            return Ok(self);
        }

        log::info!(
            "waiting {:?} for the device to re-enumerate",
            config.detach_delay
        );
        thread::sleep(config.detach_delay);

        let session = open_session(config)?;
        if !session.in_dfu_mode() {
            return Err(DfuError::DetachFailed);
        }
        Ok(session)
    }

    /// Optional post-operation detach, returning the device to its
    /// application firmware. Devices that do not advertise `bitWillDetach`
    /// get a host-initiated USB reset instead of re-attaching on their own.
    pub fn finalize(&self, config: &DfuConfig) -> Result<(), DfuError> {
        if !config.final_reset {
            return Ok(());
        }
        {
            let connection = self.connect(config.alt_setting)?;
            connection.detach()?;
        }
        log::info!("detach sent, waiting {:?}", config.detach_delay);
        thread::sleep(config.detach_delay);

        if !self.descriptor.will_detach() {
            log::info!("device will not detach on its own, issuing USB reset");
            self.device.usb_reset()?;
        }
        Ok(())
    }
}
