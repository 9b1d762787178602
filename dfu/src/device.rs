use nusb::{self, MaybeFuture};

use crate::connection::{DfuConnection, UsbTransport};
use crate::descriptor::DfuDescriptor;
use crate::error::DfuError;

const DFU_CLASS: u8 = 0xFE;
const DFU_SUBCLASS: u8 = 0x01;

/// `bInterfaceProtocol` of a run-time mode DFU interface
pub const DFU_PROTOCOL_RUNTIME: u8 = 0x01;
/// `bInterfaceProtocol` of a DFU mode interface
pub const DFU_PROTOCOL_DFU: u8 = 0x02;

/// Filter applied during device enumeration.
///
/// `None` fields match anything; a candidate must additionally expose an
/// interface of class 0xFE / subclass 1.
#[derive(Clone, Debug, Default)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub protocol: Option<u8>,
}

impl DeviceFilter {
    pub fn new(vendor_id: Option<u16>, product_id: Option<u16>) -> Self {
        DeviceFilter {
            vendor_id,
            product_id,
            protocol: None,
        }
    }

    fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|id| id == vendor_id)
            && self.product_id.is_none_or(|id| id == product_id)
    }

    fn matches_interface(&self, class: u8, subclass: u8, protocol: u8) -> bool {
        class == DFU_CLASS
            && subclass == DFU_SUBCLASS
            && self.protocol.is_none_or(|p| p == protocol)
    }
}

/// DFU device representation
pub struct DfuDevice {
    dev: nusb::DeviceInfo,
    interface: u8,
    protocol: u8,
}

impl DfuDevice {
    fn from_device_info(
        filter: &DeviceFilter,
        device: nusb::DeviceInfo,
    ) -> Option<Self> {
        let (interface, protocol) = device
            .interfaces()
            .find(|i| {
                filter.matches_interface(i.class(), i.subclass(), i.protocol())
            })
            .map(|i| (i.interface_number(), i.protocol()))?;
        Some(DfuDevice {
            dev: device,
            interface,
            protocol,
        })
    }

    pub fn device_info(&self) -> &nusb::DeviceInfo {
        &self.dev
    }

    pub fn bus_id(&self) -> &str {
        self.dev.bus_id()
    }

    pub fn device_address(&self) -> u8 {
        self.dev.device_address()
    }

    pub fn vendor_id(&self) -> u16 {
        self.dev.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.dev.product_id()
    }

    /// Interface number of the first DFU interface found
    pub fn interface_number(&self) -> u8 {
        self.interface
    }

    /// `true` once the bootloader is running, i.e. the DFU interface
    /// advertises protocol 2 instead of the run-time protocol 1.
    pub fn in_dfu_mode(&self) -> bool {
        self.protocol == DFU_PROTOCOL_DFU
    }

    pub(crate) fn open(&self) -> Result<nusb::Device, DfuError> {
        Ok(self.dev.open().wait()?)
    }

    /// Query the DFU functional descriptor for this device, searching every
    /// configuration and interface alternate setting. `None` means the
    /// device carries no such descriptor.
    pub fn dfu_descriptor(&self) -> Result<Option<DfuDescriptor>, DfuError> {
        let open_dev = self.open()?;
        Ok(open_dev.configurations().find_map(|config| {
            config.interface_alt_settings().find_map(|alt_setting| {
                alt_setting
                    .descriptors()
                    .find_map(|desc| DfuDescriptor::from_bytes(&desc))
            })
        }))
    }

    /// Claim the DFU interface and select an alternate setting.
    ///
    /// The claim is exclusive and held by the returned connection; dropping
    /// the connection releases it on every exit path.
    pub fn connect(
        &self,
        interface: u8,
        alt_setting: u8,
        transfer_size: u16,
    ) -> Result<DfuConnection<UsbTransport>, DfuError> {
        let dev = self.open()?;
        if dev.active_configuration().is_err() {
            let config = dev
                .configurations()
                .next()
                .map(|c| c.configuration_value())
                .unwrap_or(1);
            log::debug!("no active configuration, selecting {config}");
            dev.set_configuration(config).wait()?;
        }
        log::debug!("claiming interface {interface} (alt {alt_setting})");
        let intf = dev.claim_interface(interface).wait()?;
        intf.set_alt_setting(alt_setting).wait()?;
        Ok(DfuConnection::new(UsbTransport::new(intf), transfer_size))
    }

    /// Host-initiated USB reset, used after a final detach when the device
    /// does not advertise `bitWillDetach`.
    pub fn usb_reset(&self) -> Result<(), DfuError> {
        Ok(self.open()?.reset().wait()?)
    }
}

/// Enumerate attached DFU-capable devices matching `filter`, in host
/// enumeration order. Read-only: devices are not opened or touched.
pub fn find_dfu_devices(
    filter: &DeviceFilter,
) -> Result<Vec<DfuDevice>, DfuError> {
    Ok(nusb::list_devices()
        .wait()?
        .filter(|dev| filter.matches_ids(dev.vendor_id(), dev.product_id()))
        .filter_map(|dev| DfuDevice::from_device_info(filter, dev))
        .collect())
}

/// Find exactly one matching device. More than one match is a hard error;
/// the caller has to narrow the filter rather than have us guess.
pub fn find_dfu_device(filter: &DeviceFilter) -> Result<DfuDevice, DfuError> {
    select_single(find_dfu_devices(filter)?)
}

fn select_single<T>(mut devices: Vec<T>) -> Result<T, DfuError> {
    match devices.len() {
        0 => Err(DfuError::DeviceNotFound),
        1 => Ok(devices.remove(0)),
        n => Err(DfuError::AmbiguousDevice(n)),
    }
}
