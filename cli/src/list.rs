use dfu::{DeviceFilter, DfuDevice, find_dfu_devices};

use crate::CliError;

pub(crate) fn list_dfu_devices(
    vid: Option<u16>,
    pid: Option<u16>,
) -> Result<(), CliError> {
    let devices = find_dfu_devices(&DeviceFilter::new(vid, pid))?;
    if devices.is_empty() {
        println!("No DFU device found");
    } else {
        print_devices(&devices);
    }
    Ok(())
}

fn print_devices(devices: &[DfuDevice]) {
    for device in devices {
        println!(
            "Bus {} Device {:03}: ID {:04x}:{:04x} (intf={}, {})",
            device.bus_id(),
            device.device_address(),
            device.vendor_id(),
            device.product_id(),
            device.interface_number(),
            if device.in_dfu_mode() {
                "dfu mode"
            } else {
                "run-time"
            },
        );
    }
}
