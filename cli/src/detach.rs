use std::thread;

use dfu::{DfuConfig, open_session};

use crate::CliError;

pub(crate) fn detach_device(config: &DfuConfig) -> Result<(), CliError> {
    let session = open_session(config)?;
    {
        let connection = session.connect(config.alt_setting)?;
        connection.detach()?;
    }
    println!(
        "Detach request sent, waiting {:?} for re-enumeration",
        config.detach_delay
    );
    thread::sleep(config.detach_delay);
    Ok(())
}
