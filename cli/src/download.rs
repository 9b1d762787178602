use std::{fs, path::PathBuf, time::Instant};

use dfu::{DfuConfig, open_session};

use crate::CliError;
use crate::progress::ProgressBar;

pub(crate) fn download_file(
    file: &PathBuf,
    config: &DfuConfig,
) -> Result<(), CliError> {
    let data = fs::read(file)?;

    let session = open_session(config)?.into_dfu_mode(config)?;
    let connection = session.connect(config.alt_setting)?;

    println!(
        "Downloading {} bytes to {:04x}:{:04x} ({} bytes per transfer)",
        data.len(),
        session.device().vendor_id(),
        session.device().product_id(),
        connection.transfer_size(),
    );

    let bar = ProgressBar::new(data.len() as u64);
    let start = Instant::now();
    connection.download(&data, |done, _| bar.update(done))?;
    drop(connection);
    println!("Download complete in {:?}", start.elapsed());

    session.finalize(config)?;
    Ok(())
}
