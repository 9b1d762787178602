use std::{fs, path::PathBuf, time::Instant};

use dfu::{DfuConfig, open_session};

use crate::CliError;
use crate::progress::ProgressBar;

pub(crate) fn upload_file(
    file: &PathBuf,
    config: &DfuConfig,
) -> Result<(), CliError> {
    let session = open_session(config)?.into_dfu_mode(config)?;
    let connection = session.connect(config.alt_setting)?;

    println!(
        "Uploading from {:04x}:{:04x} ({} bytes per transfer)",
        session.device().vendor_id(),
        session.device().product_id(),
        connection.transfer_size(),
    );

    let bar = ProgressBar::new(config.expected_upload_size);
    let start = Instant::now();
    let data =
        connection.upload(config.expected_upload_size, |done, _| {
            bar.update(done)
        })?;
    drop(connection);
    bar.finish();
    println!("Uploaded {} bytes in {:?}", data.len(), start.elapsed());

    fs::write(file, &data)?;
    session.finalize(config)?;
    Ok(())
}
