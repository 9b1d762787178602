use std::{fs, path::PathBuf};

use rand::RngCore;

use crate::CliError;

pub(crate) fn generate_random_file(
    file: &PathBuf,
    size: u64,
) -> Result<(), CliError> {
    let mut data = vec![0u8; size as usize];
    rand::rng().fill_bytes(&mut data);
    fs::write(file, &data)?;
    println!("Generated '{}' ({} bytes)", file.display(), size);
    Ok(())
}
