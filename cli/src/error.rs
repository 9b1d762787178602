use std::{fmt::Display, io};

use dfu::DfuError;

pub enum CliError {
    Io(io::Error),
    Dfu(DfuError),
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        CliError::Io(value)
    }
}

impl From<DfuError> for CliError {
    fn from(value: DfuError) -> Self {
        CliError::Dfu(value)
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Io(err) => write!(f, "IO error: {err}"),
            CliError::Dfu(err) => write!(f, "DFU error: {err}"),
        }
    }
}
