use std::any::Any;

use thiserror::Error;

use crate::errors::OverheadSlurpError::*;

#[derive(Error, Debug)]
pub enum OverheadSlurpError {
    #[error("input file `{name:?}` not found")]
    InputFileNotFound { name: String },
    #[error("invalid argument `top` - the value should be strictly positive")]
    InvalidTopPositiveInt,
    #[error("invalid recording - {message}")]
    InvalidRecording { message: String },
    #[error("CLI argument error ({e})")]
    ClapError { e: clap::Error },
    #[error("standard I/O error ({e})")]
    StdIoError { e: std::io::Error },
    #[error("standard thread error ({e:?})")]
    StdThreadError { e: Box<dyn Any + Send + 'static> },
}

impl OverheadSlurpError {
    pub fn invalid_recording(message: impl Into<String>) -> Self {
        InvalidRecording {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for OverheadSlurpError {
    fn from(e: std::io::Error) -> Self {
        StdIoError { e }
    }
}

impl From<clap::Error> for OverheadSlurpError {
    fn from(e: clap::Error) -> Self {
        ClapError { e }
    }
}
