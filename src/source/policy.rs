//! Handling of source protocol errors
//!
//! The X server reports failed requests asynchronously. A snapshot fetched
//! between a screen size change and our processing of its notification fails
//! with `BadMatch`; that is a race, not a reason to exit.

use log::error;

use crate::error::{ProtocolError, SourceError};

/// Logs protocol errors and keeps going
#[derive(Debug, Default)]
pub struct ErrorPolicy {
    absorbed: u64,
}

impl ErrorPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a protocol error
    pub fn report(&mut self, err: &ProtocolError) {
        self.absorbed += 1;
        error!("{}", err);
    }

    /// Swallow `err` if it is a protocol error, hand it back otherwise
    pub fn absorb(&mut self, err: SourceError) -> Result<(), SourceError> {
        match err {
            SourceError::Protocol(ref protocol) => {
                self.report(protocol);
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Number of protocol errors seen so far
    pub fn absorbed(&self) -> u64 {
        self.absorbed
    }
}
