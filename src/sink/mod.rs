//! Sink display service
//!
//! The pipeline that receives mirrored frames. It owns the destination
//! buffer; we only resize it and write into it while holding its lock.

mod mapped;

pub use mapped::{MappedBuffer, MappedSink};

use std::ops::{Deref, DerefMut};

use log::error;

use crate::error::SinkError;

/// Destination pixel buffer owned by the sink
pub trait SinkBuffer {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Bytes per row
    fn stride(&self) -> usize;

    /// Take the buffer lock shared with other writers (the cursor renderer)
    fn lock(&mut self) -> Result<(), SinkError>;

    fn unlock(&mut self) -> Result<(), SinkError>;

    /// Pixel rows. Only meant to be written while locked.
    fn pixels_mut(&mut self) -> &mut [u8];
}

/// Capabilities the mirror needs from the sink display service
pub trait SinkDisplay {
    type Buffer: SinkBuffer;

    /// Native resolution of the physical display behind the sink
    fn native_size(&self) -> Result<(u32, u32), SinkError>;

    fn create_buffer(&mut self, width: u32, height: u32) -> Result<Self::Buffer, SinkError>;

    fn resize_buffer(
        &mut self,
        buffer: &mut Self::Buffer,
        width: u32,
        height: u32,
    ) -> Result<(), SinkError>;
}

/// Scoped sink buffer lock, released on drop
pub struct SinkLock<'a, B: SinkBuffer> {
    buffer: &'a mut B,
}

impl<'a, B: SinkBuffer> SinkLock<'a, B> {
    pub fn acquire(buffer: &'a mut B) -> Result<Self, SinkError> {
        buffer.lock()?;
        Ok(Self { buffer })
    }
}

impl<B: SinkBuffer> Deref for SinkLock<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.buffer
    }
}

impl<B: SinkBuffer> DerefMut for SinkLock<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.buffer
    }
}

impl<B: SinkBuffer> Drop for SinkLock<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.buffer.unlock() {
            error!("Failed to unlock sink buffer: {}", e);
        }
    }
}
