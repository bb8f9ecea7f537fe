//! Shared-memory capture buffer
//!
//! Holds the segment the source server writes root window snapshots into.
//! The buffer always matches the last observed source geometry while it is
//! attached.

use log::{debug, error};

use super::copier::Snapshot;
use super::shm::ShmSegment;
use crate::error::CaptureError;
use crate::source::{SegmentId, SourceDisplay};

/// A segment registered with the source server
#[derive(Debug)]
struct Attachment {
    segment: ShmSegment,
    server_id: SegmentId,
}

/// Snapshot target shared with the source display
#[derive(Debug)]
pub struct CaptureBuffer {
    /// `None` once torn down, or after a failed resize
    attachment: Option<Attachment>,

    width: u32,

    height: u32,

    /// Bytes per line
    stride: usize,

    bytes_per_pixel: usize,
}

impl CaptureBuffer {
    /// Allocate a segment sized to the source's current geometry and
    /// register it with the source
    pub fn init<S: SourceDisplay>(source: &mut S) -> Result<Self, CaptureError> {
        let geometry = source.geometry();
        let mut buffer = Self {
            attachment: None,
            width: 0,
            height: 0,
            stride: 0,
            bytes_per_pixel: source.pixel_format().bytes_per_pixel(),
        };
        buffer.attach(source, geometry.width, geometry.height)?;
        Ok(buffer)
    }

    fn attach<S: SourceDisplay>(
        &mut self,
        source: &mut S,
        width: u32,
        height: u32,
    ) -> Result<(), CaptureError> {
        let format = source.pixel_format();
        let stride = format.stride(width);

        let segment = ShmSegment::create(stride * height as usize)
            .map_err(|err| CaptureError::Shm {
                op: "create",
                source: err,
            })?;

        // the segment is released on drop if the server refuses it
        let server_id = source
            .attach_segment(segment.id())
            .map_err(CaptureError::Register)?;

        debug!(
            "XShm segment attached: seg={}, shmid={}, {}x{}, stride={}",
            server_id,
            segment.id(),
            width,
            height,
            stride
        );

        self.attachment = Some(Attachment { segment, server_id });
        self.width = width;
        self.height = height;
        self.stride = stride;
        self.bytes_per_pixel = format.bytes_per_pixel();
        Ok(())
    }

    /// Recreate the segment for a new size. Returns whether anything changed.
    ///
    /// On error the buffer is left without a segment and must not be used.
    pub fn resize<S: SourceDisplay>(
        &mut self,
        source: &mut S,
        width: u32,
        height: u32,
    ) -> Result<bool, CaptureError> {
        if self.attachment.is_some() && self.width == width && self.height == height {
            return Ok(false);
        }

        self.teardown(source);
        self.attach(source, width, height)?;
        Ok(true)
    }

    /// Detach from the source and release the segment
    pub fn teardown<S: SourceDisplay>(&mut self, source: &mut S) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };

        if let Err(e) = source.detach_segment(attachment.server_id) {
            error!("Error detaching shm from X server: {}", e);
        }
        // released whether or not the server let go of it
        drop(attachment.segment);
    }

    /// Have the source write a full frame into the segment
    pub fn fetch<S: SourceDisplay>(&self, source: &mut S) -> Result<Snapshot<'_>, CaptureError> {
        let attachment = self.attachment.as_ref().ok_or(CaptureError::Unusable)?;
        source
            .fetch_snapshot(attachment.server_id, self.width, self.height)
            .map_err(CaptureError::Fetch)?;

        Ok(Snapshot {
            data: attachment.segment.as_slice(),
            width: self.width,
            height: self.height,
            stride: self.stride,
            bytes_per_pixel: self.bytes_per_pixel,
        })
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Get buffer dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}
