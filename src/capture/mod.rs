//! X11 Screen capture
//!
//! Shared-memory snapshots of the root window and their transfer into the
//! sink buffer.

mod buffer;
pub mod copier;
mod shm;
mod stats;

pub use buffer::CaptureBuffer;
pub use copier::{copy_frame, Snapshot};
pub use shm::ShmSegment;
pub use stats::FrameStats;
