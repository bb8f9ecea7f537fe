//! Source display service
//!
//! The windowing display whose root surface is mirrored. The pipeline only
//! talks to it through [`SourceDisplay`]; [`X11Source`] is the real thing.

mod policy;
mod x11;

pub use policy::ErrorPolicy;
pub use x11::X11Source;

use crate::error::{ProtocolError, SourceError};
use crate::geometry::{DisplayMode, Geometry, PixelFormat};

/// Server-side handle of a registered shared-memory segment
pub type SegmentId = u32;

/// An event read from the source connection, already classified
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent<E> {
    /// Part of the root window changed
    Damage { x: i16, y: i16, width: u16, height: u16 },

    /// The screen configuration changed
    GeometryChange(Geometry),

    /// An error for a request whose reply nobody waited on
    ProtocolError(ProtocolError),

    /// Anything else, handed to the cursor subsystem untouched
    Other(E),
}

/// Capabilities the mirror needs from the source display service
pub trait SourceDisplay {
    /// Raw event type forwarded to the cursor subsystem
    type Event;

    /// Locally known screen geometry
    fn geometry(&self) -> Geometry;

    /// Record a geometry the server has confirmed
    fn commit_geometry(&mut self, geometry: Geometry);

    /// Row layout of snapshots written into shared memory
    fn pixel_format(&self) -> PixelFormat;

    /// Ask to be told about screen configuration changes
    fn select_geometry_changes(&mut self) -> Result<(), SourceError>;

    /// Start reporting damage on the root window
    fn track_damage(&mut self) -> Result<(), SourceError>;

    /// Mark all reported damage as repaired
    fn subtract_damage(&mut self) -> Result<(), SourceError>;

    /// Block until the next event
    fn next_event(&mut self) -> Result<SourceEvent<Self::Event>, SourceError>;

    /// Apply every geometry change already queued on the connection,
    /// without blocking. Returns how many were applied.
    fn drain_geometry_changes(&mut self) -> Result<usize, SourceError>;

    /// Block until the next geometry change notification and return it.
    /// Other events stay queued for [`SourceDisplay::next_event`].
    fn wait_geometry_change(&mut self) -> Result<Geometry, SourceError>;

    /// Stop all other clients from touching the display configuration
    fn grab(&mut self) -> Result<(), SourceError>;

    fn ungrab(&mut self) -> Result<(), SourceError>;

    /// Available modes, in server order
    fn modes(&mut self) -> Result<Vec<DisplayMode>, SourceError>;

    /// Switch the sole output to `mode` and resize the screen to `geometry`
    fn apply_mode(&mut self, mode: &DisplayMode, geometry: &Geometry) -> Result<(), SourceError>;

    /// Register a SysV shared-memory segment with the server
    fn attach_segment(&mut self, shmid: i32) -> Result<SegmentId, SourceError>;

    fn detach_segment(&mut self, segment: SegmentId) -> Result<(), SourceError>;

    /// Have the server write a full-frame snapshot of the root window
    /// into a registered segment
    fn fetch_snapshot(
        &mut self,
        segment: SegmentId,
        width: u32,
        height: u32,
    ) -> Result<(), SourceError>;
}
