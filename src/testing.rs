//! In-memory source, sink and cursor used by unit tests

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use x11rb::errors::ConnectionError;

use crate::cursor::CursorClient;
use crate::error::{ProtocolError, SinkError, SourceError};
use crate::geometry::{DisplayMode, Geometry, PixelFormat};
use crate::sink::{SinkBuffer, SinkDisplay};
use crate::source::{SegmentId, SourceDisplay, SourceEvent};

/// Calls made on [`FakeSource`], in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SelectGeometryChanges,
    TrackDamage,
    SubtractDamage,
    Grab,
    Ungrab,
    Modes,
    ApplyMode(DisplayMode, Geometry),
    Attach(i32),
    Detach(SegmentId),
    Fetch(u32, u32),
}

pub fn bad_match() -> ProtocolError {
    ProtocolError {
        kind: "Match".to_string(),
        major_opcode: 130,
        minor_opcode: 4,
        sequence: 1,
        request: Some("ShmGetImage"),
    }
}

fn disconnected() -> SourceError {
    SourceError::Connection(ConnectionError::IoError(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "fake source closed",
    )))
}

pub fn mode(id: u32, width: u32, height: u32) -> DisplayMode {
    DisplayMode { id, width, height }
}

/// Scripted source display
pub struct FakeSource {
    pub geometry: Geometry,
    pub format: PixelFormat,
    pub modes: Vec<DisplayMode>,
    /// Returned by `next_event`, in order
    pub events: VecDeque<SourceEvent<u32>>,
    /// Already queued when a synchronization starts
    pub queued_changes: VecDeque<Geometry>,
    /// Returned by `wait_geometry_change`, in order
    pub notifications: VecDeque<Geometry>,
    /// Queue a matching notification whenever a mode is applied
    pub confirm_applied: bool,
    pub fail_apply: bool,
    pub fail_attach: bool,
    pub fail_detach: bool,
    /// Number of upcoming snapshot fetches that fail with a protocol error
    pub fetch_failures: u32,
    /// Delivered while the next snapshot is being fetched, one per fetch
    pub events_on_fetch: VecDeque<SourceEvent<u32>>,
    pub calls: Vec<Call>,
    next_segment: SegmentId,
}

impl FakeSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            geometry: Geometry::new(width, height, width / 4, height / 4),
            format: PixelFormat::default(),
            modes: Vec::new(),
            events: VecDeque::new(),
            queued_changes: VecDeque::new(),
            notifications: VecDeque::new(),
            confirm_applied: true,
            fail_apply: false,
            fail_attach: false,
            fail_detach: false,
            fetch_failures: 0,
            events_on_fetch: VecDeque::new(),
            calls: Vec::new(),
            next_segment: 1,
        }
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn count_matching(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| predicate(c)).count()
    }
}

impl SourceDisplay for FakeSource {
    type Event = u32;

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn commit_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn select_geometry_changes(&mut self) -> Result<(), SourceError> {
        self.calls.push(Call::SelectGeometryChanges);
        Ok(())
    }

    fn track_damage(&mut self) -> Result<(), SourceError> {
        self.calls.push(Call::TrackDamage);
        Ok(())
    }

    fn subtract_damage(&mut self) -> Result<(), SourceError> {
        self.calls.push(Call::SubtractDamage);
        Ok(())
    }

    fn next_event(&mut self) -> Result<SourceEvent<u32>, SourceError> {
        self.events.pop_front().ok_or_else(disconnected)
    }

    fn drain_geometry_changes(&mut self) -> Result<usize, SourceError> {
        let mut applied = 0;
        while let Some(geometry) = self.queued_changes.pop_front() {
            self.geometry = geometry;
            applied += 1;
        }
        Ok(applied)
    }

    fn wait_geometry_change(&mut self) -> Result<Geometry, SourceError> {
        self.notifications.pop_front().ok_or_else(disconnected)
    }

    fn grab(&mut self) -> Result<(), SourceError> {
        self.calls.push(Call::Grab);
        Ok(())
    }

    fn ungrab(&mut self) -> Result<(), SourceError> {
        self.calls.push(Call::Ungrab);
        Ok(())
    }

    fn modes(&mut self) -> Result<Vec<DisplayMode>, SourceError> {
        self.calls.push(Call::Modes);
        Ok(self.modes.clone())
    }

    fn apply_mode(&mut self, mode: &DisplayMode, geometry: &Geometry) -> Result<(), SourceError> {
        self.calls.push(Call::ApplyMode(*mode, *geometry));
        if self.fail_apply {
            return Err(SourceError::ConfigRejected("Failed".to_string()));
        }
        if self.confirm_applied {
            self.notifications.push_back(*geometry);
        }
        Ok(())
    }

    fn attach_segment(&mut self, shmid: i32) -> Result<SegmentId, SourceError> {
        self.calls.push(Call::Attach(shmid));
        if self.fail_attach {
            return Err(SourceError::Protocol(bad_match()));
        }
        let segment = self.next_segment;
        self.next_segment += 1;
        Ok(segment)
    }

    fn detach_segment(&mut self, segment: SegmentId) -> Result<(), SourceError> {
        self.calls.push(Call::Detach(segment));
        if self.fail_detach {
            return Err(SourceError::Protocol(bad_match()));
        }
        Ok(())
    }

    fn fetch_snapshot(
        &mut self,
        _segment: SegmentId,
        width: u32,
        height: u32,
    ) -> Result<(), SourceError> {
        self.calls.push(Call::Fetch(width, height));
        if let Some(event) = self.events_on_fetch.pop_front() {
            self.events.push_back(event);
        }
        if self.fetch_failures > 0 {
            self.fetch_failures -= 1;
            return Err(SourceError::Protocol(bad_match()));
        }
        Ok(())
    }
}

/// Heap-backed sink buffer that counts lock/unlock calls
#[derive(Debug)]
pub struct FakeBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub locked: bool,
    pub locks: u32,
    pub unlocks: u32,
}

impl FakeBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
            locked: false,
            locks: 0,
            unlocks: 0,
        }
    }
}

impl SinkBuffer for FakeBuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn stride(&self) -> usize {
        self.width as usize * 4
    }

    fn lock(&mut self) -> Result<(), SinkError> {
        assert!(!self.locked, "sink buffer locked twice");
        self.locked = true;
        self.locks += 1;
        Ok(())
    }

    fn unlock(&mut self) -> Result<(), SinkError> {
        assert!(self.locked, "sink buffer unlocked while not locked");
        self.locked = false;
        self.unlocks += 1;
        Ok(())
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}

/// Sink with a configurable native size
#[derive(Debug, Default)]
pub struct FakeSink {
    pub native: Option<(u32, u32)>,
    pub fail_resize: bool,
    pub resizes: u32,
}

impl FakeSink {
    pub fn native(width: u32, height: u32) -> Self {
        Self {
            native: Some((width, height)),
            ..Self::default()
        }
    }
}

impl SinkDisplay for FakeSink {
    type Buffer = FakeBuffer;

    fn native_size(&self) -> Result<(u32, u32), SinkError> {
        self.native.ok_or(SinkError::NativeSizeUnknown)
    }

    fn create_buffer(&mut self, width: u32, height: u32) -> Result<FakeBuffer, SinkError> {
        Ok(FakeBuffer::new(width, height))
    }

    fn resize_buffer(
        &mut self,
        buffer: &mut FakeBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), SinkError> {
        if self.fail_resize {
            return Err(SinkError::InvalidSize { width, height });
        }
        self.resizes += 1;
        *buffer = FakeBuffer::new(width, height);
        Ok(())
    }
}

/// Cursor client that records what it was given
#[derive(Debug, Clone, Default)]
pub struct RecordingCursor {
    pub events: Rc<RefCell<Vec<u32>>>,
    pub torn_down: Rc<Cell<u32>>,
}

impl CursorClient<u32> for RecordingCursor {
    fn on_event(&mut self, event: &u32) {
        self.events.borrow_mut().push(*event);
    }

    fn teardown_cache(&mut self) {
        self.torn_down.set(self.torn_down.get() + 1);
    }
}
