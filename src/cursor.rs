//! Cursor subsystem boundary
//!
//! Events the mirror does not handle itself (cursor changes, pointer input)
//! are handed to a [`CursorClient`]. [`XFixesCursor`] tracks the displayed
//! cursor through XFIXES and keeps recently seen cursor images around.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xfixes::{ConnectionExt as XFixesConnectionExt, CursorNotify, CursorNotifyMask};
use x11rb::protocol::xproto::{ChangeWindowAttributesAux, ConnectionExt, EventMask, Window};
use x11rb::protocol::Event;
use x11rb::xcb_ffi::XCBConnection;

use crate::error::SourceError;
use crate::source::X11Source;

/// Receiver for events the mirror forwards untouched
pub trait CursorClient<E> {
    fn on_event(&mut self, event: &E);

    /// Drop every cached cursor image
    fn teardown_cache(&mut self);
}

impl<E, C: CursorClient<E>> CursorClient<E> for Option<C> {
    fn on_event(&mut self, event: &E) {
        if let Some(client) = self {
            client.on_event(event);
        }
    }

    fn teardown_cache(&mut self) {
        if let Some(client) = self {
            client.teardown_cache();
        }
    }
}

/// A cursor image as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    pub serial: u32,
    pub width: u16,
    pub height: u16,
    pub xhot: u16,
    pub yhot: u16,
    /// ARGB pixels, row major
    pub pixels: Vec<u32>,
}

/// Cursor images keyed by serial, oldest evicted first
#[derive(Debug)]
pub struct CursorCache {
    capacity: usize,
    images: HashMap<u32, CursorImage>,
    order: VecDeque<u32>,
}

impl CursorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            images: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, image: CursorImage) {
        let serial = image.serial;
        if self.images.insert(serial, image).is_some() {
            return;
        }
        self.order.push_back(serial);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.images.remove(&oldest);
            }
        }
    }

    pub fn get(&self, serial: u32) -> Option<&CursorImage> {
        self.images.get(&serial)
    }

    pub fn contains(&self, serial: u32) -> bool {
        self.images.contains_key(&serial)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.order.clear();
    }
}

/// Tracks the displayed cursor of the source screen
pub struct XFixesCursor {
    conn: Arc<XCBConnection>,
    root: Window,
    cache: CursorCache,
    current: Option<u32>,
    position: (i16, i16),
}

impl XFixesCursor {
    /// Subscribe to cursor changes and pointer motion on the source's root
    /// window
    pub fn init(source: &X11Source, cache_capacity: usize) -> Result<Self, SourceError> {
        let conn = source.connection();
        let root = source.root();
        conn.xfixes_select_cursor_input(root, CursorNotifyMask::DISPLAY_CURSOR)?
            .check()?;
        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::POINTER_MOTION),
        )?
        .check()?;
        conn.flush()?;

        Ok(Self {
            conn,
            root,
            cache: CursorCache::new(cache_capacity),
            current: None,
            position: (0, 0),
        })
    }

    /// Image of the cursor currently displayed, if known
    pub fn current(&self) -> Option<&CursorImage> {
        self.current.and_then(|serial| self.cache.get(serial))
    }

    /// Last known pointer position in root coordinates
    pub fn position(&self) -> (i16, i16) {
        self.position
    }

    fn refresh(&mut self, serial: u32) -> Result<(), SourceError> {
        let serial = if self.cache.contains(serial) {
            serial
        } else {
            let reply = self.conn.xfixes_get_cursor_image()?.reply()?;
            debug!(
                "Caching cursor serial={} {}x{} hotspot=({},{})",
                reply.cursor_serial, reply.width, reply.height, reply.xhot, reply.yhot
            );
            let image = CursorImage {
                serial: reply.cursor_serial,
                width: reply.width,
                height: reply.height,
                xhot: reply.xhot,
                yhot: reply.yhot,
                pixels: reply.cursor_image,
            };
            let serial = image.serial;
            self.cache.insert(image);
            serial
        };
        self.current = Some(serial);

        let pointer = self.conn.query_pointer(self.root)?.reply()?;
        self.position = (pointer.root_x, pointer.root_y);
        if let Some(image) = self.current() {
            let (x, y) = self.position();
            debug!(
                "Cursor serial={} {}x{} at ({},{})",
                image.serial, image.width, image.height, x, y
            );
        }
        Ok(())
    }
}

impl CursorClient<Event> for XFixesCursor {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::XfixesCursorNotify(ev) if ev.subtype == CursorNotify::DISPLAY_CURSOR => {
                if let Err(e) = self.refresh(ev.cursor_serial) {
                    warn!("Failed to refresh cursor: {}", e);
                }
            }
            other => {
                if let Some(position) = motion_position(other) {
                    self.position = position;
                }
            }
        }
    }

    fn teardown_cache(&mut self) {
        debug!("Dropping {} cached cursor images", self.cache.len());
        self.cache.clear();
        self.current = None;
    }
}

/// Root coordinates carried by a pointer motion event
fn motion_position(event: &Event) -> Option<(i16, i16)> {
    match event {
        Event::MotionNotify(ev) => Some((ev.root_x, ev.root_y)),
        _ => None,
    }
}
