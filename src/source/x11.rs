//! X11 source display
//!
//! Root window capture over MIT-SHM, change tracking with DAMAGE and screen
//! configuration through RandR.

use std::collections::VecDeque;
use std::ffi::CString;
use std::sync::Arc;

use log::{debug, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::damage::{self, ConnectionExt as DamageConnectionExt};
use x11rb::protocol::randr::{self, ConnectionExt as RandrConnectionExt};
use x11rb::protocol::shm::{self, ConnectionExt as ShmConnectionExt};
use x11rb::protocol::xfixes::{self, ConnectionExt as XFixesConnectionExt};
use x11rb::protocol::xproto::{ConnectionExt, ImageFormat, Setup, Window};
use x11rb::protocol::Event;
use x11rb::xcb_ffi::XCBConnection;
use x11rb::{CURRENT_TIME, NONE};

use super::{SegmentId, SourceDisplay, SourceEvent};
use crate::error::{ProtocolError, SourceError};
use crate::geometry::{DisplayMode, Geometry, PixelFormat, SoleOutput};

/// Source display backed by an X server
pub struct X11Source {
    /// XCB connection
    conn: Arc<XCBConnection>,

    /// Root window of the mirrored screen
    root: Window,

    /// Geometry as of the last processed screen change
    geometry: Geometry,

    /// Root window pixel layout
    format: PixelFormat,

    /// Events read while looking for something else
    backlog: VecDeque<Event>,

    /// Damage object on the root window
    damage: Option<damage::Damage>,
}

impl X11Source {
    /// Connect to `display` (or `$DISPLAY`) and check the required extensions
    pub fn connect(display: Option<&str>, screen: Option<usize>) -> Result<Self, SourceError> {
        let display_cstr = display
            .map(|name| CString::new(name).map_err(|e| SourceError::InvalidDisplay(e.to_string())))
            .transpose()?;
        let (conn, default_screen) = XCBConnection::connect(display_cstr.as_deref())?;
        let screen_num = screen.unwrap_or(default_screen);

        require_extension(&conn, shm::X11_EXTENSION_NAME)?;
        require_extension(&conn, damage::X11_EXTENSION_NAME)?;
        require_extension(&conn, randr::X11_EXTENSION_NAME)?;
        require_extension(&conn, xfixes::X11_EXTENSION_NAME)?;

        // DAMAGE and XFIXES refuse requests until the version is negotiated
        conn.shm_query_version()?.reply()?;
        conn.damage_query_version(1, 1)?.reply()?;
        let randr_version = conn.randr_query_version(1, 2)?.reply()?;
        conn.xfixes_query_version(5, 0)?.reply()?;
        debug!(
            "RandR {}.{}",
            randr_version.major_version, randr_version.minor_version
        );

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or(SourceError::NoScreen(screen_num))?;
        let root = screen.root;
        let geometry = Geometry::new(
            screen.width_in_pixels as u32,
            screen.height_in_pixels as u32,
            screen.width_in_millimeters as u32,
            screen.height_in_millimeters as u32,
        );
        let format = root_pixel_format(conn.setup(), screen.root_depth)
            .ok_or(SourceError::UnsupportedFormat(screen.root_depth))?;
        if format.bits_per_pixel != 32 {
            return Err(SourceError::UnsupportedFormat(format.bits_per_pixel));
        }

        info!("Initial screen config: {}", geometry);

        Ok(Self {
            conn: Arc::new(conn),
            root,
            geometry,
            format,
            backlog: VecDeque::new(),
            damage: None,
        })
    }

    /// Shared connection, for the cursor subsystem
    pub fn connection(&self) -> Arc<XCBConnection> {
        Arc::clone(&self.conn)
    }

    pub fn root(&self) -> Window {
        self.root
    }

    fn next_raw_event(&mut self) -> Result<Event, SourceError> {
        match self.backlog.pop_front() {
            Some(event) => Ok(event),
            None => Ok(self.conn.wait_for_event()?),
        }
    }

    fn set_screen_size(&self, geometry: &Geometry) -> Result<(), SourceError> {
        info!("Setting screen size to {}", geometry);
        self.conn
            .randr_set_screen_size(
                self.root,
                geometry.width as u16,
                geometry.height as u16,
                geometry.mm_width,
                geometry.mm_height,
            )?
            .check()?;
        Ok(())
    }
}

impl SourceDisplay for X11Source {
    type Event = Event;

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
        self.conn
            .randr_select_input(self.root, randr::NotifyMask::SCREEN_CHANGE)?
            .check()?;
        Ok(())
    }

    fn track_damage(&mut self) -> Result<(), SourceError> {
        if self.damage.is_some() {
            return Ok(());
        }
        // one notification per non-empty damage region, until subtracted
        let damage = self.conn.generate_id()?;
        self.conn
            .damage_create(damage, self.root, damage::ReportLevel::NON_EMPTY)?
            .check()?;
        self.damage = Some(damage);
        Ok(())
    }

    fn subtract_damage(&mut self) -> Result<(), SourceError> {
        if let Some(damage) = self.damage {
            self.conn.damage_subtract(damage, NONE, NONE)?;
        }
        Ok(())
    }

    fn next_event(&mut self) -> Result<SourceEvent<Event>, SourceError> {
        let event = match self.next_raw_event()? {
            Event::DamageNotify(ev) => SourceEvent::Damage {
                x: ev.area.x,
                y: ev.area.y,
                width: ev.area.width,
                height: ev.area.height,
            },
            Event::RandrScreenChangeNotify(ev) => {
                SourceEvent::GeometryChange(screen_change_geometry(&ev))
            }
            Event::Error(err) => SourceEvent::ProtocolError(ProtocolError::from(&err)),
            other => SourceEvent::Other(other),
        };
        Ok(event)
    }

    fn drain_geometry_changes(&mut self) -> Result<usize, SourceError> {
        while let Some(event) = self.conn.poll_for_event()? {
            self.backlog.push_back(event);
        }

        let mut applied = 0;
        let pending = std::mem::take(&mut self.backlog);
        for event in pending {
            match event {
                Event::RandrScreenChangeNotify(ev) => {
                    let geometry = screen_change_geometry(&ev);
                    debug!("Applying queued screen change to {}", geometry);
                    self.geometry = geometry;
                    applied += 1;
                }
                other => self.backlog.push_back(other),
            }
        }
        Ok(applied)
    }

    fn wait_geometry_change(&mut self) -> Result<Geometry, SourceError> {
        let queued = self
            .backlog
            .iter()
            .position(|event| matches!(event, Event::RandrScreenChangeNotify(_)));
        if let Some(Event::RandrScreenChangeNotify(ev)) =
            queued.and_then(|index| self.backlog.remove(index))
        {
            return Ok(screen_change_geometry(&ev));
        }

        loop {
            match self.conn.wait_for_event()? {
                Event::RandrScreenChangeNotify(ev) => {
                    debug!("[t={}] screen change notification", ev.timestamp);
                    return Ok(screen_change_geometry(&ev));
                }
                other => self.backlog.push_back(other),
            }
        }
    }

    fn grab(&mut self) -> Result<(), SourceError> {
        self.conn.grab_server()?;
        self.conn.flush()?;
        Ok(())
    }

    fn ungrab(&mut self) -> Result<(), SourceError> {
        self.conn.ungrab_server()?;
        self.conn.flush()?;
        Ok(())
    }

    fn modes(&mut self) -> Result<Vec<DisplayMode>, SourceError> {
        let resources = self
            .conn
            .randr_get_screen_resources(self.root)?
            .reply()?;
        Ok(resources
            .modes
            .iter()
            .map(|mode| DisplayMode {
                id: mode.id,
                width: mode.width as u32,
                height: mode.height as u32,
            })
            .collect())
    }

    fn apply_mode(&mut self, mode: &DisplayMode, geometry: &Geometry) -> Result<(), SourceError> {
        let resources = self
            .conn
            .randr_get_screen_resources(self.root)?
            .reply()?;
        let crtc = SoleOutput::select(&resources.crtcs).ok_or(SourceError::NoOutput)?;
        let crtc_info = self
            .conn
            .randr_get_crtc_info(*crtc.get(), resources.config_timestamp)?
            .reply()?;

        // A CRTC may not scan out past the screen edge, so grow the screen
        // before switching to a larger mode.
        let current = self.geometry;
        if mode.width > current.width || mode.height > current.height {
            let interim = current.with_mode(&DisplayMode {
                id: mode.id,
                width: mode.width.max(current.width),
                height: mode.height.max(current.height),
            });
            self.set_screen_size(&interim)?;
        }

        let reply = self
            .conn
            .randr_set_crtc_config(
                *crtc.get(),
                CURRENT_TIME,
                resources.config_timestamp,
                0,
                0,
                mode.id,
                randr::Rotation::ROTATE0,
                &crtc_info.outputs,
            )?
            .reply()?;
        if reply.status != randr::SetConfig::SUCCESS {
            return Err(SourceError::ConfigRejected(format!("{:?}", reply.status)));
        }

        self.set_screen_size(geometry)?;
        self.conn.flush()?;
        Ok(())
    }

    fn attach_segment(&mut self, shmid: i32) -> Result<SegmentId, SourceError> {
        let segment = self.conn.generate_id()?;
        self.conn.shm_attach(segment, shmid as u32, false)?.check()?;
        Ok(segment)
    }

    fn detach_segment(&mut self, segment: SegmentId) -> Result<(), SourceError> {
        self.conn.shm_detach(segment)?.check()?;
        Ok(())
    }

    fn fetch_snapshot(
        &mut self,
        segment: SegmentId,
        width: u32,
        height: u32,
    ) -> Result<(), SourceError> {
        self.conn
            .shm_get_image(
                self.root,
                0,
                0,
                width as u16,
                height as u16,
                u32::MAX,
                u8::from(ImageFormat::Z_PIXMAP),
                segment,
                0,
            )?
            .reply()?;
        Ok(())
    }
}

impl Drop for X11Source {
    fn drop(&mut self) {
        if let Some(damage) = self.damage.take() {
            let _ = self.conn.damage_destroy(damage);
            let _ = self.conn.flush();
        }
    }
}

fn require_extension(conn: &XCBConnection, name: &'static str) -> Result<(), SourceError> {
    match conn.extension_information(name)? {
        Some(_) => Ok(()),
        None => Err(SourceError::MissingExtension(name)),
    }
}

fn screen_change_geometry(ev: &randr::ScreenChangeNotifyEvent) -> Geometry {
    Geometry::new(
        ev.width as u32,
        ev.height as u32,
        ev.mwidth as u32,
        ev.mheight as u32,
    )
}

fn root_pixel_format(setup: &Setup, depth: u8) -> Option<PixelFormat> {
    setup
        .pixmap_formats
        .iter()
        .find(|format| format.depth == depth)
        .map(|format| PixelFormat {
            bits_per_pixel: format.bits_per_pixel,
            scanline_pad: format.scanline_pad,
        })
}
