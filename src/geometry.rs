//! Display geometry, modes and damage bookkeeping
//!
//! Plain value types shared by the source, the sink and the synchronizer.

use std::fmt;

const MM_PER_INCH: f64 = 25.4;

/// Density assumed when the source reports no physical height
const FALLBACK_PPI: f64 = 96.0;

/// A display mode offered by the source display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    /// Opaque mode identifier
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} (mode {})", self.width, self.height, self.id)
    }
}

/// Pixel width/height plus physical size metadata of a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    /// Physical width in millimeters
    pub mm_width: u32,
    /// Physical height in millimeters
    pub mm_height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32, mm_width: u32, mm_height: u32) -> Self {
        Self {
            width,
            height,
            mm_width,
            mm_height,
        }
    }

    /// Pixels per inch along the vertical axis
    pub fn ppi(&self) -> f64 {
        if self.mm_height == 0 {
            return FALLBACK_PPI;
        }
        (MM_PER_INCH * self.height as f64) / self.mm_height as f64
    }

    /// Geometry after switching to `mode`, keeping the current pixel density
    pub fn with_mode(&self, mode: &DisplayMode) -> Geometry {
        let ppi = self.ppi();
        Geometry {
            width: mode.width,
            height: mode.height,
            mm_width: ((MM_PER_INCH * mode.width as f64) / ppi) as u32,
            mm_height: ((MM_PER_INCH * mode.height as f64) / ppi) as u32,
        }
    }

    /// True when pixel dimensions are equal, physical size is ignored
    pub fn same_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {}mmx{}mm",
            self.width, self.height, self.mm_width, self.mm_height
        )
    }
}

/// Layout of one pixel row as the source server writes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    /// Row alignment in bits
    pub scanline_pad: u8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize / 8).max(1)
    }

    /// Bytes per row for `width` pixels, including scanline padding
    pub fn stride(&self, width: u32) -> usize {
        let bits_per_line = width as usize * self.bits_per_pixel as usize;
        let pad = (self.scanline_pad as usize).max(8);
        ((bits_per_line + pad - 1) / pad) * pad / 8
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self {
            bits_per_pixel: 32,
            scanline_pad: 32,
        }
    }
}

/// First mode in enumeration order with exactly the requested size
pub fn find_matching_mode(modes: &[DisplayMode], width: u32, height: u32) -> Option<DisplayMode> {
    modes
        .iter()
        .inspect(|mode| log::debug!("Found supported mode: {}x{}", mode.width, mode.height))
        .find(|mode| mode.width == width && mode.height == height)
        .copied()
}

/// The one output every mode change is applied to.
///
/// Mode application assumes a single CRTC drives the whole screen. Building
/// this value is where that assumption is checked: an empty list is refused,
/// extra entries are reported and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoleOutput<T> {
    item: T,
    ignored: usize,
}

impl<T: Clone + fmt::Debug> SoleOutput<T> {
    pub fn select(items: &[T]) -> Option<Self> {
        let item = items.first()?.clone();
        let ignored = items.len() - 1;
        if ignored > 0 {
            log::warn!(
                "{} outputs present, only {:?} is reconfigured",
                items.len(),
                item
            );
        }
        Some(Self { item, ignored })
    }

    pub fn get(&self) -> &T {
        &self.item
    }

    /// Number of outputs left untouched
    pub fn ignored(&self) -> usize {
        self.ignored
    }
}

/// Pending damage on the captured surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamageRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub pending: bool,
}

impl DamageRegion {
    /// Add a damaged rectangle, growing the region to the bounding union
    pub fn mark(&mut self, x: i32, y: i32, width: u32, height: u32) {
        if !self.pending {
            *self = DamageRegion {
                x,
                y,
                width,
                height,
                pending: true,
            };
            return;
        }

        let right = (self.x + self.width as i32).max(x + width as i32);
        let bottom = (self.y + self.height as i32).max(y + height as i32);
        self.x = self.x.min(x);
        self.y = self.y.min(y);
        self.width = (right - self.x) as u32;
        self.height = (bottom - self.y) as u32;
    }

    /// Clear pending damage, returning what was pending
    pub fn take(&mut self) -> Option<DamageRegion> {
        if !self.pending {
            return None;
        }
        let taken = *self;
        *self = DamageRegion::default();
        Some(taken)
    }
}
