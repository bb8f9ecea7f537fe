//! Memory-mapped file sink
//!
//! The sink pipeline and this process share a file, usually on `/dev/shm`:
//!
//! ```text
//! offset  field
//!  0      magic "MSNK"
//!  4      version (1)
//!  8      native width   (written by the pipeline owner)
//! 12      native height
//! 16      buffer width
//! 20      buffer height
//! 24      stride in bytes
//! 28      pixel format (0 = BGRA32)
//! 32      pixel rows
//! ```
//!
//! All fields are little-endian u32. Writers coordinate with an advisory
//! `flock` on the file.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::{debug, info};
use memmap2::MmapMut;

use super::{SinkBuffer, SinkDisplay, SinkLock};
use crate::error::SinkError;

pub const SINK_MAGIC: u32 = 0x4B4E_534D; // "MSNK"
pub const SINK_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 32;
const FORMAT_BGRA32: u32 = 0;
const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Header {
    native_width: u32,
    native_height: u32,
    width: u32,
    height: u32,
    stride: u32,
    format: u32,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let fields = [
            SINK_MAGIC,
            SINK_VERSION,
            self.native_width,
            self.native_height,
            self.width,
            self.height,
            self.stride,
            self.format,
        ];
        let mut bytes = [0u8; HEADER_LEN];
        for (chunk, field) in bytes.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, SinkError> {
        let field = |index: usize| {
            let at = index * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        if field(0) != SINK_MAGIC {
            return Err(SinkError::BadHeader(format!("bad magic {:#010x}", field(0))));
        }
        if field(1) != SINK_VERSION {
            return Err(SinkError::BadHeader(format!("unsupported version {}", field(1))));
        }
        let header = Self {
            native_width: field(2),
            native_height: field(3),
            width: field(4),
            height: field(5),
            stride: field(6),
            format: field(7),
        };
        if header.format != FORMAT_BGRA32 {
            return Err(SinkError::BadHeader(format!("unsupported format {}", header.format)));
        }
        Ok(header)
    }

    fn read(file: &File) -> Result<Self, SinkError> {
        let mut bytes = [0u8; HEADER_LEN];
        file.read_exact_at(&mut bytes, 0)?;
        Self::decode(&bytes)
    }

    fn write(&self, file: &File) -> Result<(), SinkError> {
        file.write_all_at(&self.encode(), 0)?;
        Ok(())
    }
}

/// Sink display backed by a shared memory-mapped file
#[derive(Debug)]
pub struct MappedSink {
    path: PathBuf,
    file: File,
    native_override: Option<(u32, u32)>,
}

impl MappedSink {
    /// Open the sink file, creating and initializing it when `create` is set.
    ///
    /// `native_override` replaces the native size published in the header.
    pub fn open<P: AsRef<Path>>(
        path: P,
        create: bool,
        native_override: Option<(u32, u32)>,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)?;

        if file.metadata()?.len() < HEADER_LEN as u64 {
            if !create {
                return Err(SinkError::BadHeader(format!(
                    "{} is shorter than the sink header",
                    path.display()
                )));
            }
            let (native_width, native_height) = native_override.unwrap_or((0, 0));
            file.set_len(HEADER_LEN as u64)?;
            Header {
                native_width,
                native_height,
                ..Header::default()
            }
            .write(&file)?;
            info!("Initialized sink file {}", path.display());
        }

        let header = Header::read(&file)?;
        debug!(
            "Opened sink {}: native {}x{}, buffer {}x{}",
            path.display(),
            header.native_width,
            header.native_height,
            header.width,
            header.height
        );

        Ok(Self {
            path,
            file,
            native_override,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size the file for a `width`x`height` buffer, update the header and map it
    fn map(&self, width: u32, height: u32) -> Result<MmapMut, SinkError> {
        if width == 0 || height == 0 {
            return Err(SinkError::InvalidSize { width, height });
        }
        let stride = width as usize * BYTES_PER_PIXEL;
        let stride_field =
            u32::try_from(stride).map_err(|_| SinkError::InvalidSize { width, height })?;

        let mut header = Header::read(&self.file)?;
        header.width = width;
        header.height = height;
        header.stride = stride_field;
        header.format = FORMAT_BGRA32;

        self.file
            .set_len((HEADER_LEN + stride * height as usize) as u64)?;
        header.write(&self.file)?;

        let mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(mmap)
    }

    /// Point `buffer` at a freshly sized mapping.
    ///
    /// Other writers map the same file, so the header rewrite and the size
    /// change happen under the buffer lock. A lock the caller already holds
    /// is kept.
    fn remap(&self, buffer: &mut MappedBuffer, width: u32, height: u32) -> Result<(), SinkError> {
        if buffer.locked {
            return self.remap_locked(buffer, width, height);
        }
        let mut locked = SinkLock::acquire(buffer)?;
        self.remap_locked(&mut locked, width, height)
    }

    fn remap_locked(
        &self,
        buffer: &mut MappedBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), SinkError> {
        // unmap before the file shrinks underneath the mapping
        buffer.mmap = None;
        buffer.mmap = Some(self.map(width, height)?);
        buffer.width = width;
        buffer.height = height;
        buffer.stride = width as usize * BYTES_PER_PIXEL;
        Ok(())
    }
}

impl SinkDisplay for MappedSink {
    type Buffer = MappedBuffer;

    fn native_size(&self) -> Result<(u32, u32), SinkError> {
        if let Some(size) = self.native_override {
            return Ok(size);
        }
        let header = Header::read(&self.file)?;
        if header.native_width == 0 && header.native_height == 0 {
            return Err(SinkError::NativeSizeUnknown);
        }
        Ok((header.native_width, header.native_height))
    }

    fn create_buffer(&mut self, width: u32, height: u32) -> Result<MappedBuffer, SinkError> {
        let mut buffer = MappedBuffer {
            file: self.file.try_clone()?,
            mmap: None,
            width: 0,
            height: 0,
            stride: 0,
            locked: false,
        };
        self.remap(&mut buffer, width, height)?;
        info!("Sink buffer {}x{} at {}", width, height, self.path.display());
        Ok(buffer)
    }

    fn resize_buffer(
        &mut self,
        buffer: &mut MappedBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), SinkError> {
        self.remap(buffer, width, height)?;
        info!("Sink buffer resized to {}x{}", width, height);
        Ok(())
    }
}

/// Pixel area of a [`MappedSink`] file
#[derive(Debug)]
pub struct MappedBuffer {
    file: File,
    /// `None` only after a failed resize
    mmap: Option<MmapMut>,
    width: u32,
    height: u32,
    stride: usize,
    locked: bool,
}

impl MappedBuffer {
    fn flock(&self, operation: libc::c_int) -> Result<(), SinkError> {
        let ret = unsafe { libc::flock(self.file.as_raw_fd(), operation) };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl SinkBuffer for MappedBuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn lock(&mut self) -> Result<(), SinkError> {
        self.flock(libc::LOCK_EX)?;
        self.locked = true;
        Ok(())
    }

    fn unlock(&mut self) -> Result<(), SinkError> {
        self.flock(libc::LOCK_UN)?;
        self.locked = false;
        Ok(())
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        match self.mmap.as_mut() {
            Some(mmap) => &mut mmap[HEADER_LEN..],
            None => &mut [],
        }
    }
}
