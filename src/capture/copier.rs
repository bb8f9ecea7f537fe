//! Row copy from a captured snapshot into a sink buffer
//!
//! Source and destination rows may be padded differently, so the copy goes
//! row by row and never touches the padding.

use std::ops::Range;

use crate::error::CopyError;

/// A full-frame snapshot sitting in capture memory
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per row in `data`
    pub stride: usize,
    pub bytes_per_pixel: usize,
}

impl Snapshot<'_> {
    /// Bytes of pixel data per row, without padding
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }
}

/// Copy the whole snapshot into `dst`, whose rows are `dst_stride` bytes apart.
/// Returns the number of bytes copied.
pub fn copy_frame(dst: &mut [u8], dst_stride: usize, snapshot: &Snapshot<'_>) -> Result<usize, CopyError> {
    copy_rows(
        dst,
        dst_stride,
        snapshot.data,
        snapshot.stride,
        snapshot.row_bytes(),
        0..snapshot.height as usize,
    )
}

/// Copy `row_bytes` bytes of each row in `rows` from `src` to `dst`
pub fn copy_rows(
    dst: &mut [u8],
    dst_stride: usize,
    src: &[u8],
    src_stride: usize,
    row_bytes: usize,
    rows: Range<usize>,
) -> Result<usize, CopyError> {
    if rows.is_empty() || row_bytes == 0 {
        return Ok(0);
    }
    for stride in [src_stride, dst_stride] {
        if stride < row_bytes {
            return Err(CopyError::StrideTooSmall { stride, row_bytes });
        }
    }

    let last = rows.end - 1;
    let src_needed = last * src_stride + row_bytes;
    if src.len() < src_needed {
        return Err(CopyError::SourceTooShort {
            len: src.len(),
            needed: src_needed,
        });
    }
    let dst_needed = last * dst_stride + row_bytes;
    if dst.len() < dst_needed {
        return Err(CopyError::DestinationTooShort {
            len: dst.len(),
            needed: dst_needed,
        });
    }

    for y in rows.clone() {
        let src_row = &src[y * src_stride..y * src_stride + row_bytes];
        let dst_row = &mut dst[y * dst_stride..y * dst_stride + row_bytes];
        dst_row.copy_from_slice(src_row);
    }

    Ok(rows.len() * row_bytes)
}
