//! Buffer resizing after geometry changes

use log::info;

use crate::capture::CaptureBuffer;
use crate::error::MirrorError;
use crate::sink::{SinkBuffer, SinkDisplay};
use crate::source::SourceDisplay;

/// Which buffers [`reconcile_buffers`] had to resize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resized {
    pub capture: bool,
    pub sink: bool,
}

/// Bring both buffers to the current source geometry.
///
/// Either failure is fatal: the capture buffer is unusable afterwards, or the
/// sink would receive frames of the wrong size.
pub fn reconcile_buffers<S, K>(
    source: &mut S,
    sink: &mut K,
    sink_buffer: &mut K::Buffer,
    capture: &mut CaptureBuffer,
) -> Result<Resized, MirrorError>
where
    S: SourceDisplay,
    K: SinkDisplay,
{
    let geometry = source.geometry();
    let mut resized = Resized::default();

    resized.capture = capture
        .resize(source, geometry.width, geometry.height)
        .map_err(MirrorError::CaptureResize)?;

    if sink_buffer.width() != geometry.width || sink_buffer.height() != geometry.height {
        sink.resize_buffer(sink_buffer, geometry.width, geometry.height)
            .map_err(MirrorError::SinkResize)?;
        resized.sink = true;
    }

    if resized.capture || resized.sink {
        info!("Buffers resized to {}x{}", geometry.width, geometry.height);
    }
    Ok(resized)
}
