//! Resolution synchronization
//!
//! Brings the source screen to the sink's native resolution. Other clients
//! (session daemons restoring saved layouts, users in display settings) may
//! change the configuration at any time, so the work happens under a server
//! grab and every comparison uses freshly drained state.

use std::ops::{Deref, DerefMut};

use log::{debug, error, info};

use crate::error::{SourceError, SyncError};
use crate::geometry::{find_matching_mode, DisplayMode};
use crate::sink::SinkDisplay;
use crate::source::SourceDisplay;

/// Screen change notifications read before giving up on a confirmation
pub const DEFAULT_CONFIRM_ATTEMPTS: u32 = 3;

/// Successful synchronization results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The source already ran at the sink's native size
    AlreadyMatching,

    /// The source was switched to this mode and confirmed it
    Applied(DisplayMode),
}

/// Exclusive hold on the source display configuration.
///
/// While it exists no other client can change the screen setup. Dropping it
/// releases the hold.
pub struct ConfigHold<'a, S: SourceDisplay> {
    source: &'a mut S,
}

impl<'a, S: SourceDisplay> ConfigHold<'a, S> {
    pub fn acquire(source: &'a mut S) -> Result<Self, SourceError> {
        source.grab()?;
        Ok(Self { source })
    }
}

impl<S: SourceDisplay> Deref for ConfigHold<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.source
    }
}

impl<S: SourceDisplay> DerefMut for ConfigHold<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.source
    }
}

impl<S: SourceDisplay> Drop for ConfigHold<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.source.ungrab() {
            error!("Failed to release server grab: {}", e);
        }
    }
}

/// Negotiates the source geometry towards the sink's native geometry
#[derive(Debug, Clone)]
pub struct ResolutionSynchronizer {
    confirm_attempts: u32,
}

impl Default for ResolutionSynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRM_ATTEMPTS)
    }
}

impl ResolutionSynchronizer {
    pub fn new(confirm_attempts: u32) -> Self {
        Self { confirm_attempts }
    }

    /// Try to make the source geometry equal the sink's native geometry.
    ///
    /// Every error is recoverable: the caller keeps running at whatever
    /// geometry the source has afterwards.
    pub fn synchronize<S, K>(&self, source: &mut S, sink: &K) -> Result<SyncOutcome, SyncError>
    where
        S: SourceDisplay,
        K: SinkDisplay,
    {
        let (width, height) = sink
            .native_size()
            .map_err(|e| SyncError::Unavailable(e.to_string()))?;
        debug!("Sink native size {}x{}", width, height);
        if width == 0 || height == 0 {
            return Err(SyncError::Unavailable(format!(
                "invalid sink size {}x{}",
                width, height
            )));
        }

        // A change may have been queued before we got here, e.g. a settings
        // daemon applying a saved layout right after login.
        let drained = source.drain_geometry_changes()?;
        if drained > 0 {
            debug!("Applied {} queued screen change(s)", drained);
        }

        // Configuration must only be read after this point
        let mut hold = ConfigHold::acquire(source)?;
        self.reconcile(&mut *hold, width, height)
    }

    fn reconcile<S: SourceDisplay>(
        &self,
        source: &mut S,
        width: u32,
        height: u32,
    ) -> Result<SyncOutcome, SyncError> {
        let current = source.geometry();
        if current.same_size(width, height) {
            return Ok(SyncOutcome::AlreadyMatching);
        }

        info!("Syncing true display resolution {} -> {}x{}", current, width, height);
        let modes = source.modes()?;
        let mode = find_matching_mode(&modes, width, height)
            .ok_or(SyncError::NoMatchingMode { width, height })?;

        let geometry = current.with_mode(&mode);
        source
            .apply_mode(&mode, &geometry)
            .map_err(SyncError::ApplyFailed)?;

        self.await_confirmation(source, &mode)?;
        Ok(SyncOutcome::Applied(mode))
    }

    fn await_confirmation<S: SourceDisplay>(
        &self,
        source: &mut S,
        mode: &DisplayMode,
    ) -> Result<(), SyncError> {
        // Unrelated notifications can arrive first, notably right after startup
        for attempt in 1..=self.confirm_attempts {
            debug!(
                "Waiting for screen change notification ({}/{})",
                attempt, self.confirm_attempts
            );
            let geometry = source.wait_geometry_change()?;
            info!("Screen size changed to {}", geometry);
            if geometry.same_size(mode.width, mode.height) {
                source.commit_geometry(geometry);
                return Ok(());
            }
        }

        Err(SyncError::ConfirmationTimeout {
            attempts: self.confirm_attempts,
        })
    }
}
