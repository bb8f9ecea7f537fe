//! The mirror event loop
//!
//! One thread, one blocking wait per iteration. Damage on the source root is
//! copied into the sink, screen changes resynchronize and resize, everything
//! else goes to the cursor subsystem.

use std::time::Instant;

use log::{debug, error, info, warn};

use crate::capture::{copy_frame, CaptureBuffer, FrameStats};
use crate::cursor::CursorClient;
use crate::error::{CaptureError, MirrorError};
use crate::geometry::DamageRegion;
use crate::resize::reconcile_buffers;
use crate::sink::{SinkBuffer, SinkDisplay, SinkLock};
use crate::source::{ErrorPolicy, SourceDisplay, SourceEvent};
use crate::sync::{ResolutionSynchronizer, SyncOutcome, DEFAULT_CONFIRM_ATTEMPTS};

/// Frames between two statistics log lines
const STATS_INTERVAL: u64 = 300;

/// Runtime knobs of the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorOptions {
    /// Drive the source to the sink's native resolution
    pub sync_enabled: bool,

    /// Screen change notifications read while waiting for a mode switch
    pub confirm_attempts: u32,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            confirm_attempts: DEFAULT_CONFIRM_ATTEMPTS,
        }
    }
}

/// A running source to sink mirror.
///
/// Fields drop in declaration order, so the source connection goes last.
pub struct Mirror<S, K, C>
where
    S: SourceDisplay,
    K: SinkDisplay,
    C: CursorClient<S::Event>,
{
    capture: CaptureBuffer,
    cursor: C,
    sink_buffer: K::Buffer,
    sink: K,
    source: S,
    damage: DamageRegion,
    policy: ErrorPolicy,
    synchronizer: Option<ResolutionSynchronizer>,
    stats: FrameStats,
    torn_down: bool,
}

impl<S, K, C> Mirror<S, K, C>
where
    S: SourceDisplay,
    K: SinkDisplay,
    C: CursorClient<S::Event>,
{
    /// Set up every resource the loop needs.
    ///
    /// On failure whatever was acquired so far is released again.
    pub fn start<F>(
        mut source: S,
        mut sink: K,
        options: MirrorOptions,
        cursor_init: F,
    ) -> Result<Self, MirrorError>
    where
        F: FnOnce(&S, &K) -> Result<C, MirrorError>,
    {
        source.select_geometry_changes()?;

        let synchronizer = options
            .sync_enabled
            .then(|| ResolutionSynchronizer::new(options.confirm_attempts));
        if let Some(synchronizer) = &synchronizer {
            sync_resolution(synchronizer, &mut source, &sink);
        }

        let geometry = source.geometry();
        info!("Source geometry {}", geometry);
        let sink_buffer = sink.create_buffer(geometry.width, geometry.height)?;
        let mut capture = CaptureBuffer::init(&mut source)?;

        let cursor = match cursor_init(&source, &sink) {
            Ok(cursor) => cursor,
            Err(e) => {
                capture.teardown(&mut source);
                return Err(e);
            }
        };

        let mut mirror = Self {
            capture,
            cursor,
            sink_buffer,
            sink,
            source,
            damage: DamageRegion::default(),
            policy: ErrorPolicy::new(),
            synchronizer,
            stats: FrameStats::default(),
            torn_down: false,
        };
        mirror.source.track_damage()?;
        Ok(mirror)
    }

    /// Process events until a fatal error
    pub fn run(&mut self) -> Result<(), MirrorError> {
        info!("Mirroring started");
        loop {
            self.step()?;
        }
    }

    /// Wait for one event and handle it
    pub fn step(&mut self) -> Result<(), MirrorError> {
        match self.source.next_event()? {
            SourceEvent::Damage {
                x,
                y,
                width,
                height,
            } => self.on_damage(x, y, width, height),
            SourceEvent::GeometryChange(geometry) => {
                info!("Screen changed to {}", geometry);
                self.source.commit_geometry(geometry);
                if let Some(synchronizer) = &self.synchronizer {
                    sync_resolution(synchronizer, &mut self.source, &self.sink);
                }
                reconcile_buffers(
                    &mut self.source,
                    &mut self.sink,
                    &mut self.sink_buffer,
                    &mut self.capture,
                )?;
                Ok(())
            }
            SourceEvent::ProtocolError(err) => {
                self.policy.report(&err);
                Ok(())
            }
            SourceEvent::Other(event) => {
                self.cursor.on_event(&event);
                Ok(())
            }
        }
    }

    fn on_damage(&mut self, x: i16, y: i16, width: u16, height: u16) -> Result<(), MirrorError> {
        self.damage
            .mark(x.into(), y.into(), width.into(), height.into());
        if let Some(region) = self.damage.take() {
            debug!(
                "Damage {}x{}+{}+{}",
                region.width, region.height, region.x, region.y
            );
        }

        // repaired before the snapshot, so changes made meanwhile report again
        if let Err(e) = self.source.subtract_damage() {
            self.policy.absorb(e)?;
        }
        self.render_root()
    }

    /// Copy a full snapshot of the source root into the sink
    fn render_root(&mut self) -> Result<(), MirrorError> {
        let started = Instant::now();
        let mut sink = SinkLock::acquire(&mut self.sink_buffer)?;

        let snapshot = match self.capture.fetch(&mut self.source) {
            Ok(snapshot) => snapshot,
            Err(CaptureError::Fetch(err)) => {
                self.policy.absorb(err)?;
                self.stats.record_skip();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let stride = sink.stride();
        match copy_frame(sink.pixels_mut(), stride, &snapshot) {
            Ok(bytes) => {
                let elapsed = started.elapsed().as_micros() as u64;
                self.stats.record_capture(bytes, elapsed);
                if should_log_stats(self.stats.total_frames) {
                    debug!("Frame stats: {}", self.stats);
                }
            }
            Err(e) => {
                error!("Dropping frame: {}", e);
                self.stats.record_skip();
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Protocol errors absorbed so far
    pub fn protocol_errors(&self) -> u64 {
        self.policy.absorbed()
    }

    /// Release the capture segment and the cursor cache. Runs once; also
    /// done on drop.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.capture.teardown(&mut self.source);
        self.cursor.teardown_cache();
        info!("Mirror stopped: {}", self.stats);
    }
}

impl<S, K, C> Drop for Mirror<S, K, C>
where
    S: SourceDisplay,
    K: SinkDisplay,
    C: CursorClient<S::Event>,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

/// First copied frame, then every `STATS_INTERVAL` frames
fn should_log_stats(total_frames: u64) -> bool {
    total_frames % STATS_INTERVAL == 1
}

/// Best effort: failures leave the source at its current geometry
fn sync_resolution<S: SourceDisplay, K: SinkDisplay>(
    synchronizer: &ResolutionSynchronizer,
    source: &mut S,
    sink: &K,
) {
    match synchronizer.synchronize(source, sink) {
        Ok(SyncOutcome::AlreadyMatching) => debug!("Source already at native resolution"),
        Ok(SyncOutcome::Applied(mode)) => info!("Source switched to {}", mode),
        Err(e) => warn!("Resolution sync failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, SourceError};
    use crate::geometry::Geometry;
    use crate::testing::{bad_match, mode, Call, FakeSink, FakeSource, RecordingCursor};

    type TestMirror = Mirror<FakeSource, FakeSink, RecordingCursor>;

    fn start(source: FakeSource, sink: FakeSink, options: MirrorOptions) -> (TestMirror, RecordingCursor) {
        let recorder = RecordingCursor::default();
        let cursor = recorder.clone();
        let mirror = Mirror::start(source, sink, options, move |_, _| Ok(cursor)).unwrap();
        (mirror, recorder)
    }

    fn no_sync() -> MirrorOptions {
        MirrorOptions {
            sync_enabled: false,
            ..MirrorOptions::default()
        }
    }

    fn damage() -> SourceEvent<u32> {
        SourceEvent::Damage {
            x: 10,
            y: 10,
            width: 20,
            height: 20,
        }
    }

    fn damage_and_fetches(source: &FakeSource) -> Vec<Call> {
        source
            .calls
            .iter()
            .filter(|c| matches!(c, Call::SubtractDamage | Call::Fetch(..)))
            .cloned()
            .collect()
    }

    #[test]
    fn startup_syncs_to_native_resolution() {
        let mut source = FakeSource::new(32, 24);
        source.modes = vec![mode(1, 32, 24), mode(2, 64, 48)];

        let (mirror, _) = start(source, FakeSink::native(64, 48), MirrorOptions::default());

        assert!(mirror.source.geometry.same_size(64, 48));
        assert_eq!(mirror.capture.dimensions(), (64, 48));
        assert_eq!((mirror.sink_buffer.width, mirror.sink_buffer.height), (64, 48));
        assert_eq!(mirror.source.calls.first(), Some(&Call::SelectGeometryChanges));
        assert_eq!(mirror.source.calls.last(), Some(&Call::TrackDamage));
    }

    #[test]
    fn failed_startup_sync_keeps_current_geometry() {
        let source = FakeSource::new(32, 24);
        let (mirror, _) = start(source, FakeSink::native(64, 48), MirrorOptions::default());

        assert!(mirror.source.geometry.same_size(32, 24));
        assert_eq!(mirror.capture.dimensions(), (32, 24));
    }

    #[test]
    fn sync_disabled_skips_negotiation() {
        let mut source = FakeSource::new(32, 24);
        source.modes = vec![mode(2, 64, 48)];
        let (mirror, _) = start(source, FakeSink::native(64, 48), no_sync());

        assert!(mirror.source.geometry.same_size(32, 24));
        assert_eq!(mirror.source.count(&Call::Grab), 0);
    }

    #[test]
    fn each_damage_subtracts_then_fetches() {
        let mut source = FakeSource::new(32, 24);
        source.events.push_back(damage());
        source.events.push_back(damage());
        let (mut mirror, _) = start(source, FakeSink::default(), no_sync());

        mirror.step().unwrap();
        mirror.step().unwrap();

        assert_eq!(
            damage_and_fetches(&mirror.source),
            vec![
                Call::SubtractDamage,
                Call::Fetch(32, 24),
                Call::SubtractDamage,
                Call::Fetch(32, 24),
            ]
        );
        assert_eq!(mirror.stats().total_frames, 2);
        assert_eq!(mirror.stats().total_bytes, 2 * 32 * 24 * 4);
        assert_eq!(mirror.sink_buffer.locks, 2);
        assert_eq!(mirror.sink_buffer.unlocks, 2);
        assert!(!mirror.sink_buffer.locked);
    }

    #[test]
    fn damage_during_copy_gets_one_more_cycle() {
        let mut source = FakeSource::new(32, 24);
        source.events.push_back(damage());
        source.events_on_fetch.push_back(damage());
        let (mut mirror, _) = start(source, FakeSink::default(), no_sync());

        mirror.step().unwrap();
        assert_eq!(mirror.source.events.len(), 1);

        mirror.step().unwrap();
        assert_eq!(
            damage_and_fetches(&mirror.source),
            vec![
                Call::SubtractDamage,
                Call::Fetch(32, 24),
                Call::SubtractDamage,
                Call::Fetch(32, 24),
            ]
        );
        assert!(mirror.source.events.is_empty());
        assert!(mirror.source.events_on_fetch.is_empty());
        assert_eq!(mirror.stats().total_frames, 2);
        assert!(!mirror.sink_buffer.locked);
    }

    #[test]
    fn stats_logged_on_first_and_every_interval() {
        assert!(should_log_stats(1));
        assert!(!should_log_stats(2));
        assert!(!should_log_stats(STATS_INTERVAL));
        assert!(should_log_stats(STATS_INTERVAL + 1));
    }

    #[test]
    fn skipped_frames_leave_frame_count_alone() {
        let mut source = FakeSource::new(32, 24);
        source.events.push_back(damage());
        source.events.push_back(damage());
        source.events.push_back(damage());
        let (mut mirror, _) = start(source, FakeSink::default(), no_sync());

        mirror.step().unwrap();
        mirror.source.fetch_failures = 2;
        mirror.step().unwrap();
        mirror.step().unwrap();

        assert_eq!(mirror.stats().total_frames, 1);
        assert_eq!(mirror.stats().skipped_frames, 2);
    }

    #[test]
    fn failed_snapshot_skips_frame() {
        let mut source = FakeSource::new(32, 24);
        source.events.push_back(damage());
        source.events.push_back(damage());
        source.fetch_failures = 1;
        let (mut mirror, _) = start(source, FakeSink::default(), no_sync());

        mirror.step().unwrap();
        assert_eq!(mirror.stats().skipped_frames, 1);
        assert_eq!(mirror.protocol_errors(), 1);
        assert!(!mirror.sink_buffer.locked);

        mirror.step().unwrap();
        assert_eq!(mirror.stats().total_frames, 1);
    }

    #[test]
    fn external_change_is_reverted_to_native() {
        let mut source = FakeSource::new(64, 48);
        source.modes = vec![mode(1, 64, 48), mode(2, 32, 24)];
        source
            .events
            .push_back(SourceEvent::GeometryChange(Geometry::new(32, 24, 8, 6)));
        let (mut mirror, _) = start(source, FakeSink::native(64, 48), MirrorOptions::default());

        mirror.step().unwrap();

        assert!(mirror.source.geometry.same_size(64, 48));
        assert_eq!(mirror.capture.dimensions(), (64, 48));
        assert_eq!(
            mirror.source.count_matching(|c| matches!(c, Call::ApplyMode(m, _) if m.id == 1)),
            1
        );
    }

    #[test]
    fn geometry_change_resizes_buffers() {
        let mut source = FakeSource::new(32, 24);
        source
            .events
            .push_back(SourceEvent::GeometryChange(Geometry::new(48, 40, 12, 10)));
        source.events.push_back(damage());
        let (mut mirror, _) = start(source, FakeSink::default(), no_sync());

        mirror.step().unwrap();
        assert_eq!(mirror.capture.dimensions(), (48, 40));
        assert_eq!((mirror.sink_buffer.width, mirror.sink_buffer.height), (48, 40));

        mirror.step().unwrap();
        assert_eq!(mirror.source.calls.last(), Some(&Call::Fetch(48, 40)));
    }

    #[test]
    fn resize_failure_is_fatal() {
        let mut source = FakeSource::new(32, 24);
        source
            .events
            .push_back(SourceEvent::GeometryChange(Geometry::new(48, 40, 12, 10)));
        let (mut mirror, _) = start(source, FakeSink::default(), no_sync());
        mirror.source.fail_attach = true;

        let err = mirror.step().unwrap_err();
        assert!(matches!(err, MirrorError::CaptureResize(_)));
    }

    #[test]
    fn protocol_error_events_do_not_stop_the_loop() {
        let mut source = FakeSource::new(32, 24);
        source.events.push_back(SourceEvent::ProtocolError(bad_match()));
        source.events.push_back(damage());
        let (mut mirror, _) = start(source, FakeSink::default(), no_sync());

        mirror.step().unwrap();
        mirror.step().unwrap();
        assert_eq!(mirror.protocol_errors(), 1);
        assert_eq!(mirror.stats().total_frames, 1);
    }

    #[test]
    fn other_events_go_to_cursor() {
        let mut source = FakeSource::new(32, 24);
        source.events.push_back(SourceEvent::Other(7));
        source.events.push_back(SourceEvent::Other(9));
        let (mut mirror, recorder) = start(source, FakeSink::default(), no_sync());

        mirror.step().unwrap();
        mirror.step().unwrap();
        assert_eq!(*recorder.events.borrow(), vec![7, 9]);
    }

    #[test]
    fn lost_connection_ends_run() {
        let (mut mirror, _) = start(FakeSource::new(32, 24), FakeSink::default(), no_sync());
        let err = mirror.run().unwrap_err();
        assert!(matches!(err, MirrorError::Source(SourceError::Connection(_))));
    }

    #[test]
    fn teardown_releases_capture_and_cursor_once() {
        let (mut mirror, recorder) = start(FakeSource::new(32, 24), FakeSink::default(), no_sync());

        mirror.teardown();
        assert!(!mirror.capture.is_attached());
        assert_eq!(mirror.source.count(&Call::Detach(1)), 1);
        assert_eq!(recorder.torn_down.get(), 1);

        drop(mirror);
        assert_eq!(recorder.torn_down.get(), 1);
    }

    #[test]
    fn drop_tears_down_cursor_cache() {
        let (mirror, recorder) = start(FakeSource::new(32, 24), FakeSink::default(), no_sync());
        drop(mirror);
        assert_eq!(recorder.torn_down.get(), 1);
    }

    #[test]
    fn capture_setup_failure_is_fatal() {
        let mut source = FakeSource::new(32, 24);
        source.fail_attach = true;
        let result: Result<TestMirror, _> =
            Mirror::start(source, FakeSink::default(), no_sync(), |_, _| {
                panic!("cursor created before capture")
            });
        assert!(matches!(
            result,
            Err(MirrorError::Capture(CaptureError::Register(_)))
        ));
    }

    #[test]
    fn cursor_setup_failure_is_fatal() {
        let result: Result<TestMirror, _> = Mirror::start(
            FakeSource::new(32, 24),
            FakeSink::default(),
            no_sync(),
            |_, _| Err(MirrorError::Sink(SinkError::NativeSizeUnknown)),
        );
        assert!(matches!(result, Err(MirrorError::Sink(_))));
    }
}
