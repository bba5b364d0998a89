//! Recording session management.
//!
//! A session owns the raw frame buffer while recording. Each display
//! refresh calls [`CaptureSession::tick`]; stopping hands the buffer off as
//! a [`CapturedFrames`] and leaves the session empty.

use cinemagraph_common::clock::{CaptureClock, RateController, TimestampNs};
use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use cinemagraph_frame_model::Frame;
use image::RgbaImage;

use crate::source::FrameSource;

/// Configuration for a recording session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Cap on raw samples per second. `None` keeps every refresh.
    pub max_capture_hz: Option<u32>,
}

/// State of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created but not started.
    Idle,
    /// Recording in progress.
    Recording,
    /// Recording stopped and the buffer handed off.
    Stopped,
}

/// The raw capture handed to the resampler.
#[derive(Debug, Clone)]
pub struct CapturedFrames {
    /// Frames in capture order.
    pub frames: Vec<Frame>,
    /// Stop time minus start time.
    pub duration_secs: f64,
    /// Wall-clock time the recording started.
    pub started_at: String,
}

/// A recording session that accumulates frames at refresh cadence.
pub struct CaptureSession {
    config: SessionConfig,
    state: SessionState,
    clock: Option<CaptureClock>,
    throttle: Option<RateController>,
    frames: Vec<Frame>,
    last_tick_ns: Option<TimestampNs>,
    skipped: u64,
}

impl CaptureSession {
    pub fn new(config: SessionConfig) -> Self {
        let throttle = config.max_capture_hz.map(RateController::new);
        Self {
            config,
            state: SessionState::Idle,
            clock: None,
            throttle,
            frames: Vec::new(),
            last_tick_ns: None,
            skipped: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frames captured so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Refreshes dropped by the rate cap.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Recording duration so far.
    pub fn elapsed_secs(&self) -> f64 {
        self.clock.as_ref().map(|c| c.elapsed_secs()).unwrap_or(0.0)
    }

    /// Start recording with an empty buffer.
    pub fn start(&mut self) -> CinemagraphResult<()> {
        if self.state != SessionState::Idle {
            return Err(CinemagraphError::capture("Session already started"));
        }
        self.reset_buffer();
        self.state = SessionState::Recording;
        tracing::info!(
            max_capture_hz = ?self.config.max_capture_hz,
            "Capture session started"
        );
        Ok(())
    }

    /// Capture the source's current raster, stamped with the session clock.
    pub fn tick(&mut self, source: &mut dyn FrameSource) -> CinemagraphResult<bool> {
        let now = self.now_ns()?;
        self.tick_at(source, now)
    }

    /// Capture the source's raster at an explicit refresh timestamp.
    ///
    /// Returns `false` when the rate cap skipped this refresh.
    pub fn tick_at(
        &mut self,
        source: &mut dyn FrameSource,
        at_ns: TimestampNs,
    ) -> CinemagraphResult<bool> {
        self.ensure_recording()?;
        self.check_monotonic(at_ns)?;
        if !self.accept(at_ns) {
            return Ok(false);
        }
        let raster = source
            .grab(at_ns)
            .map_err(|e| match e {
                CinemagraphError::PermissionDenied { .. } => e,
                other => CinemagraphError::capture(format!("{}: {other}", source.name())),
            })?;
        self.append(raster, at_ns)?;
        Ok(true)
    }

    /// Append a raster the caller already grabbed.
    pub fn push(&mut self, raster: RgbaImage, at_ns: TimestampNs) -> CinemagraphResult<bool> {
        self.ensure_recording()?;
        self.check_monotonic(at_ns)?;
        if !self.accept(at_ns) {
            return Ok(false);
        }
        self.append(raster, at_ns)?;
        Ok(true)
    }

    /// Stop at the session clock's current time.
    pub fn stop(&mut self) -> CinemagraphResult<CapturedFrames> {
        let now = self.now_ns()?;
        self.stop_at(now)
    }

    /// Stop recording and hand off the buffer.
    ///
    /// With nothing captured the session keeps recording on a fresh
    /// buffer and an `EmptyBuffer` error is returned.
    pub fn stop_at(&mut self, at_ns: TimestampNs) -> CinemagraphResult<CapturedFrames> {
        self.ensure_recording()?;

        if self.frames.is_empty() {
            tracing::warn!("Stop requested with no captured frames");
            self.reset_buffer();
            return Err(CinemagraphError::empty_buffer(
                "No frames were captured; keep recording a little longer",
            ));
        }

        let duration_secs = CaptureClock::ns_to_secs(at_ns);
        let started_at = self
            .clock
            .as_ref()
            .map(|c| c.epoch_wall().to_string())
            .unwrap_or_default();
        let frames = std::mem::take(&mut self.frames);
        self.state = SessionState::Stopped;

        tracing::info!(
            frames = frames.len(),
            duration_secs,
            skipped = self.skipped,
            "Capture session stopped"
        );

        Ok(CapturedFrames {
            frames,
            duration_secs,
            started_at,
        })
    }

    // Internal helpers

    fn reset_buffer(&mut self) {
        self.frames.clear();
        self.clock = Some(CaptureClock::start());
        self.last_tick_ns = None;
        self.skipped = 0;
        if let Some(throttle) = self.throttle.as_mut() {
            throttle.reset();
        }
    }

    fn ensure_recording(&self) -> CinemagraphResult<()> {
        if self.state != SessionState::Recording {
            return Err(CinemagraphError::capture("Session not recording"));
        }
        Ok(())
    }

    fn now_ns(&self) -> CinemagraphResult<TimestampNs> {
        self.clock
            .as_ref()
            .map(CaptureClock::elapsed_ns)
            .ok_or_else(|| CinemagraphError::capture("Session not recording"))
    }

    fn check_monotonic(&self, at_ns: TimestampNs) -> CinemagraphResult<()> {
        match self.last_tick_ns {
            Some(last) if at_ns < last => Err(CinemagraphError::processing(format!(
                "Refresh timestamp went backwards ({at_ns} < {last})"
            ))),
            _ => Ok(()),
        }
    }

    fn accept(&mut self, at_ns: TimestampNs) -> bool {
        self.last_tick_ns = Some(at_ns);
        let ready = self
            .throttle
            .as_mut()
            .map(|t| t.should_tick(at_ns))
            .unwrap_or(true);
        if !ready {
            self.skipped += 1;
        }
        ready
    }

    fn append(&mut self, raster: RgbaImage, at_ns: TimestampNs) -> CinemagraphResult<()> {
        if let Some(first) = self.frames.first() {
            if raster.dimensions() != first.dimensions() {
                return Err(CinemagraphError::capture(format!(
                    "Source changed size mid-recording: {:?} -> {:?}",
                    first.dimensions(),
                    raster.dimensions()
                )));
            }
        }
        self.frames.push(Frame::new(raster, at_ns));
        Ok(())
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FnSource, MemorySource};
    use image::Rgba;

    fn source() -> MemorySource {
        MemorySource::new("test", vec![RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]))]).unwrap()
    }

    #[test]
    fn ticks_before_start_are_rejected() {
        let mut session = CaptureSession::default();
        assert!(session.tick_at(&mut source(), 0).is_err());
        assert!(session.stop_at(0).is_err());
    }

    #[test]
    fn records_and_hands_off_buffer() {
        let mut session = CaptureSession::default();
        session.start().unwrap();
        let mut src = source();
        for i in 0..60u64 {
            assert!(session.tick_at(&mut src, i * 33_333_333).unwrap());
        }
        let captured = session.stop_at(2_000_000_000).unwrap();
        assert_eq!(captured.frames.len(), 60);
        assert!((captured.duration_secs - 2.0).abs() < 1e-9);
        assert_eq!(captured.frames[1].timestamp_ns(), 33_333_333);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.frame_count(), 0);
    }

    #[test]
    fn empty_stop_keeps_recording() {
        let mut session = CaptureSession::default();
        session.start().unwrap();
        let err = session.stop_at(500_000_000).unwrap_err();
        assert!(matches!(err, CinemagraphError::EmptyBuffer { .. }));
        assert_eq!(session.state(), SessionState::Recording);

        session.tick_at(&mut source(), 0).unwrap();
        assert!(session.stop_at(100).is_ok());
    }

    #[test]
    fn rate_cap_skips_fast_refreshes() {
        let mut session = CaptureSession::new(SessionConfig {
            max_capture_hz: Some(30),
        });
        session.start().unwrap();
        let mut src = source();
        let mut kept = 0;
        // 60Hz display for one second.
        for i in 0..60u64 {
            if session.tick_at(&mut src, i * 16_666_667).unwrap() {
                kept += 1;
            }
        }
        assert_eq!(kept, 30);
        assert_eq!(session.skipped(), 30);
    }

    #[test]
    fn backwards_timestamps_are_rejected() {
        let mut session = CaptureSession::default();
        session.start().unwrap();
        session.tick_at(&mut source(), 100).unwrap();
        assert!(session.tick_at(&mut source(), 50).is_err());
        assert_eq!(session.frame_count(), 1);
    }

    #[test]
    fn source_failure_surfaces_as_capture_error() {
        let mut session = CaptureSession::default();
        session.start().unwrap();
        let mut failing = FnSource::new("camera", (2, 2), |_| {
            Err(CinemagraphError::PermissionDenied {
                message: "camera access denied".into(),
            })
        });
        let err = session.tick_at(&mut failing, 0).unwrap_err();
        assert!(matches!(err, CinemagraphError::PermissionDenied { .. }));

        let mut broken = FnSource::new("camera", (2, 2), |_| {
            Err(CinemagraphError::processing("device unplugged"))
        });
        let err = session.tick_at(&mut broken, 1).unwrap_err();
        assert_eq!(err.kind(), cinemagraph_common::ErrorKind::Capture);
    }

    #[test]
    fn size_change_is_a_capture_error() {
        let mut session = CaptureSession::default();
        session.start().unwrap();
        session.push(RgbaImage::new(2, 2), 0).unwrap();
        let err = session.push(RgbaImage::new(3, 2), 1).unwrap_err();
        assert!(matches!(err, CinemagraphError::Capture { .. }));
    }
}
