//! The pipeline state machine.
//!
//! One [`Orchestrator`] owns at most one capture session, one live frame
//! sequence and one outstanding encode job. All transitions happen on the
//! caller's task; only the GIF encode runs elsewhere.

use std::fmt;
use std::sync::Arc;

use cinemagraph_capture_engine::{CaptureSession, CapturedFrames, FrameSource, SessionConfig};
use cinemagraph_common::clock::TimestampNs;
use cinemagraph_common::config::PipelineConfig;
use cinemagraph_common::error::{CinemagraphError, CinemagraphResult, ErrorKind};
use cinemagraph_frame_model::{FrameSequence, Zone, ZoneMask};
use cinemagraph_processing_core::{Compositor, Resampler};
use cinemagraph_render_engine::{
    ArtifactSink, EncodeJob, EncodeProgress, EncodeRequest, EncodeResult, EncoderBridge,
    EncoderResponse,
};
use serde::{Deserialize, Serialize};

/// Receives encoder progress for display.
pub type ProgressObserver = Box<dyn Fn(EncodeProgress) + Send>;

/// Where the pipeline is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Idle,
    Recording,
    Resampling,
    Editing,
    Compositing,
    Encoding,
    Complete,
    Error,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Recording => "RECORDING",
            Self::Resampling => "RESAMPLING",
            Self::Editing => "EDITING",
            Self::Compositing => "COMPOSITING",
            Self::Encoding => "ENCODING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Inputs accepted by [`Orchestrator::handle`].
#[derive(Debug)]
pub enum PipelineEvent {
    StartRecording,
    CaptureTick,
    StopRecording,
    AddZone(Zone),
    Composite,
    EncoderProgress(EncodeProgress),
    EncoderFinished(EncodeResult),
    Deliver,
    Restart,
    Reset,
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartRecording => "start recording",
            Self::CaptureTick => "capture",
            Self::StopRecording => "stop recording",
            Self::AddZone(_) => "add zone",
            Self::Composite => "composite",
            Self::EncoderProgress(_) => "report progress",
            Self::EncoderFinished(_) => "finish encoding",
            Self::Deliver => "deliver",
            Self::Restart => "restart",
            Self::Reset => "reset",
        }
    }
}

/// One entry in the transition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: PipelineState,
    pub to: PipelineState,
}

/// Sequences capture, resample, edit, composite, encode and deliver.
pub struct Orchestrator {
    config: PipelineConfig,
    session_config: SessionConfig,
    state: PipelineState,
    source: Box<dyn FrameSource>,
    session: Option<CaptureSession>,
    sequence: Option<FrameSequence>,
    zones: Vec<Zone>,
    bridge: EncoderBridge,
    job: Option<EncodeJob>,
    gif: Option<Vec<u8>>,
    delivered_url: Option<String>,
    sink: Option<Arc<dyn ArtifactSink>>,
    observer: Option<ProgressObserver>,
    last_error: Option<String>,
    log: Vec<Transition>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, source: Box<dyn FrameSource>) -> CinemagraphResult<Self> {
        config.validate()?;
        tracing::info!(
            fps = config.fps,
            source = source.name(),
            blend = ?config.blend_mode,
            "Orchestrator created"
        );
        Ok(Self {
            config,
            session_config: SessionConfig::default(),
            state: PipelineState::Idle,
            source,
            session: None,
            sequence: None,
            zones: Vec::new(),
            bridge: EncoderBridge::new(),
            job: None,
            gif: None,
            delivered_url: None,
            sink: None,
            observer: None,
            last_error: None,
            log: Vec::new(),
        })
    }

    pub fn with_session_config(mut self, session_config: SessionConfig) -> Self {
        self.session_config = session_config;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_progress_observer(&mut self, observer: ProgressObserver) {
        self.observer = Some(observer);
    }

    /// Swap the capture source. Only allowed while nothing is recording.
    pub fn set_source(&mut self, source: Box<dyn FrameSource>) -> CinemagraphResult<()> {
        if self.state == PipelineState::Recording {
            return Err(self.reject("replace the source"));
        }
        self.source = source;
        Ok(())
    }

    // Accessors

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.log
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Raw frames buffered by the active session.
    pub fn captured_frames(&self) -> usize {
        self.session.as_ref().map(|s| s.frame_count()).unwrap_or(0)
    }

    /// The resampled sequence being edited.
    pub fn sequence(&self) -> Option<&FrameSequence> {
        self.sequence.as_ref()
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn gif(&self) -> Option<&[u8]> {
        self.gif.as_deref()
    }

    pub fn delivered_url(&self) -> Option<&str> {
        self.delivered_url.as_deref()
    }

    /// Dispatch an event to its transition.
    pub async fn handle(&mut self, event: PipelineEvent) -> CinemagraphResult<PipelineState> {
        tracing::debug!(state = %self.state, event = event.name(), "Handling event");
        match event {
            PipelineEvent::StartRecording => self.start_recording(),
            PipelineEvent::CaptureTick => self.capture_tick().map(|_| self.state),
            PipelineEvent::StopRecording => self.stop_recording(),
            PipelineEvent::AddZone(zone) => self.add_zone(zone),
            PipelineEvent::Composite => self.composite(),
            PipelineEvent::EncoderProgress(progress) => self.encoder_progress(progress),
            PipelineEvent::EncoderFinished(result) => self.encoder_finished(result),
            PipelineEvent::Deliver => self.deliver().await.map(|_| self.state),
            PipelineEvent::Restart => self.restart(),
            PipelineEvent::Reset => Ok(self.reset()),
        }
    }

    // Recording

    /// IDLE → RECORDING with a fresh capture session.
    pub fn start_recording(&mut self) -> CinemagraphResult<PipelineState> {
        self.require_state(&[PipelineState::Idle], "start recording")?;
        self.begin_session()?;
        Ok(self.state)
    }

    /// Sample the source once. Call on every display refresh while recording.
    ///
    /// Returns whether a frame was kept.
    pub fn capture_tick(&mut self) -> CinemagraphResult<bool> {
        self.capture_with(|session, source| session.tick(source))
    }

    /// [`capture_tick`](Self::capture_tick) at an explicit refresh time.
    pub fn capture_tick_at(&mut self, at_ns: TimestampNs) -> CinemagraphResult<bool> {
        self.capture_with(|session, source| session.tick_at(source, at_ns))
    }

    /// Stop recording and resample. Lands in EDITING on success.
    pub fn stop_recording(&mut self) -> CinemagraphResult<PipelineState> {
        self.stop_with(|session| session.stop())
    }

    /// [`stop_recording`](Self::stop_recording) at an explicit time.
    pub fn stop_recording_at(&mut self, at_ns: TimestampNs) -> CinemagraphResult<PipelineState> {
        self.stop_with(|session| session.stop_at(at_ns))
    }

    // Editing

    /// An empty mask sized to the current sequence.
    pub fn new_mask(&self) -> CinemagraphResult<ZoneMask> {
        if self.state != PipelineState::Editing {
            return Err(self.reject("draw a mask"));
        }
        let (width, height) = self
            .sequence
            .as_ref()
            .and_then(FrameSequence::dimensions)
            .ok_or_else(|| CinemagraphError::processing("No frames to draw over"))?;
        Ok(ZoneMask::new(width, height))
    }

    /// Record a finished mask-drawing action.
    pub fn add_zone(&mut self, zone: Zone) -> CinemagraphResult<PipelineState> {
        self.require_state(&[PipelineState::Editing], "add zone")?;
        let dims = self.sequence.as_ref().and_then(FrameSequence::dimensions);
        if dims != Some(zone.mask.dimensions()) {
            let err = CinemagraphError::processing(format!(
                "Mask is {:?} but frames are {:?}",
                zone.mask.dimensions(),
                dims
            ));
            return Err(self.surface(err, PipelineState::Editing));
        }
        self.zones.push(zone);
        tracing::info!(zones = self.zones.len(), "Zone added");
        Ok(self.state)
    }

    /// Drop every zone drawn so far.
    pub fn clear_zones(&mut self) -> CinemagraphResult<()> {
        self.require_state(&[PipelineState::Editing], "clear zones")?;
        self.zones.clear();
        Ok(())
    }

    /// EDITING → COMPOSITING → ENCODING.
    ///
    /// Composites a copy of the sequence, so a failed encode can be retried
    /// from EDITING with the same frames and zones.
    pub fn composite(&mut self) -> CinemagraphResult<PipelineState> {
        self.require_state(&[PipelineState::Editing], "composite")?;
        if self.zones.is_empty() {
            return Err(self.reject("composite before drawing a zone"));
        }
        let Some(sequence) = self.sequence.clone() else {
            return Err(self.reject("composite without frames"));
        };

        self.transition(PipelineState::Compositing);
        let compositor = Compositor::new(self.config.blend_mode);
        let composited = match compositor.composite(sequence, &self.zones) {
            Ok(composited) => composited,
            Err(e) => return Err(self.surface(e, PipelineState::Editing)),
        };

        let request = EncodeRequest::new(composited, &self.config);
        match self.bridge.submit(request) {
            Ok(job) => {
                self.job = Some(job);
                self.transition(PipelineState::Encoding);
                Ok(self.state)
            }
            Err(e) => Err(self.surface(e, PipelineState::Editing)),
        }
    }

    // Encoding

    /// Drive the encode job until it finishes.
    pub async fn poll_encoder(&mut self) -> CinemagraphResult<PipelineState> {
        self.require_state(&[PipelineState::Encoding], "wait for the encoder")?;
        loop {
            let Some(job) = self.job.as_mut() else {
                return self.encoder_finished(Err(CinemagraphError::encode_fault(
                    "No encode job in flight",
                )));
            };
            match job.next().await {
                Some(EncoderResponse::Progress(progress)) => {
                    self.encoder_progress(progress)?;
                }
                Some(terminal) => return self.encoder_finished(terminal.into_result()),
                None => {
                    return self.encoder_finished(Err(CinemagraphError::encode_fault(
                        "Encode job ended without a result",
                    )))
                }
            }
        }
    }

    /// Handle whatever the encoder has produced so far without waiting.
    pub fn pump_encoder(&mut self) -> CinemagraphResult<PipelineState> {
        self.require_state(&[PipelineState::Encoding], "poll the encoder")?;
        while let Some(message) = self.job.as_mut().and_then(EncodeJob::try_next) {
            match message {
                EncoderResponse::Progress(progress) => {
                    self.encoder_progress(progress)?;
                }
                terminal => return self.encoder_finished(terminal.into_result()),
            }
        }
        Ok(self.state)
    }

    fn encoder_progress(&mut self, progress: EncodeProgress) -> CinemagraphResult<PipelineState> {
        self.require_state(&[PipelineState::Encoding], "report progress")?;
        tracing::debug!(
            frames_encoded = progress.frames_encoded,
            total_frames = progress.total_frames,
            "Encode progress"
        );
        if let Some(observer) = &self.observer {
            observer(progress);
        }
        Ok(self.state)
    }

    fn encoder_finished(&mut self, result: EncodeResult) -> CinemagraphResult<PipelineState> {
        self.require_state(&[PipelineState::Encoding], "finish encoding")?;
        if let Some(mut job) = self.job.take() {
            job.terminate();
        }
        match result {
            Ok(bytes) => {
                tracing::info!(bytes = bytes.len(), "GIF ready");
                self.gif = Some(bytes);
                self.transition(PipelineState::Complete);
                Ok(self.state)
            }
            Err(e) => Err(self.surface(e, PipelineState::Editing)),
        }
    }

    // Delivery

    /// Hand the finished GIF to the sink and return its URL.
    pub async fn deliver(&mut self) -> CinemagraphResult<String> {
        self.require_state(&[PipelineState::Complete], "deliver")?;
        let Some(sink) = self.sink.clone() else {
            let err = CinemagraphError::config("No artifact sink configured");
            return Err(self.surface(err, PipelineState::Complete));
        };
        let Some(gif) = self.gif.as_deref() else {
            let err = CinemagraphError::upload_fault("No encoded artifact to deliver");
            return Err(self.surface(err, PipelineState::Complete));
        };

        let delivered = sink.deliver(gif).await;
        match delivered {
            Ok(url) => {
                tracing::info!(sink = sink.name(), url = %url, "Delivered");
                self.delivered_url = Some(url.clone());
                Ok(url)
            }
            Err(e) => {
                tracing::warn!(sink = sink.name(), "Delivery failed");
                Err(self.surface(e, PipelineState::Complete))
            }
        }
    }

    // Start over

    /// Discard everything and start a fresh recording.
    pub fn restart(&mut self) -> CinemagraphResult<PipelineState> {
        self.require_state(
            &[
                PipelineState::Editing,
                PipelineState::Complete,
                PipelineState::Error,
                PipelineState::Encoding,
            ],
            "restart",
        )?;
        if self.state == PipelineState::Encoding {
            tracing::warn!("Restart requested mid-encode, terminating job");
            self.transition(PipelineState::Error);
        }
        self.release();
        self.begin_session()?;
        Ok(self.state)
    }

    /// Back to IDLE from anywhere, releasing all resources.
    pub fn reset(&mut self) -> PipelineState {
        self.release();
        self.last_error = None;
        if self.state != PipelineState::Idle {
            self.transition(PipelineState::Idle);
        }
        self.state
    }

    // Internal helpers

    fn begin_session(&mut self) -> CinemagraphResult<()> {
        self.session = Some(self.open_session()?);
        self.last_error = None;
        self.transition(PipelineState::Recording);
        Ok(())
    }

    fn open_session(&self) -> CinemagraphResult<CaptureSession> {
        let mut session = CaptureSession::new(self.session_config.clone());
        session.start()?;
        Ok(session)
    }

    fn capture_with<F>(&mut self, grab: F) -> CinemagraphResult<bool>
    where
        F: FnOnce(&mut CaptureSession, &mut dyn FrameSource) -> CinemagraphResult<bool>,
    {
        self.require_state(&[PipelineState::Recording], "capture")?;
        let Some(session) = self.session.as_mut() else {
            let err = CinemagraphError::capture("No capture session");
            return Err(self.surface(err, PipelineState::Recording));
        };
        match grab(session, self.source.as_mut()) {
            Ok(kept) => Ok(kept),
            Err(e) => Err(self.surface(e, PipelineState::Recording)),
        }
    }

    fn stop_with<F>(&mut self, stop: F) -> CinemagraphResult<PipelineState>
    where
        F: FnOnce(&mut CaptureSession) -> CinemagraphResult<CapturedFrames>,
    {
        self.require_state(&[PipelineState::Recording], "stop recording")?;
        let Some(session) = self.session.as_mut() else {
            let err = CinemagraphError::capture("No capture session");
            return Err(self.surface(err, PipelineState::Recording));
        };

        let captured = match stop(session) {
            Ok(captured) => captured,
            Err(e) => return Err(self.surface(e, PipelineState::Recording)),
        };
        self.session = None;

        self.transition(PipelineState::Resampling);
        let resampler = Resampler::new(self.config.fps);
        let sequence = match resampler.resample(captured.frames, captured.duration_secs) {
            Ok(sequence) => sequence,
            Err(e) => return Err(self.surface(e, PipelineState::Recording)),
        };
        if sequence.is_empty() {
            let err = CinemagraphError::empty_buffer(format!(
                "Recording of {:.3}s is too short for one frame at {} fps",
                captured.duration_secs, self.config.fps
            ));
            return Err(self.surface(err, PipelineState::Recording));
        }

        self.sequence = Some(sequence);
        self.transition(PipelineState::Editing);
        Ok(self.state)
    }

    fn release(&mut self) {
        if let Some(mut job) = self.job.take() {
            job.terminate();
        }
        self.session = None;
        self.sequence = None;
        self.zones.clear();
        self.gif = None;
        self.delivered_url = None;
    }

    fn require_state(&self, allowed: &[PipelineState], event: &str) -> CinemagraphResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.reject(event))
        }
    }

    fn reject(&self, event: &str) -> CinemagraphError {
        tracing::warn!(state = %self.state, event, "Rejected event");
        CinemagraphError::invalid_transition(self.state, event)
    }

    /// Record `err` and move to the state its kind recovers to.
    ///
    /// `resume` is the stable state the failed operation started from.
    /// Capture faults end the session in ERROR. Encode faults pass through
    /// ERROR back to EDITING with frames and zones intact. An empty buffer
    /// keeps recording on a fresh session. Anything else leaves the
    /// pipeline where the operation found it.
    fn surface(&mut self, err: CinemagraphError, resume: PipelineState) -> CinemagraphError {
        let kind = err.kind();
        tracing::error!(state = %self.state, error = %err, kind = ?kind, "Pipeline error");
        match kind {
            ErrorKind::Capture => {
                self.session = None;
                self.transition(PipelineState::Error);
            }
            ErrorKind::Encode => {
                self.transition(PipelineState::Error);
                if self.sequence.is_some() {
                    self.transition(PipelineState::Editing);
                }
            }
            ErrorKind::EmptyBuffer => self.settle(PipelineState::Recording),
            ErrorKind::Upload | ErrorKind::Rejected => self.settle(resume),
        }
        self.last_error = Some(err.to_string());
        err
    }

    /// Return to `state`, reopening the capture session if it needs one.
    fn settle(&mut self, state: PipelineState) {
        if state == PipelineState::Recording && self.session.is_none() {
            match self.open_session() {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    tracing::error!(error = %e, "Could not reopen capture session");
                    self.transition(PipelineState::Error);
                    return;
                }
            }
        }
        if self.state != state {
            self.transition(state);
        }
    }

    fn transition(&mut self, to: PipelineState) {
        let from = self.state;
        self.state = to;
        self.log.push(Transition { from, to });
        tracing::info!(from = %from, to = %to, "Pipeline transition");
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("source", &self.source.name())
            .field("captured", &self.captured_frames())
            .field("sequence", &self.sequence.as_ref().map(FrameSequence::len))
            .field("zones", &self.zones.len())
            .field("encoding", &self.job.is_some())
            .field("gif_bytes", &self.gif.as_ref().map(Vec::len))
            .field("last_error", &self.last_error)
            .finish()
    }
}
