//! Isolated encoder execution.
//!
//! The GIF encode runs on a blocking worker, never on the control task.
//! Requests go in as owned [`EncodeRequest`] values; responses come back
//! over a channel that exists before the worker starts, so no message can
//! be missed. A job emits any number of progress messages and exactly one
//! terminal `gif` or `error`. Terminating a job discards everything the
//! worker has not yet delivered.

use crate::gif::encode_gif;
use crate::protocol::{EncodeProgress, EncodeRequest, EncodeResult, EncoderResponse};
use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

/// Releases the bridge's single in-flight slot when dropped.
#[derive(Debug)]
struct SlotGuard(Arc<AtomicBool>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Starts encode jobs, at most one outstanding at a time.
#[derive(Debug, Clone, Default)]
pub struct EncoderBridge {
    busy: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl EncoderBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job is outstanding.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Hand a request to a fresh worker.
    ///
    /// Must be called inside a Tokio runtime. Fails with `EncoderBusy` while
    /// a previous job is still outstanding.
    pub fn submit(&self, request: EncodeRequest) -> CinemagraphResult<EncodeJob> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(CinemagraphError::EncoderBusy);
        }
        let slot = SlotGuard(Arc::clone(&self.busy));

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CinemagraphError::encode_fault(format!("Encoder needs an async runtime: {e}"))
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let total_frames = request.frames.len();
        let (tx, rx) = mpsc::unbounded_channel();
        let killed = Arc::new(AtomicBool::new(false));

        let worker_killed = Arc::clone(&killed);
        let worker = runtime.spawn_blocking(move || {
            let result = encode_gif(&request, |progress| {
                if worker_killed.load(Ordering::SeqCst) {
                    return false;
                }
                tx.send(EncoderResponse::Progress(progress)).is_ok()
            });

            let terminal = match result {
                Ok(Some(bytes)) => EncoderResponse::Gif(bytes),
                Ok(None) => return,
                Err(e) => EncoderResponse::Error(e.to_string()),
            };
            if !worker_killed.load(Ordering::SeqCst) {
                let _ = tx.send(terminal);
            }
        });

        tracing::info!(job = id, frames = total_frames, "Encode job submitted");

        Ok(EncodeJob {
            id,
            rx,
            killed,
            worker: Some(worker),
            slot: Some(slot),
            finished: false,
        })
    }
}

/// Handle to one in-flight encode.
///
/// Dropping the handle terminates the job.
#[derive(Debug)]
pub struct EncodeJob {
    id: u64,
    rx: mpsc::UnboundedReceiver<EncoderResponse>,
    killed: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    slot: Option<SlotGuard>,
    finished: bool,
}

impl EncodeJob {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the terminal message was delivered or the job was terminated.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait for the next message. `None` once the job is finished.
    pub async fn next(&mut self) -> Option<EncoderResponse> {
        if self.finished {
            return None;
        }
        let message = self.rx.recv().await;
        Some(self.accept(message))
    }

    /// Take the next message if one is ready.
    pub fn try_next(&mut self) -> Option<EncoderResponse> {
        if self.finished {
            return None;
        }
        match self.rx.try_recv() {
            Ok(message) => Some(self.accept(Some(message))),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.accept(None)),
        }
    }

    /// Drive the job to completion, reporting progress along the way.
    pub async fn wait(mut self, mut on_progress: impl FnMut(EncodeProgress)) -> EncodeResult {
        while let Some(message) = self.next().await {
            match message {
                EncoderResponse::Progress(p) => on_progress(p),
                terminal => return terminal.into_result(),
            }
        }
        Err(CinemagraphError::encode_fault("Encode job was terminated"))
    }

    /// Stop the job. No message is delivered afterwards.
    pub fn terminate(&mut self) {
        if self.finished {
            return;
        }
        self.killed.store(true, Ordering::SeqCst);
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.finish();
        tracing::info!(job = self.id, "Encode job terminated");
    }

    fn accept(&mut self, message: Option<EncoderResponse>) -> EncoderResponse {
        match message {
            Some(message) => {
                if message.is_terminal() {
                    self.finish();
                }
                message
            }
            None => {
                // Worker went away without a terminal message.
                self.finish();
                tracing::warn!(job = self.id, "Encoder exited without a result");
                EncoderResponse::Error("Encoder exited without a result".to_string())
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.worker = None;
        self.slot = None;
    }
}

impl Drop for EncodeJob {
    fn drop(&mut self) {
        self.terminate();
    }
}
