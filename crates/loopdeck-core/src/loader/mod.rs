//! Background loader and analyzer
//!
//! Loads run on a dedicated worker thread so the audio callback and the UI
//! never wait on disk or DSP. Each request decodes, resamples, analyzes,
//! optionally stretches to the host tempo, optionally persists the processed
//! audio, and finally stages the result into the track's staging slot for
//! the audio thread to swap in.

mod decode;

pub use decode::{decode_file, persist_wav, resample};

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use basedrop::Shared;

use crate::analysis::{resolve_tempo, OnsetTempoEstimator, TempoEstimator};
use crate::engine::gc::gc_handle;
use crate::error::{LoadError, LoadResult};
use crate::stretch::OfflineStretcher;
use crate::track::{StagedAudio, StagingSlot};
use crate::types::TrackId;

/// One load job for the worker thread.
pub struct LoadRequest {
    pub track_id: TrackId,
    pub path: PathBuf,
    /// Tempo claimed by whoever produced the file (generation metadata or
    /// user entry). Used when detection is unavailable or bypassed.
    pub supplied_bpm: f64,
    /// Host tempo at request time, the stretch target.
    pub host_tempo: f64,
    pub engine_rate: u32,
    pub staging: Arc<StagingSlot>,
    /// Where the processed audio is persisted as a WAV.
    ///
    /// The session layer supplies this on every load it issues, so each
    /// processed loop has a durable copy alongside the session and restores
    /// byte-identically. `None` skips the write and is meant for transient
    /// loads (previews, tests) that nothing will restore from.
    pub store_path: Option<PathBuf>,
}

/// What a finished load looked like, for the control thread.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedInfo {
    pub num_samples: usize,
    pub sample_rate: u32,
    pub bpm: f64,
    pub stretched: bool,
    pub ambiguity_bypass: bool,
}

/// Result message for one request. Failures leave the live track untouched.
pub struct LoadOutcome {
    pub track_id: TrackId,
    pub path: PathBuf,
    pub result: LoadResult<LoadedInfo>,
}

/// Handle to the loader worker thread.
pub struct LoopLoader {
    requests: Option<mpsc::Sender<LoadRequest>>,
    results: mpsc::Receiver<LoadOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl LoopLoader {
    pub fn new() -> Self {
        Self::with_estimator(Box::new(OnsetTempoEstimator::new()))
    }

    pub fn with_estimator(estimator: Box<dyn TempoEstimator>) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<LoadRequest>();
        let (result_tx, result_rx) = mpsc::channel::<LoadOutcome>();

        let worker = thread::Builder::new()
            .name("loopdeck-loader".to_string())
            .spawn(move || {
                while let Ok(request) = request_rx.recv() {
                    let track_id = request.track_id;
                    let path = request.path.clone();
                    let result = process_request(estimator.as_ref(), request);
                    if let Err(e) = &result {
                        log::error!("Load of {} failed: {e}", path.display());
                    }
                    if result_tx.send(LoadOutcome { track_id, path, result }).is_err() {
                        break;
                    }
                }
                log::debug!("Loader worker exiting");
            })
            .expect("Failed to spawn loader thread");

        Self {
            requests: Some(request_tx),
            results: result_rx,
            worker: Some(worker),
        }
    }

    /// Queue a load. Requests for the same track supersede each other at the
    /// staging slot, so a stale load never overwrites a newer one's result
    /// after it.
    pub fn request(&self, request: LoadRequest) {
        if let Some(tx) = &self.requests {
            if tx.send(request).is_err() {
                log::error!("Loader worker is gone, dropping request");
            }
        }
    }

    /// Non-blocking poll for finished loads.
    pub fn poll_result(&self) -> Option<LoadOutcome> {
        self.results.try_recv().ok()
    }
}

impl Default for LoopLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LoopLoader {
    fn drop(&mut self) {
        // Closing the request channel lets the worker drain and exit.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn process_request(estimator: &dyn TempoEstimator, request: LoadRequest) -> LoadResult<LoadedInfo> {
    let (decoded, native_rate) = decode_file(&request.path)?;
    let buffer = resample(decoded, native_rate, request.engine_rate)?;

    let detected = estimator.estimate(&buffer, request.engine_rate);
    let decision = resolve_tempo(detected, request.supplied_bpm, request.host_tempo);
    log::info!(
        "Loaded {}: detected {:?}, using {:.1} BPM{}",
        request.path.display(),
        detected,
        decision.bpm,
        if decision.ambiguity_bypass { " (ambiguity bypass)" } else { "" }
    );

    let (buffer, bpm) = match decision.stretch_ratio {
        Some(ratio) => {
            let mut stretcher = OfflineStretcher::new(request.engine_rate);
            // After stretching, the material is at the host tempo.
            (stretcher.stretch(&buffer, ratio), request.host_tempo)
        }
        None => (buffer, decision.bpm),
    };

    if let Some(store_path) = &request.store_path {
        persist_wav(&buffer, request.engine_rate, store_path)?;
    }

    let num_samples = buffer.len();
    if num_samples == 0 {
        return Err(LoadError::EmptyFile);
    }

    request.staging.stage(StagedAudio {
        buffer: Shared::new(&gc_handle(), buffer),
        num_samples,
        sample_rate: request.engine_rate,
        original_bpm: bpm,
        path: request.path,
    });

    Ok(LoadedInfo {
        num_samples,
        sample_rate: request.engine_rate,
        bpm,
        stretched: decision.stretch_ratio.is_some(),
        ambiguity_bypass: decision.ambiguity_bypass,
    })
}
