//! The acquisition state machine and its cycle loop.
//!
//! One background task per run: pull a window per channel, filter, subtract
//! baselines, normalize the reference channel, append to the shared buffers,
//! publish a per-channel preview. Stop is cooperative; the cancellation token
//! is observed at cycle boundaries only.

use std::sync::Arc;
use std::time::Duration;

use bioamp_board::{BoardDriver, BoardError, BusGuard, StreamOptions};
use bioamp_dsp::{BandpassConfig, FilterPipeline};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::state::{LiveEvent, RunState, SharedState, Settings};

/// REF readings whose window mean exceeds this are treated as unreferenced or
/// saturated and replaced by their z-scores.
const REF_SATURATION_THRESHOLD: f64 = 1000.0;

/// Grace period between requesting a stop and force-releasing the bus.
const STOP_GRACE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("resource conflict: {0}")]
    Conflict(&'static str),
    #[error("board error: {0}")]
    Board(#[from] BoardError),
    #[error("calibration failed: {0}")]
    Calibration(String),
}

pub type SharedDriver = Arc<AsyncMutex<Box<dyn BoardDriver>>>;

struct LoopHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct AcquisitionService {
    pub(crate) shared: Arc<SharedState>,
    pub(crate) driver: SharedDriver,
    pub(crate) guard: AsyncMutex<Box<dyn BusGuard>>,
    pub(crate) config: Arc<DaemonConfig>,
    running: std::sync::Mutex<Option<LoopHandle>>,
}

pub(crate) fn stream_options(settings: &Settings) -> StreamOptions {
    StreamOptions {
        enabled_channels: settings.enabled_channels,
        ref_enabled: settings.ref_enabled,
        biasout_enabled: settings.biasout_enabled,
    }
}

impl AcquisitionService {
    pub fn new(
        shared: Arc<SharedState>,
        driver: Box<dyn BoardDriver>,
        guard: Box<dyn BusGuard>,
        config: Arc<DaemonConfig>,
    ) -> Self {
        Self {
            shared,
            driver: Arc::new(AsyncMutex::new(driver)),
            guard: AsyncMutex::new(guard),
            config,
            running: std::sync::Mutex::new(None),
        }
    }

    /// Starts the acquisition loop. Requires the service to be idle; probes
    /// the bus for conflicting use before claiming a board session.
    pub async fn start(&self) -> Result<(), ControlError> {
        if !self.shared.transition_if(RunState::Idle, RunState::Starting) {
            return Err(ControlError::Conflict("acquisition already in progress"));
        }

        {
            let mut guard = self.guard.lock().await;
            // Clear any stale handle left behind by a previous session.
            guard.release();
            if guard.probe_conflict() {
                self.shared.set_run_state(RunState::Idle);
                return Err(ControlError::Conflict("bus or DRDY pin held by another process"));
            }
        }

        let settings = self.shared.snapshot_settings();
        let options = stream_options(&settings);
        {
            let mut driver = self.driver.lock().await;
            if let Err(e) = driver.prepare_session() {
                self.shared.set_run_state(RunState::Idle);
                return Err(e.into());
            }
            if let Err(e) = driver.start_stream(self.config.stream_buffer_size, &options) {
                if let Err(re) = driver.release_session() {
                    warn!("session release after failed stream start: {re}");
                }
                self.shared.set_run_state(RunState::Idle);
                return Err(e.into());
            }
        }

        *self.shared.buffers.write().unwrap() = vec![Vec::new(); settings.enabled_channels];
        self.shared.set_run_state(RunState::Running);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.shared.clone(),
            self.driver.clone(),
            cancel.clone(),
            self.config.cycle_interval(),
        ));
        *self.running.lock().unwrap() = Some(LoopHandle { task, cancel });
        info!("acquisition started ({} channels)", settings.enabled_channels);
        Ok(())
    }

    /// Requests a cooperative stop, then force-releases the bus after a grace
    /// period whether or not the loop has exited. A no-op when already idle.
    pub async fn stop(&self) {
        let handle = self.running.lock().unwrap().take();
        let Some(LoopHandle { task, cancel }) = handle else {
            debug!("stop requested while idle");
            return;
        };
        cancel.cancel();
        if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
            warn!("acquisition loop did not exit within {STOP_GRACE:?}; releasing the bus anyway");
        }
        self.guard.lock().await.release();
    }

    /// Ordered channel metadata straight from the board.
    pub async fn board_channels(&self) -> Vec<usize> {
        self.driver.lock().await.eeg_channels()
    }
}

async fn run_loop(
    shared: Arc<SharedState>,
    driver: SharedDriver,
    cancel: CancellationToken,
    interval: Duration,
) {
    info!("acquisition loop running");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let settings = shared.snapshot_settings();
        match run_cycle(&shared, &driver, &settings).await {
            Ok(true) => {}
            Ok(false) => debug!("empty window, cycle skipped"),
            // Driver hiccups skip the cycle; they never change the run state.
            Err(e) => warn!("acquisition cycle error: {e}"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    shared.set_run_state(RunState::Stopping);
    {
        let mut driver = driver.lock().await;
        if let Err(e) = driver.stop_stream() {
            warn!("stream stop failed: {e}");
        }
        if let Err(e) = driver.release_session() {
            warn!("session release failed: {e}");
        }
    }
    shared.set_run_state(RunState::Idle);
    shared.publish(LiveEvent::AnalysisStopped);
    info!("acquisition loop stopped");
}

/// One cycle: pull → filter → baseline → REF-normalize → buffer → publish.
/// Returns Ok(false) when the board had nothing for us.
async fn run_cycle(
    shared: &SharedState,
    driver: &SharedDriver,
    settings: &Settings,
) -> Result<bool, BoardError> {
    let (mut windows, rate) = {
        let mut driver = driver.lock().await;
        let rate = driver.sampling_rate();
        let windows = driver.get_current_board_data(rate as usize)?;
        let windows = windows
            .into_iter()
            .take(settings.enabled_channels)
            .collect::<Vec<_>>();
        (windows, rate)
    };
    if windows.is_empty() || windows.iter().any(|w| w.is_empty()) {
        return Ok(false);
    }
    debug!("pulled {} samples on {} channels", windows[0].len(), windows.len());

    if settings.bandpass_filter_enabled {
        let pipeline = FilterPipeline::new(rate as f64);
        let band = BandpassConfig {
            lowcut: settings.lowcut,
            highcut: settings.highcut,
            order: settings.order,
        };
        for (channel, window) in windows.iter_mut().enumerate() {
            match pipeline.process(window, &band) {
                Ok(filtered) => *window = filtered,
                // Per-channel isolation: this channel passes through raw.
                Err(e) => warn!("filter failed on channel {channel}, passing raw data: {e}"),
            }
        }
    }

    if settings.baseline_correction_enabled {
        let calibration = shared.calibration.read().unwrap();
        for (channel, window) in windows.iter_mut().enumerate() {
            let offset = calibration.get(channel).copied().unwrap_or(0.0);
            for value in window.iter_mut() {
                *value -= offset;
            }
        }
    }

    normalize_reference(&mut windows[0]);

    let preview: Vec<f64> = windows.iter().map(|w| w[0]).collect();
    {
        let mut buffers = shared.buffers.write().unwrap();
        if buffers.len() != windows.len() {
            // enabled_channels changed mid-run; restart the buffers so the
            // equal-length invariant holds.
            warn!("channel count changed mid-run, resetting buffers");
            *buffers = vec![Vec::new(); windows.len()];
        }
        for (buffer, window) in buffers.iter_mut().zip(&windows) {
            buffer.extend_from_slice(window);
        }
    }

    shared.publish(LiveEvent::UpdateData { raw: preview });
    Ok(true)
}

/// Saturation heuristic for the reference electrode (channel 0): when the
/// window mean exceeds the threshold, the readings are likely unreferenced,
/// so the window is replaced by its z-scores.
pub fn normalize_reference(window: &mut [f64]) {
    if window.is_empty() {
        return;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    debug!("REF channel mean={mean:.3} std={std:.3}");

    if mean > REF_SATURATION_THRESHOLD && std > 0.0 {
        for value in window.iter_mut() {
            *value = (*value - mean) / std;
        }
    }
}
