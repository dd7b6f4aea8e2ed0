//! Baseline calibration against a quiescent signal.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::acquisition::{stream_options, AcquisitionService, ControlError};

/// Fixed accumulation window of a calibration run.
pub const CALIBRATION_DURATION: Duration = Duration::from_secs(5);
const PULL_INTERVAL: Duration = Duration::from_millis(200);

impl AcquisitionService {
    /// Runs a dedicated acquisition burst and replaces the per-channel
    /// baseline offsets with the observed means.
    ///
    /// All-or-nothing: a driver error mid-run discards the partial
    /// accumulation and leaves the stored calibration untouched. No filtering
    /// is applied to the accumulated samples.
    pub async fn calibrate(&self) -> Result<Vec<f64>, ControlError> {
        let settings = self.shared.snapshot_settings();
        let options = stream_options(&settings);
        let enabled = settings.enabled_channels;

        let mut driver = self.driver.lock().await;
        driver
            .prepare_session()
            .map_err(|e| ControlError::Calibration(e.to_string()))?;
        if let Err(e) = driver.start_stream(self.config.stream_buffer_size, &options) {
            if let Err(re) = driver.release_session() {
                warn!("session release after failed calibration start: {re}");
            }
            return Err(ControlError::Calibration(e.to_string()));
        }
        info!("calibration started ({enabled} channels, {CALIBRATION_DURATION:?})");

        let rate = driver.sampling_rate() as usize;
        let mut accumulated: Vec<Vec<f64>> = vec![Vec::new(); enabled];
        let deadline = Instant::now() + CALIBRATION_DURATION;
        let mut outcome = Ok(());
        while Instant::now() < deadline {
            match driver.get_current_board_data(rate) {
                Ok(windows) if windows.iter().all(|w| w.is_empty()) => {
                    warn!("no data in calibration pull");
                }
                Ok(windows) => {
                    for (channel, window) in accumulated.iter_mut().zip(windows.iter().take(enabled)) {
                        channel.extend_from_slice(window);
                    }
                }
                Err(e) => {
                    outcome = Err(ControlError::Calibration(e.to_string()));
                    break;
                }
            }
            tokio::time::sleep(PULL_INTERVAL).await;
        }

        // Best-effort teardown either way; the session must not stay claimed.
        if let Err(e) = driver.stop_stream() {
            warn!("calibration stream stop failed: {e}");
        }
        if let Err(e) = driver.release_session() {
            warn!("calibration session release failed: {e}");
        }
        outcome?;

        if accumulated.iter().any(|channel| channel.is_empty()) {
            return Err(ControlError::Calibration("no samples accumulated".into()));
        }
        let means: Vec<f64> = accumulated
            .iter()
            .map(|channel| channel.iter().sum::<f64>() / channel.len() as f64)
            .collect();
        *self.shared.calibration.write().unwrap() = means.clone();
        info!("calibration complete: {means:?}");
        Ok(means)
    }
}
