//! Shared mutable state of the acquisition service.
//!
//! One container owns everything the loop, the control surface, and the
//! live-update transport share: settings, calibration offsets, the channel
//! buffers, the run state, and the event channel. Handlers reach it through
//! an `Arc`; each lock covers exactly one of the concerns.

use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// How sample windows are pulled from the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMethod {
    /// Board-side ring buffer, snapshot per cycle.
    BoardStream,
    /// Frame-by-frame reads over the raw SPI bus.
    DirectSpi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Bandpass low cutoff in Hz
    pub lowcut: f64,
    /// Bandpass high cutoff in Hz
    pub highcut: f64,
    /// Bandpass filter order
    pub order: u32,
    pub enabled_channels: usize,
    pub ref_enabled: bool,
    pub biasout_enabled: bool,
    pub bandpass_filter_enabled: bool,
    pub baseline_correction_enabled: bool,
    pub smoothing_enabled: bool,
    pub acquisition_method: AcquisitionMethod,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lowcut: 3.0,
            highcut: 45.0,
            order: 2,
            enabled_channels: 8,
            ref_enabled: true,
            biasout_enabled: true,
            bandpass_filter_enabled: false,
            baseline_correction_enabled: false,
            smoothing_enabled: false,
            acquisition_method: AcquisitionMethod::BoardStream,
        }
    }
}

/// Partial settings update: fields present in the request overwrite the
/// stored values, absent fields keep them. Values are taken as-is, sanity of
/// the ranges is the caller's responsibility.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub lowcut: Option<f64>,
    pub highcut: Option<f64>,
    pub order: Option<u32>,
    pub enabled_channels: Option<usize>,
    pub ref_enabled: Option<bool>,
    pub biasout_enabled: Option<bool>,
    pub bandpass_filter_enabled: Option<bool>,
    pub baseline_correction_enabled: Option<bool>,
    pub smoothing_enabled: Option<bool>,
    pub acquisition_method: Option<AcquisitionMethod>,
}

impl Settings {
    pub fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.lowcut {
            self.lowcut = v;
        }
        if let Some(v) = patch.highcut {
            self.highcut = v;
        }
        if let Some(v) = patch.order {
            self.order = v;
        }
        if let Some(v) = patch.enabled_channels {
            self.enabled_channels = v;
        }
        if let Some(v) = patch.ref_enabled {
            self.ref_enabled = v;
        }
        if let Some(v) = patch.biasout_enabled {
            self.biasout_enabled = v;
        }
        if let Some(v) = patch.bandpass_filter_enabled {
            self.bandpass_filter_enabled = v;
        }
        if let Some(v) = patch.baseline_correction_enabled {
            self.baseline_correction_enabled = v;
        }
        if let Some(v) = patch.smoothing_enabled {
            self.smoothing_enabled = v;
        }
        if let Some(v) = patch.acquisition_method {
            self.acquisition_method = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Events pushed to live-update subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Newest sample per channel, one event per acquisition cycle.
    UpdateData { raw: Vec<f64> },
    AnalysisStopped,
}

pub struct SharedState {
    pub settings: RwLock<Settings>,
    /// Per-channel baseline offsets, replaced wholesale by calibration.
    pub calibration: RwLock<Vec<f64>>,
    /// Per-channel sample buffers, reset at the start of each run.
    pub buffers: RwLock<Vec<Vec<f64>>>,
    run_state: Mutex<RunState>,
    events: broadcast::Sender<LiveEvent>,
}

impl SharedState {
    pub fn new(settings: Settings) -> Self {
        let channels = settings.enabled_channels;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings: RwLock::new(settings),
            calibration: RwLock::new(vec![0.0; channels]),
            buffers: RwLock::new(vec![Vec::new(); channels]),
            run_state: Mutex::new(RunState::Idle),
            events,
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.run_state.lock().unwrap()
    }

    pub fn set_run_state(&self, next: RunState) {
        *self.run_state.lock().unwrap() = next;
    }

    /// Atomically moves `from` → `to`; returns false if the state was
    /// something else, leaving it untouched.
    pub fn transition_if(&self, from: RunState, to: RunState) -> bool {
        let mut state = self.run_state.lock().unwrap();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// One settings read per cycle; mid-cycle writers are seen next cycle.
    pub fn snapshot_settings(&self) -> Settings {
        self.settings.read().unwrap().clone()
    }

    pub fn update_settings(&self, patch: &SettingsPatch) -> Settings {
        let mut settings = self.settings.write().unwrap();
        settings.merge(patch);
        settings.clone()
    }

    pub fn publish(&self, event: LiveEvent) {
        // A send error just means nobody is subscribed right now.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_overwrites_present_fields_only() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            lowcut: Some(1.0),
            bandpass_filter_enabled: Some(true),
            ..SettingsPatch::default()
        };
        settings.merge(&patch);
        assert_eq!(settings.lowcut, 1.0);
        assert!(settings.bandpass_filter_enabled);
        // Untouched fields keep their defaults.
        assert_eq!(settings.highcut, 45.0);
        assert_eq!(settings.enabled_channels, 8);
        assert!(settings.ref_enabled);
    }

    #[test]
    fn empty_patch_is_a_noop() {
        let mut settings = Settings::default();
        settings.merge(&SettingsPatch::default());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn patch_deserializes_from_partial_json() {
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"highcut": 30.0, "acquisition_method": "direct_spi"}"#).unwrap();
        assert_eq!(patch.highcut, Some(30.0));
        assert_eq!(patch.acquisition_method, Some(AcquisitionMethod::DirectSpi));
        assert!(patch.lowcut.is_none());
    }

    #[test]
    fn transition_requires_expected_state() {
        let shared = SharedState::new(Settings::default());
        assert!(shared.transition_if(RunState::Idle, RunState::Starting));
        assert!(!shared.transition_if(RunState::Idle, RunState::Starting));
        assert_eq!(shared.run_state(), RunState::Starting);
    }
}
