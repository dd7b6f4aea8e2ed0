//! Service-level tests driving the acquisition state machine against stubbed
//! board hardware, under tokio's paused test clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bioamp_board::{BoardDriver, BoardError, BusGuard, StreamOptions};
use bioamp_daemon::acquisition::{normalize_reference, AcquisitionService, ControlError};
use bioamp_daemon::config::DaemonConfig;
use bioamp_daemon::state::{LiveEvent, RunState, Settings, SharedState};

const WINDOW: usize = 250;

/// Board stub producing fixed-value windows, optionally with a small
/// deterministic jitter, and an optional scripted failure.
struct StubBoard {
    value: f64,
    jitter: bool,
    prepared: bool,
    streaming: bool,
    channels: usize,
    pulls: usize,
    fail_after_pulls: Option<usize>,
}

impl StubBoard {
    fn with_value(value: f64) -> Self {
        Self {
            value,
            jitter: false,
            prepared: false,
            streaming: false,
            channels: 8,
            pulls: 0,
            fail_after_pulls: None,
        }
    }

    fn with_jitter(value: f64) -> Self {
        Self { jitter: true, ..Self::with_value(value) }
    }

    fn failing_after(value: f64, pulls: usize) -> Self {
        Self { fail_after_pulls: Some(pulls), ..Self::with_value(value) }
    }
}

impl BoardDriver for StubBoard {
    fn prepare_session(&mut self) -> Result<(), BoardError> {
        if self.prepared {
            return Err(BoardError::SessionBusy);
        }
        self.prepared = true;
        Ok(())
    }

    fn start_stream(&mut self, _ring_buffer: usize, options: &StreamOptions) -> Result<(), BoardError> {
        if !self.prepared {
            return Err(BoardError::NoSession);
        }
        self.channels = options.enabled_channels;
        self.streaming = true;
        Ok(())
    }

    fn get_current_board_data(&mut self, rate_hint: usize) -> Result<Vec<Vec<f64>>, BoardError> {
        if !self.streaming {
            return Err(BoardError::StreamStopped);
        }
        self.pulls += 1;
        if let Some(limit) = self.fail_after_pulls {
            if self.pulls > limit {
                return Err(BoardError::Acquisition("stub failure".into()));
            }
        }
        let window: Vec<f64> = (0..rate_hint.min(WINDOW))
            .map(|i| {
                if self.jitter {
                    self.value + (i % 5) as f64
                } else {
                    self.value
                }
            })
            .collect();
        Ok(vec![window; self.channels])
    }

    fn stop_stream(&mut self) -> Result<(), BoardError> {
        self.streaming = false;
        Ok(())
    }

    fn release_session(&mut self) -> Result<(), BoardError> {
        self.streaming = false;
        self.prepared = false;
        Ok(())
    }

    fn eeg_channels(&self) -> Vec<usize> {
        (0..8).collect()
    }

    fn sampling_rate(&self) -> u32 {
        WINDOW as u32
    }
}

struct StubGuard {
    conflict: bool,
    releases: Arc<Mutex<usize>>,
}

impl StubGuard {
    fn clean() -> (Self, Arc<Mutex<usize>>) {
        let releases = Arc::new(Mutex::new(0));
        (Self { conflict: false, releases: releases.clone() }, releases)
    }

    fn conflicted() -> Self {
        Self { conflict: true, releases: Arc::new(Mutex::new(0)) }
    }
}

impl BusGuard for StubGuard {
    fn release(&mut self) {
        *self.releases.lock().unwrap() += 1;
    }

    fn probe_conflict(&mut self) -> bool {
        self.conflict
    }
}

fn service_with(driver: StubBoard, guard: StubGuard) -> (Arc<SharedState>, AcquisitionService) {
    let shared = Arc::new(SharedState::new(Settings::default()));
    let config = Arc::new(DaemonConfig::default());
    let service = AcquisitionService::new(shared.clone(), Box::new(driver), Box::new(guard), config);
    (shared, service)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn cycles_fill_all_buffers_equally() {
    let (guard, _) = StubGuard::clean();
    let (shared, service) = service_with(StubBoard::with_value(1.0), guard);

    service.start().await.unwrap();
    assert_eq!(shared.run_state(), RunState::Running);

    wait_for(|| !shared.buffers.read().unwrap()[0].is_empty()).await;
    {
        let buffers = shared.buffers.read().unwrap();
        assert_eq!(buffers.len(), 8);
        let first = buffers[0].len();
        assert!(first > 0 && first % WINDOW == 0);
        assert!(buffers.iter().all(|b| b.len() == first));
    }

    let mut events = shared.subscribe();
    service.stop().await;
    wait_for(|| shared.run_state() == RunState::Idle).await;

    // The loop announces its own exit on the live channel.
    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(LiveEvent::AnalysisStopped) => break true,
                Ok(_) => continue,
                Err(_) => break false,
            }
        }
    })
    .await
    .unwrap();
    assert!(stopped);
}

#[tokio::test(start_paused = true)]
async fn update_events_carry_one_value_per_channel() {
    let (guard, _) = StubGuard::clean();
    let (shared, service) = service_with(StubBoard::with_value(7.5), guard);

    let mut events = shared.subscribe();
    service.start().await.unwrap();

    let raw = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(LiveEvent::UpdateData { raw }) = events.recv().await {
                break raw;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(raw.len(), 8);
    assert!(raw.iter().all(|v| (*v - 7.5).abs() < f64::EPSILON));

    service.stop().await;
}

#[tokio::test]
async fn stop_when_idle_is_a_noop() {
    let (guard, releases) = StubGuard::clean();
    let (shared, service) = service_with(StubBoard::with_value(0.0), guard);

    service.stop().await;
    assert_eq!(shared.run_state(), RunState::Idle);
    // No force-release happens when nothing was running.
    assert_eq!(*releases.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn conflict_probe_blocks_start_and_leaves_buffers() {
    let (shared, service) = service_with(StubBoard::with_value(0.0), StubGuard::conflicted());
    shared.buffers.write().unwrap()[0].push(42.0);

    let err = service.start().await.unwrap_err();
    assert!(matches!(err, ControlError::Conflict(_)));
    assert_eq!(shared.run_state(), RunState::Idle);
    assert_eq!(shared.buffers.read().unwrap()[0], vec![42.0]);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_a_conflict() {
    let (guard, _) = StubGuard::clean();
    let (_shared, service) = service_with(StubBoard::with_value(0.0), guard);

    service.start().await.unwrap();
    assert!(matches!(service.start().await, Err(ControlError::Conflict(_))));
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn start_resets_buffers_from_previous_run() {
    let (guard, _) = StubGuard::clean();
    let (shared, service) = service_with(StubBoard::with_value(3.0), guard);

    service.start().await.unwrap();
    wait_for(|| !shared.buffers.read().unwrap()[0].is_empty()).await;
    service.stop().await;
    wait_for(|| shared.run_state() == RunState::Idle).await;

    service.start().await.unwrap();
    // start() resets the buffers before the new loop's first cycle runs.
    assert!(shared.buffers.read().unwrap().iter().all(|b| b.is_empty()));
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn calibration_yields_channel_means() {
    let (guard, _) = StubGuard::clean();
    let (shared, service) = service_with(StubBoard::with_value(2.5), guard);

    let means = service.calibrate().await.unwrap();
    assert_eq!(means.len(), 8);
    assert!(means.iter().all(|m| (m - 2.5).abs() < 1e-9));
    assert_eq!(*shared.calibration.read().unwrap(), means);
}

#[tokio::test(start_paused = true)]
async fn failed_calibration_leaves_previous_offsets() {
    let (guard, _) = StubGuard::clean();
    let (shared, service) = service_with(StubBoard::failing_after(2.5, 2), guard);
    *shared.calibration.write().unwrap() = vec![9.0; 8];

    let err = service.calibrate().await.unwrap_err();
    assert!(matches!(err, ControlError::Calibration(_)));
    assert_eq!(*shared.calibration.read().unwrap(), vec![9.0; 8]);
}

#[tokio::test(start_paused = true)]
async fn calibration_while_running_fails_without_touching_offsets() {
    let (guard, _) = StubGuard::clean();
    let (shared, service) = service_with(StubBoard::with_value(1.0), guard);

    service.start().await.unwrap();
    wait_for(|| !shared.buffers.read().unwrap()[0].is_empty()).await;

    // The loop's session still holds the board.
    let err = service.calibrate().await.unwrap_err();
    assert!(matches!(err, ControlError::Calibration(_)));
    assert_eq!(*shared.calibration.read().unwrap(), vec![0.0; 8]);

    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn saturated_reference_channel_is_z_scored() {
    let (guard, _) = StubGuard::clean();
    let (shared, service) = service_with(StubBoard::with_jitter(1500.0), guard);

    service.start().await.unwrap();
    wait_for(|| !shared.buffers.read().unwrap()[0].is_empty()).await;
    service.stop().await;

    let buffers = shared.buffers.read().unwrap();
    let reference = &buffers[0][..WINDOW];
    let n = reference.len() as f64;
    let mean = reference.iter().sum::<f64>() / n;
    let std = (reference.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    assert!(mean.abs() < 1e-6, "normalized REF mean was {mean}");
    assert!((std - 1.0).abs() < 1e-6, "normalized REF std was {std}");
    // Non-reference channels keep their raw scale.
    assert_eq!(buffers[1][0], 1500.0);
}

#[tokio::test]
async fn board_channel_metadata_is_exposed() {
    let (guard, _) = StubGuard::clean();
    let (_shared, service) = service_with(StubBoard::with_value(0.0), guard);
    assert_eq!(service.board_channels().await, (0..8).collect::<Vec<_>>());
}

#[test]
fn reference_below_threshold_is_untouched() {
    let mut window: Vec<f64> = (0..10).map(|i| 500.0 + i as f64).collect();
    let original = window.clone();
    normalize_reference(&mut window);
    assert_eq!(window, original);
}

#[test]
fn constant_saturated_reference_is_left_alone() {
    // Zero variance: z-scoring would divide by zero, so the window stays raw.
    let mut window = vec![1500.0; 10];
    normalize_reference(&mut window);
    assert_eq!(window, vec![1500.0; 10]);
}
