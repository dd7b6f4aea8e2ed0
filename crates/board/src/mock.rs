//! A synthetic sensing board that does not touch any hardware.

use std::f64::consts::PI;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{BoardDriver, BoardError, StreamOptions};

const MOCK_CHANNELS: usize = 8;
const MOCK_SAMPLE_RATE: u32 = 250;

/// Mock board producing EEG-like data: a per-channel oscillation plus an
/// alpha-band component and measurement noise, in microvolt-scale units.
pub struct MockBoard {
    prepared: bool,
    streaming: bool,
    options: StreamOptions,
    rng: StdRng,
    /// Samples generated since the stream started, drives the waveform phase.
    clock: u64,
}

impl MockBoard {
    pub fn new() -> Self {
        Self {
            prepared: false,
            streaming: false,
            options: StreamOptions::default(),
            rng: StdRng::from_entropy(),
            clock: 0,
        }
    }

    fn sample(&mut self, channel: usize, tick: u64) -> f64 {
        let t = tick as f64 / MOCK_SAMPLE_RATE as f64;
        let channel_freq = 2.0 + channel as f64 * 4.0;
        let alpha = 30.0 * (2.0 * PI * 10.0 * t).sin();
        let slow = 20.0 * (2.0 * PI * channel_freq * t).sin();
        let noise: f64 = self.rng.gen_range(-10.0..10.0);
        alpha + slow + noise
    }
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardDriver for MockBoard {
    fn prepare_session(&mut self) -> Result<(), BoardError> {
        if self.prepared {
            return Err(BoardError::SessionBusy);
        }
        self.prepared = true;
        info!("mock board session prepared");
        Ok(())
    }

    fn start_stream(&mut self, ring_buffer: usize, options: &StreamOptions) -> Result<(), BoardError> {
        if !self.prepared {
            return Err(BoardError::NoSession);
        }
        self.options = options.clone();
        self.streaming = true;
        self.clock = 0;
        info!("mock stream started (ring buffer {ring_buffer}, options {options:?})");
        Ok(())
    }

    fn get_current_board_data(&mut self, rate_hint: usize) -> Result<Vec<Vec<f64>>, BoardError> {
        if !self.streaming {
            return Err(BoardError::StreamStopped);
        }
        let channels = self.options.enabled_channels.min(MOCK_CHANNELS);
        let mut windows = vec![Vec::with_capacity(rate_hint); channels];
        for offset in 0..rate_hint {
            let tick = self.clock + offset as u64;
            for (channel, window) in windows.iter_mut().enumerate() {
                let value = self.sample(channel, tick);
                window.push(value);
            }
        }
        self.clock += rate_hint as u64;
        debug!("mock board produced {rate_hint} samples on {channels} channels");
        Ok(windows)
    }

    fn stop_stream(&mut self) -> Result<(), BoardError> {
        self.streaming = false;
        Ok(())
    }

    fn release_session(&mut self) -> Result<(), BoardError> {
        self.streaming = false;
        self.prepared = false;
        info!("mock board session released");
        Ok(())
    }

    fn eeg_channels(&self) -> Vec<usize> {
        (0..MOCK_CHANNELS).collect()
    }

    fn sampling_rate(&self) -> u32 {
        MOCK_SAMPLE_RATE
    }
}
