//! Common types and traits for sensing-board backends.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoardError {
    /// SPI communication error
    #[error("SPI error: {0}")]
    Spi(String),
    /// GPIO error
    #[error("GPIO error: {0}")]
    Gpio(String),
    /// A session is already prepared on this board
    #[error("session already in use")]
    SessionBusy,
    /// Operation requires a prepared session
    #[error("no prepared session")]
    NoSession,
    /// Operation requires a running stream
    #[error("stream is not running")]
    StreamStopped,
    /// Data acquisition failed mid-stream
    #[error("acquisition error: {0}")]
    Acquisition(String),
}

impl From<rppal::spi::Error> for BoardError {
    fn from(err: rppal::spi::Error) -> Self {
        BoardError::Spi(err.to_string())
    }
}

impl From<rppal::gpio::Error> for BoardError {
    fn from(err: rppal::gpio::Error) -> Self {
        BoardError::Gpio(err.to_string())
    }
}

/// Per-stream options handed to the board when acquisition starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Number of channels the daemon wants windows for.
    pub enabled_channels: usize,
    /// Route the reference electrode (SRB1) to all channel inputs.
    pub ref_enabled: bool,
    /// Drive the BIASOUT electrode from the internal bias buffer.
    pub biasout_enabled: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { enabled_channels: 8, ref_enabled: true, biasout_enabled: true }
    }
}

/// Trait every sensing-board backend implements.
///
/// Session lifecycle: `prepare_session` → `start_stream` → repeated
/// `get_current_board_data` pulls → `stop_stream` → `release_session`.
pub trait BoardDriver: Send {
    /// Claim the board for a session. Fails with [`BoardError::SessionBusy`]
    /// if a session is already prepared.
    fn prepare_session(&mut self) -> Result<(), BoardError>;

    /// Start streaming into the board-side ring buffer.
    fn start_stream(&mut self, ring_buffer: usize, options: &StreamOptions) -> Result<(), BoardError>;

    /// Snapshot of the latest data: one window per enabled channel, at most
    /// `rate_hint` samples each. Windows may be shorter (or empty) when the
    /// ring buffer has drained; all windows have equal length.
    fn get_current_board_data(&mut self, rate_hint: usize) -> Result<Vec<Vec<f64>>, BoardError>;

    /// Stop streaming, keeping the session prepared.
    fn stop_stream(&mut self) -> Result<(), BoardError>;

    /// Release the session and any hardware handles it holds.
    fn release_session(&mut self) -> Result<(), BoardError>;

    /// Ordered indexes of the board's EEG channels.
    fn eeg_channels(&self) -> Vec<usize>;

    /// Nominal sampling rate in Hz.
    fn sampling_rate(&self) -> u32;
}
