//! Direct SPI backend for ADS1299-based sensing boards.
//!
//! Reads 24-bit samples in continuous-read mode, paced by the falling edge of
//! the DRDY line. Only the register writes needed for the daemon's stream
//! options are issued here; full front-end configuration belongs to the board
//! firmware defaults.

use std::time::Duration;

use log::{info, warn};
use rppal::gpio::{Gpio, InputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::types::{BoardDriver, BoardError, StreamOptions};

// ADS1299 commands
const CMD_START: u8 = 0x08;
const CMD_STOP: u8 = 0x0A;
const CMD_RDATAC: u8 = 0x10;
const CMD_SDATAC: u8 = 0x11;
const CMD_WREG: u8 = 0x40;

// Registers touched by the stream options
const CONFIG3_ADDR: u8 = 0x03;
const CONFIG3_BASE: u8 = 0x60;
const PD_REFBUF: u8 = 1 << 7;
const BIASREF_INT: u8 = 1 << 3;
const PD_BIAS: u8 = 1 << 2;
const MISC1_ADDR: u8 = 0x15;
const SRB1: u8 = 1 << 5;

/// DRDY line on the GPIO header.
pub const DEFAULT_DRDY_PIN: u8 = 26;

const SPI_CLOCK_HZ: u32 = 1_000_000;
const SAMPLE_RATE_HZ: u32 = 250;
const NUM_CHANNELS: usize = 8;
const VREF_VOLTS: f64 = 4.5;
const GAIN: f64 = 1.0;
/// One DRDY period at 250 Hz is 4 ms; twice that before a pull gives up.
const DRDY_TIMEOUT: Duration = Duration::from_millis(8);

struct SpiSession {
    spi: Spi,
    drdy: InputPin,
}

pub struct SpiBoard {
    drdy_pin: u8,
    session: Option<SpiSession>,
    streaming: bool,
    channels: usize,
}

impl SpiBoard {
    pub fn new(drdy_pin: u8) -> Self {
        Self { drdy_pin, session: None, streaming: false, channels: NUM_CHANNELS }
    }
}

fn send_command(spi: &mut Spi, command: u8) -> Result<(), BoardError> {
    spi.write(&[command])?;
    Ok(())
}

fn write_register(spi: &mut Spi, address: u8, value: u8) -> Result<(), BoardError> {
    // WREG opcode, one register, then the value.
    spi.write(&[CMD_WREG | address, 0x00, value])?;
    Ok(())
}

/// Convert 24-bit SPI data to a signed 32-bit integer (sign-extended).
fn sign_extend_24(msb: u8, mid: u8, lsb: u8) -> i32 {
    let raw = ((msb as u32) << 16) | ((mid as u32) << 8) | (lsb as u32);
    ((raw as i32) << 8) >> 8
}

/// Raw ADC counts to microvolts: raw * (VREF / gain) / 2^23.
fn raw_to_microvolts(raw: i32) -> f64 {
    raw as f64 * (VREF_VOLTS / GAIN) / (1 << 23) as f64 * 1e6
}

/// One RDATAC frame: 3 status bytes, then 3 bytes per channel. The full
/// frame is always clocked out regardless of how many channels are enabled.
fn read_frame(spi: &mut Spi, channels: usize) -> Result<Vec<f64>, BoardError> {
    let total = 3 + 3 * NUM_CHANNELS;
    let mut read_buffer = vec![0u8; total];
    let write_buffer = vec![0u8; total];
    spi.transfer(&mut read_buffer, &write_buffer)?;

    let mut samples = Vec::with_capacity(channels);
    for channel in 0..channels {
        let base = 3 + channel * 3;
        let raw = sign_extend_24(read_buffer[base], read_buffer[base + 1], read_buffer[base + 2]);
        samples.push(raw_to_microvolts(raw));
    }
    Ok(samples)
}

impl BoardDriver for SpiBoard {
    fn prepare_session(&mut self) -> Result<(), BoardError> {
        if self.session.is_some() {
            return Err(BoardError::SessionBusy);
        }
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode1)?;
        let mut drdy = Gpio::new()?.get(self.drdy_pin)?.into_input_pullup();
        drdy.set_interrupt(Trigger::FallingEdge, None)?;
        self.session = Some(SpiSession { spi, drdy });
        info!("SPI session prepared (DRDY on GPIO {})", self.drdy_pin);
        Ok(())
    }

    fn start_stream(&mut self, _ring_buffer: usize, options: &StreamOptions) -> Result<(), BoardError> {
        let session = self.session.as_mut().ok_or(BoardError::NoSession)?;
        self.channels = options.enabled_channels.min(NUM_CHANNELS);

        send_command(&mut session.spi, CMD_SDATAC)?;
        let mut config3 = CONFIG3_BASE | BIASREF_INT | PD_REFBUF;
        if options.biasout_enabled {
            config3 |= PD_BIAS;
        }
        write_register(&mut session.spi, CONFIG3_ADDR, config3)?;
        let misc1 = if options.ref_enabled { SRB1 } else { 0x00 };
        write_register(&mut session.spi, MISC1_ADDR, misc1)?;
        send_command(&mut session.spi, CMD_START)?;
        send_command(&mut session.spi, CMD_RDATAC)?;

        self.streaming = true;
        info!("SPI stream started ({} channels)", self.channels);
        Ok(())
    }

    fn get_current_board_data(&mut self, rate_hint: usize) -> Result<Vec<Vec<f64>>, BoardError> {
        if !self.streaming {
            return Err(BoardError::StreamStopped);
        }
        let session = self.session.as_mut().ok_or(BoardError::NoSession)?;

        let mut windows = vec![Vec::new(); self.channels];
        for _ in 0..rate_hint {
            match session.drdy.poll_interrupt(true, Some(DRDY_TIMEOUT)) {
                Ok(Some(_)) => {
                    let frame = read_frame(&mut session.spi, self.channels)?;
                    for (window, sample) in windows.iter_mut().zip(frame) {
                        window.push(sample);
                    }
                }
                // DRDY went quiet, return the burst collected so far.
                Ok(None) => break,
                Err(e) => return Err(BoardError::from(e)),
            }
        }
        Ok(windows)
    }

    fn stop_stream(&mut self) -> Result<(), BoardError> {
        if let Some(session) = self.session.as_mut() {
            send_command(&mut session.spi, CMD_SDATAC)?;
            send_command(&mut session.spi, CMD_STOP)?;
        }
        self.streaming = false;
        Ok(())
    }

    fn release_session(&mut self) -> Result<(), BoardError> {
        if self.streaming {
            warn!("releasing SPI session while the stream is still marked running");
        }
        self.streaming = false;
        if self.session.take().is_some() {
            info!("SPI session released");
        }
        Ok(())
    }

    fn eeg_channels(&self) -> Vec<usize> {
        (0..NUM_CHANNELS).collect()
    }

    fn sampling_rate(&self) -> u32 {
        SAMPLE_RATE_HZ
    }
}
