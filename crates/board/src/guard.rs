//! Bus/pin lifecycle guard used before (re)starting acquisition.

use log::{info, warn};
use rppal::gpio::{Gpio, InputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

/// Guards the physical interface a sensing board hangs off.
pub trait BusGuard: Send {
    /// Idempotently close any held bus/pin handles. Best-effort: each
    /// resource is attempted even if an earlier one failed, and failures are
    /// logged, never propagated.
    fn release(&mut self);

    /// Throwaway acquisition of the same resources the real session will
    /// claim. `false` means the probe succeeded and was released; `true`
    /// means something else holds them. A heuristic, not a lock: the
    /// resource can still be grabbed between the probe and the session.
    fn probe_conflict(&mut self) -> bool;
}

const PROBE_CLOCK_HZ: u32 = 1_000_000;

/// Guard over the SPI bus and the DRDY GPIO line.
pub struct SpiGpioGuard {
    drdy_pin: u8,
    spi: Option<Spi>,
    drdy: Option<InputPin>,
}

impl SpiGpioGuard {
    pub fn new(drdy_pin: u8) -> Self {
        Self { drdy_pin, spi: None, drdy: None }
    }
}

impl BusGuard for SpiGpioGuard {
    fn release(&mut self) {
        if let Some(spi) = self.spi.take() {
            drop(spi);
            info!("SPI bus handle released");
        }
        if let Some(pin) = self.drdy.take() {
            drop(pin);
            info!("DRDY pin released");
        }
    }

    fn probe_conflict(&mut self) -> bool {
        // Opened handles land in the slots so release() cleans up whichever
        // ones the probe managed to claim, even when a later step fails.
        let mut conflict = false;

        match Spi::new(Bus::Spi0, SlaveSelect::Ss0, PROBE_CLOCK_HZ, Mode::Mode1) {
            Ok(spi) => self.spi = Some(spi),
            Err(e) => {
                warn!("SPI bus probe failed: {e}");
                conflict = true;
            }
        }

        if !conflict {
            match Gpio::new().and_then(|gpio| gpio.get(self.drdy_pin)) {
                Ok(pin) => {
                    let mut pin = pin.into_input_pullup();
                    match pin.set_interrupt(Trigger::FallingEdge, None) {
                        Ok(()) => self.drdy = Some(pin),
                        Err(e) => {
                            warn!("DRDY interrupt probe failed: {e}");
                            conflict = true;
                        }
                    }
                }
                Err(e) => {
                    warn!("DRDY pin probe failed: {e}");
                    conflict = true;
                }
            }
        }

        self.release();
        conflict
    }
}
