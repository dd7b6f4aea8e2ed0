//! Sensing-board access for the acquisition daemon.
//!
//! The daemon talks to hardware through the [`BoardDriver`] trait; this crate
//! ships two backends (a synthetic mock and a direct SPI reader for
//! ADS1299-style boards) plus the [`BusGuard`] used to detect and clear
//! conflicting use of the physical bus before a session starts.

pub mod guard;
pub mod mock;
pub mod spi_board;
pub mod types;

pub use guard::{BusGuard, SpiGpioGuard};
pub use mock::MockBoard;
pub use spi_board::SpiBoard;
pub use types::{BoardDriver, BoardError, StreamOptions};
