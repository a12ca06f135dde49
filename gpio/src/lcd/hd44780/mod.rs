//! HD44780 LCD module.
//!
//! Drives an HD44780-class character display controller over a 4- or 8-line
//! parallel data bus plus the E, RS and (optionally) R/W control lines.
//! [`frame`] holds the pure byte↔frame codec, [`driver`] the command
//! surface and the GPIO transport with its power-on handshake and busy-flag
//! poller.

pub mod driver;
pub mod frame;

use crate::GpioError;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum Hd44780Error {
    /// The driver is wired or configured in a way that cannot perform the
    /// requested operation (e.g. busy-flag polling without an R/W pin).
    #[error("driver configuration error: {0}")]
    Config(&'static str),
    /// The busy flag stayed set past the configured deadline. Only produced
    /// when a deadline is configured; without one a stuck controller blocks
    /// forever, as the original protocol did.
    #[error("busy flag did not clear before the deadline")]
    BusyFlagTimeout,
    /// A cursor position outside the configured screen geometry.
    #[error("position outside the configured screen geometry")]
    InvalidPosition,
    /// A DDRAM address above the controller's 7-bit address space.
    #[error("DDRAM address out of range")]
    InvalidAddress,
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

pub type Hd44780Result<T> = Result<T, Hd44780Error>;
