//! Trait definitions for the bus transport and the switch-machine driver.
//!
//! These are the seams that let the controller run against real controller
//! boards, an in-memory mock bus, or a test double of the whole driver.
//!
//! # Submodules
//!
//! - `transport`: Raw byte transactions against the daisy-chained boards
//! - `driver`: Switch-machine driver contract and its event listener
//!
//! # Key Traits
//!
//! - [`BusTransport`]: One full-duplex or two half-duplex byte transactions
//! - [`Driver`]: Start/update/close over a bus, reporting [`DriverEvent`]s
//! - [`DriverEventListener`]: Receives driver events on the bus thread

pub mod driver;
pub mod transport;

pub use driver::*;
pub use transport::*;
