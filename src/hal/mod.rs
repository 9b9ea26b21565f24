//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `mock`: In-memory bus and driver for tests and desktop development
//! - `transport`: Closure-backed transport, full-duplex or half-duplex
//! - `spi`: `embedded-hal` SPI devices (requires `spi` feature)

pub mod mock;
pub mod transport;

#[cfg(feature = "spi")]
pub mod spi;

pub use mock::*;
pub use transport::*;

#[cfg(feature = "spi")]
pub use spi::*;
