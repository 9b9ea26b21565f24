//! # rs-tortoise
//!
//! A driver and controller for Tortoise switch machines (turnout motors) wired
//! to daisy-chained controller boards.
//!
//! ## Features
//!
//! - **Bit-exact bus codec**: 4-bit output nibbles and 2-bit input codes per port
//! - **Single-owner bus loop**: one thread owns the transport, serving updates and polls
//! - **Edge detection**: receive deltas become added/removed/position-changed events
//! - **Reconciliation**: decides when to drive a motor and stops it after a fixed run time
//! - **Pluggable transports**: closures, `embedded-hal` SPI devices, or an in-memory mock
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `codec` - Bit layout of the transmit and receive buffers
//! - `traits` - Bus transport and driver abstractions
//! - `bus` - The bus driver loop
//! - `store` - Authoritative map of attached switch machines
//! - `controller` - Main controller that ties everything together
//! - `hal` - Concrete transports (mock for testing, SPI for hardware)
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use rs_tortoise::{
//!     bus::TortoiseBusDriver,
//!     config::{BusConfig, ControllerConfig},
//!     hal::MockTransport,
//!     Position, SwitchMachineId, SwitchMachineUpdateRequest, TortoiseController,
//! };
//!
//! // One board on an in-memory bus, polled every 10ms
//! let bus = MockTransport::new(1);
//! let driver = TortoiseBusDriver::new(
//!     bus.clone(),
//!     BusConfig::default().with_boards(1).with_poll_interval_ms(10),
//! )
//! .unwrap();
//! let controller = TortoiseController::new(driver, ControllerConfig::default()).unwrap();
//!
//! // The board reports a switch machine resting at position 0
//! let id = SwitchMachineId::new(0);
//! bus.set_port(id, Some(Position::Position0));
//! controller.driver().poll_now().unwrap();
//! assert!(controller.has_switch_machine(id));
//!
//! // Throw it
//! controller
//!     .update_switch_machine(SwitchMachineUpdateRequest::new(id).with_position(Position::Position1))
//!     .unwrap();
//! assert_eq!(bus.last_transmit(), Some(vec![0x00, 0x80]));
//!
//! controller.close().unwrap();
//! ```

#![warn(missing_docs)]

/// Bus driver loop over a byte transport.
pub mod bus;
/// Bit-level encoding of switch-machine state on the bus.
pub mod codec;
/// Explicit configuration values.
pub mod config;
/// Reconciliation controller that owns switch-machine state.
pub mod controller;
/// Error types.
pub mod error;
/// Domain events published by the controller.
pub mod events;
/// Transport and driver implementations, including mocks for testing.
pub mod hal;
/// Delayed motor-stop tasks.
pub mod scheduler;
/// Authoritative switch-machine map.
pub mod store;
/// Switch-machine value types.
pub mod switch_machine;
/// Core traits for the bus transport and driver.
pub mod traits;

/// HTTP API (feature-gated).
#[cfg(feature = "web")]
pub mod services;

// Re-exports for convenience
pub use bus::TortoiseBusDriver;
pub use controller::{DivergenceHandler, TortoiseController};
pub use error::{ConfigError, ControllerError, DriverError, StoreError};
pub use events::{EventType, SwitchMachineEvent, SwitchMachineEventListener};
pub use scheduler::MotorStopScheduler;
pub use store::SwitchMachineStore;
pub use switch_machine::{
    GpioState, MotorState, Position, SwitchMachineId, SwitchMachineState,
    SwitchMachineUpdateRequest,
};
pub use traits::{BusTransport, Driver, DriverEvent, DriverEventListener};

// Config re-exports
pub use config::{BusConfig, Config, ControllerConfig, WebConfig};
