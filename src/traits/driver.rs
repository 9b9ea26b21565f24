//! Switch-machine driver contract.
//!
//! A driver owns the bus. It reports what the boards see as [`DriverEvent`]s
//! and accepts new switch-machine states to write out.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_tortoise::hal::MockDriver;
//! use rs_tortoise::traits::{Driver, DriverEvent};
//! use rs_tortoise::{Position, SwitchMachineId, SwitchMachineState};
//!
//! let driver = MockDriver::new();
//! driver.start(Arc::new(|event: DriverEvent| println!("{event:?}"))).unwrap();
//!
//! // Simulate the bus reporting a newly attached machine
//! let id = SwitchMachineId::new(2);
//! driver.emit(DriverEvent::Added(SwitchMachineState::attached(id, Position::Position0)));
//! ```

use std::sync::Arc;

use crate::error::DriverError;
use crate::switch_machine::{SwitchMachineId, SwitchMachineState};

/// Something the bus observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    /// A port went from disconnected to connected.
    ///
    /// Motor and GPIO fields are whatever the transmit buffer currently holds
    /// for the id.
    Added(SwitchMachineState),
    /// A port went from connected to disconnected.
    Removed(SwitchMachineId),
    /// A connected port reported a different code.
    PositionChanged(SwitchMachineState),
    /// A bus transaction failed. The loop keeps running.
    TransportFault {
        /// Rendered transport error.
        message: String,
    },
}

impl DriverEvent {
    /// Switch machine the event is about, if any.
    pub fn id(&self) -> Option<SwitchMachineId> {
        match self {
            DriverEvent::Added(state) | DriverEvent::PositionChanged(state) => Some(state.id()),
            DriverEvent::Removed(id) => Some(*id),
            DriverEvent::TransportFault { .. } => None,
        }
    }

    /// Short label used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DriverEvent::Added(_) => "Added",
            DriverEvent::Removed(_) => "Removed",
            DriverEvent::PositionChanged(_) => "PositionChanged",
            DriverEvent::TransportFault { .. } => "TransportFault",
        }
    }
}

/// Receives driver events.
///
/// Called synchronously on the bus loop thread, in port order, before the next
/// poll. Implementations may call back into the driver.
pub trait DriverEventListener: Send + Sync {
    /// Handles one event.
    fn on_driver_event(&self, event: DriverEvent);
}

impl<F> DriverEventListener for F
where
    F: Fn(DriverEvent) + Send + Sync,
{
    fn on_driver_event(&self, event: DriverEvent) {
        self(event)
    }
}

/// Owner of the switch-machine bus.
///
/// # Implementation Notes
///
/// - `start` registers the single listener and begins polling. A second call
///   fails with [`DriverError::AlreadyStarted`].
/// - `update_switch_machine` returns once the state has been written to the
///   bus, or queued for writing when called from the listener itself.
/// - `close` stops polling and releases the transport. It is idempotent.
pub trait Driver: Send + Sync {
    /// Registers `listener` and starts the bus.
    fn start(&self, listener: Arc<dyn DriverEventListener>) -> Result<(), DriverError>;

    /// Writes one switch machine's motor and GPIO bits to the bus.
    fn update_switch_machine(&self, state: &SwitchMachineState) -> Result<(), DriverError>;

    /// Stops the bus and releases the transport.
    fn close(&self) -> Result<(), DriverError>;
}
