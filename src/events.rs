//! Domain events published by the controller.
//!
//! One listener receives every event. It is the hook for fan-out to remote
//! subscribers (a websocket broadcaster, for instance).

use core::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::switch_machine::SwitchMachineState;

/// Kind of change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventType {
    /// A switch machine was attached.
    #[cfg_attr(feature = "serde", serde(rename = "Switch-Machine-Added"))]
    Added,
    /// A switch machine's state changed.
    #[cfg_attr(feature = "serde", serde(rename = "Switch-Machine-Updated"))]
    Updated,
    /// A switch machine was detached.
    #[cfg_attr(feature = "serde", serde(rename = "Switch-Machine-Removed"))]
    Removed,
}

impl EventType {
    /// Wire name of the event.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "Switch-Machine-Added",
            EventType::Updated => "Switch-Machine-Updated",
            EventType::Removed => "Switch-Machine-Removed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to one switch machine.
///
/// For [`EventType::Removed`] the state is the last one known before removal.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchMachineEvent {
    /// Kind of change.
    pub event_type: EventType,
    /// State after the change.
    pub state: SwitchMachineState,
    /// When the event was raised.
    pub timestamp: SystemTime,
}

impl SwitchMachineEvent {
    /// Creates an event stamped with the current time.
    pub fn new(event_type: EventType, state: SwitchMachineState) -> Self {
        Self {
            event_type,
            state,
            timestamp: SystemTime::now(),
        }
    }
}

impl fmt::Display for SwitchMachineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.event_type, self.state)
    }
}

/// Callback registered with
/// [`TortoiseController::set_switch_machine_event_listener`](crate::TortoiseController::set_switch_machine_event_listener).
pub type SwitchMachineEventListener = Arc<dyn Fn(&SwitchMachineEvent) + Send + Sync>;
