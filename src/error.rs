//! Error types.
//!
//! | Error | Raised by | Recoverable |
//! |-------|-----------|-------------|
//! | [`ControllerError`] | [`TortoiseController`](crate::TortoiseController) | yes, returned to the caller |
//! | [`DriverError`] | [`Driver`](crate::traits::Driver) implementations | yes |
//! | [`StoreError`] | [`SwitchMachineStore`](crate::SwitchMachineStore) | only outside driver-event handling |
//! | [`ConfigError`] | [`Config`](crate::Config) validation and parsing | yes |
//!
//! Transport failures are not part of this taxonomy: each transport carries its
//! own error type, which the bus loop logs and reports as
//! [`DriverEvent::TransportFault`](crate::traits::DriverEvent::TransportFault).

use thiserror::Error;

use crate::switch_machine::SwitchMachineId;

/// Errors returned by the controller's public operations.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// The id is not attached to the bus.
    #[error("Switch Machine with matching Id {0} does not exist")]
    NotExist(SwitchMachineId),

    /// The driver refused the update.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

impl ControllerError {
    /// True for [`ControllerError::NotExist`].
    pub fn is_not_exist(&self) -> bool {
        matches!(self, ControllerError::NotExist(_))
    }
}

/// Errors raised by a switch-machine driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// `start` was called twice.
    #[error("driver already started")]
    AlreadyStarted,

    /// An update arrived before `start`.
    #[error("driver not started")]
    NotStarted,

    /// The driver loop has shut down.
    #[error("driver closed")]
    Closed,

    /// The id lies beyond the configured boards.
    #[error("switch machine {0} is not addressable on the configured boards")]
    InvalidId(SwitchMachineId),

    /// The bus loop thread panicked.
    #[error("bus loop panicked")]
    LoopPanicked,

    /// The bus loop thread could not be spawned.
    #[error("failed to spawn bus loop: {0}")]
    Spawn(#[from] std::io::Error),

    /// The transport failed while closing.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors raised by the switch-machine store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Add for an id already present.
    #[error("Switch Machine with id {0} already exists in store")]
    AlreadyExists(SwitchMachineId),

    /// Update or remove for an id not present.
    #[error("Switch Machine with id {0} is not in store")]
    NotFound(SwitchMachineId),
}

/// Errors raised while validating or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Board count outside `1..=max`.
    #[error("Requested Number of Controller Boards {requested} must be between 1 and {max}")]
    BoardCount {
        /// Configured board count.
        requested: u8,
        /// Allowed maximum.
        max: u8,
    },

    /// Zero poll interval.
    #[error("bus poll interval must be greater than zero")]
    PollInterval,

    /// Malformed configuration JSON.
    #[cfg(feature = "serde")]
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_exist_message_names_id() {
        let err = ControllerError::NotExist(SwitchMachineId::new(12));
        assert_eq!(
            err.to_string(),
            "Switch Machine with matching Id 12 does not exist"
        );
        assert!(err.is_not_exist());
    }

    #[test]
    fn driver_error_converts() {
        let err: ControllerError = DriverError::Closed.into();
        assert!(!err.is_not_exist());
        assert_eq!(err.to_string(), "driver error: driver closed");
    }

    #[test]
    fn store_error_messages() {
        let id = SwitchMachineId::new(1);
        assert!(StoreError::AlreadyExists(id).to_string().contains("already exists"));
        assert!(StoreError::NotFound(id).to_string().contains("not in store"));
    }
}
