//! Configuration for the bus driver, controller and web surface.
//!
//! Configuration is an explicit value passed into constructors; nothing is
//! cached process-wide.
//!
//! # Example
//!
//! ```rust
//! use rs_tortoise::config::{BusConfig, Config, ControllerConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.bus.boards, 16);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_bus(BusConfig::default().with_boards(2).with_poll_interval_ms(50))
//!     .with_controller(ControllerConfig::default().with_motor_run_time_ms(3000));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// Board Layout
// ============================================================================

/// Driver ports on one controller board. One port drives one switch machine.
pub const PORTS_PER_BOARD: usize = 4;

/// Switch machines packed into one transmit byte (4 bits each).
pub const TX_PORTS_PER_BYTE: usize = 2;

/// Switch machines reported by one receive byte (2 bits each).
pub const RX_PORTS_PER_BYTE: usize = 4;

/// Transmit bytes per controller board.
pub const TX_BYTES_PER_BOARD: usize = PORTS_PER_BOARD / TX_PORTS_PER_BYTE;

/// Receive bytes per controller board.
pub const RX_BYTES_PER_BOARD: usize = PORTS_PER_BOARD / RX_PORTS_PER_BYTE;

/// Upper limit on daisy-chained controller boards.
pub const MAX_CONTROLLER_BOARDS: u8 = 20;

/// Boards assumed when none are configured.
pub const DEFAULT_BOARDS: u8 = 16;

/// Production bus poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 100;

/// How long a throw drives the motor before it is stopped.
pub const DEFAULT_MOTOR_RUN_TIME_MS: u32 = 4000;

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Bus driver configuration
    pub bus: BusConfig,
    /// Controller configuration
    pub controller: ControllerConfig,
    /// Web server configuration
    pub web: WebConfig,
}

impl Config {
    /// Set bus configuration
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    /// Set controller configuration
    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }

    /// Set web configuration
    pub fn with_web(mut self, web: WebConfig) -> Self {
        self.web = web;
        self
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bus.validate()
    }

    /// Parse a JSON configuration file body and validate it.
    ///
    /// Accepts the server's historical flat shape as well as nested sections:
    ///
    /// ```rust
    /// use rs_tortoise::Config;
    ///
    /// let config = Config::from_json(r#"{"number-controller-boards": 3}"#).unwrap();
    /// assert_eq!(config.bus.boards, 3);
    ///
    /// let config = Config::from_json(r#"{"bus": {"boards": 2, "poll_interval_ms": 20}}"#).unwrap();
    /// assert_eq!(config.bus.poll_interval_ms, 20);
    ///
    /// assert!(Config::from_json(r#"{"number-controller-boards": 21}"#).is_err());
    /// ```
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        #[derive(serde::Deserialize)]
        struct ConfigFile {
            #[serde(rename = "number-controller-boards")]
            number_controller_boards: Option<u8>,
            #[serde(flatten)]
            config: Config,
        }

        let file: ConfigFile = serde_json::from_str(json)?;
        let mut config = file.config;
        if let Some(boards) = file.number_controller_boards {
            config.bus.boards = boards;
        }
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================================================
// Bus Config
// ============================================================================

/// Bus driver configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BusConfig {
    /// Number of daisy-chained controller boards
    pub boards: u8,
    /// Interval between bus polls in milliseconds
    pub poll_interval_ms: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            boards: DEFAULT_BOARDS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl BusConfig {
    /// Set the board count
    pub fn with_boards(mut self, boards: u8) -> Self {
        self.boards = boards;
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, ms: u32) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.poll_interval_ms))
    }

    /// Length of the transmit buffer in bytes
    pub fn tx_len(&self) -> usize {
        usize::from(self.boards) * TX_BYTES_PER_BOARD
    }

    /// Length of the receive buffer in bytes
    pub fn rx_len(&self) -> usize {
        usize::from(self.boards) * RX_BYTES_PER_BOARD
    }

    /// Number of addressable switch machines
    pub fn max_switch_machines(&self) -> usize {
        usize::from(self.boards) * PORTS_PER_BOARD
    }

    /// Check board count and poll interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.boards == 0 || self.boards > MAX_CONTROLLER_BOARDS {
            return Err(ConfigError::BoardCount {
                requested: self.boards,
                max: MAX_CONTROLLER_BOARDS,
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::PollInterval);
        }
        Ok(())
    }
}

// ============================================================================
// Controller Config
// ============================================================================

/// Controller configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    /// How long the motor is driven for a throw, in milliseconds
    pub motor_run_time_ms: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            motor_run_time_ms: DEFAULT_MOTOR_RUN_TIME_MS,
        }
    }
}

impl ControllerConfig {
    /// Set the motor run time
    pub fn with_motor_run_time_ms(mut self, ms: u32) -> Self {
        self.motor_run_time_ms = ms;
        self
    }

    /// Motor run time as a duration
    pub fn motor_run_time(&self) -> Duration {
        Duration::from_millis(u64::from(self.motor_run_time_ms))
    }
}

// ============================================================================
// Web Config
// ============================================================================

/// Web server configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WebConfig {
    /// Port to listen on
    pub port: u16,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
    /// Whether web server is enabled
    pub enabled: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_permissive: true,
            enabled: true,
        }
    }
}

impl WebConfig {
    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set CORS mode
    pub fn with_cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Enable or disable web server
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.bus.boards, DEFAULT_BOARDS);
        assert_eq!(config.bus.poll_interval_ms, 100);
        assert_eq!(config.controller.motor_run_time_ms, 4000);
        assert_eq!(config.web.port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn layout_constants() {
        assert_eq!(TX_BYTES_PER_BOARD, 2);
        assert_eq!(RX_BYTES_PER_BOARD, 1);
    }

    #[test]
    fn buffer_lengths_follow_board_count() {
        let bus = BusConfig::default().with_boards(3);
        assert_eq!(bus.tx_len(), 6);
        assert_eq!(bus.rx_len(), 3);
        assert_eq!(bus.max_switch_machines(), 12);
    }

    #[test]
    fn durations() {
        let bus = BusConfig::default().with_poll_interval_ms(250);
        assert_eq!(bus.poll_interval(), Duration::from_millis(250));

        let controller = ControllerConfig::default().with_motor_run_time_ms(1500);
        assert_eq!(controller.motor_run_time(), Duration::from_millis(1500));
    }

    #[test]
    fn zero_boards_rejected() {
        let bus = BusConfig::default().with_boards(0);
        assert!(matches!(
            bus.validate(),
            Err(ConfigError::BoardCount { requested: 0, .. })
        ));
    }

    #[test]
    fn too_many_boards_rejected() {
        let bus = BusConfig::default().with_boards(MAX_CONTROLLER_BOARDS + 1);
        assert!(bus.validate().is_err());

        let bus = BusConfig::default().with_boards(MAX_CONTROLLER_BOARDS);
        assert!(bus.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let bus = BusConfig::default().with_poll_interval_ms(0);
        assert!(matches!(bus.validate(), Err(ConfigError::PollInterval)));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::default()
            .with_bus(BusConfig::default().with_boards(1))
            .with_controller(ControllerConfig::default().with_motor_run_time_ms(10))
            .with_web(WebConfig::default().with_port(3000).with_cors(false));

        assert_eq!(config.bus.boards, 1);
        assert_eq!(config.controller.motor_run_time_ms, 10);
        assert_eq!(config.web.port, 3000);
        assert!(!config.web.cors_permissive);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_flat_board_count() {
        let config = Config::from_json(r#"{"number-controller-boards": 4}"#).unwrap();
        assert_eq!(config.bus.boards, 4);
        assert_eq!(config.bus.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_round_trip() {
        let config = Config::default().with_bus(BusConfig::default().with_boards(5));
        let json = config.to_json().unwrap();
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_malformed() {
        assert!(matches!(
            Config::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
