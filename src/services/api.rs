//! API request and response types for the HTTP surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{GpioState, MotorState, Position, SwitchMachineId, SwitchMachineState};

// ============================================================================
// Response Types
// ============================================================================

/// API response wrapper for consistent JSON structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (present when success=true, or alongside a partial failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present when success=false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Create a failed response that still carries data
    pub fn partial(data: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(message.into()),
        }
    }
}

/// One switch machine as seen by API clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchMachineResponse {
    /// Switch machine id
    pub id: SwitchMachineId,
    /// Last reported resting position
    pub position: Position,
    /// Current motor drive state
    pub motor_state: MotorState,
    /// Auxiliary output 0
    pub gpio0: GpioState,
    /// Auxiliary output 1
    pub gpio1: GpioState,
}

impl From<&SwitchMachineState> for SwitchMachineResponse {
    fn from(state: &SwitchMachineState) -> Self {
        Self {
            id: state.id(),
            position: state.position(),
            motor_state: state.motor_state(),
            gpio0: state.gpio0(),
            gpio1: state.gpio1(),
        }
    }
}

/// Outcome of one item of a batch update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Switch machine the item targeted
    pub id: SwitchMachineId,
    /// Whether the item was applied
    pub success: bool,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateResult {
    /// Applied item
    pub fn applied(id: SwitchMachineId) -> Self {
        Self {
            id,
            success: true,
            error: None,
        }
    }

    /// Rejected item
    pub fn failed(id: SwitchMachineId, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Result of injecting a simulated receive frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockRxResponse {
    /// Frame length in bytes
    pub bytes: usize,
}

// ============================================================================
// Request Parsing
// ============================================================================

/// Malformed hex frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexFrameError {
    /// Odd number of hex digits
    #[error("hex frame has an odd number of digits")]
    OddLength,
    /// Not a hex digit
    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),
}

/// Parse a hex string such as `"3000c0"` into bytes.
///
/// Whitespace is ignored, as is an optional `0x` prefix.
///
/// ```
/// use rs_tortoise::services::parse_hex_frame;
///
/// assert_eq!(parse_hex_frame("30 0C").unwrap(), vec![0x30, 0x0C]);
/// assert_eq!(parse_hex_frame("0xc0").unwrap(), vec![0xC0]);
/// assert!(parse_hex_frame("3").is_err());
/// assert!(parse_hex_frame("zz").is_err());
/// ```
pub fn parse_hex_frame(text: &str) -> Result<Vec<u8>, HexFrameError> {
    let text = text.trim();
    let text = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    let digits = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(16).map(|d| d as u8).ok_or(HexFrameError::InvalidDigit(c)))
        .collect::<Result<Vec<u8>, _>>()?;

    if digits.len() % 2 != 0 {
        return Err(HexFrameError::OddLength);
    }
    Ok(digits
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}
