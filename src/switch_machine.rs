//! Switch-machine value types.
//!
//! A switch machine (a Tortoise turnout motor) is identified by the bus port it
//! is wired to and described by an immutable [`SwitchMachineState`]. New states
//! are derived with the `with_*` methods rather than mutated in place.
//!
//! # Example
//!
//! ```rust
//! use rs_tortoise::{GpioState, MotorState, Position, SwitchMachineId, SwitchMachineState};
//!
//! let attached = SwitchMachineState::attached(SwitchMachineId::new(5), Position::Position1);
//! assert_eq!(attached.motor_state(), MotorState::Idle);
//!
//! let throwing = attached
//!     .with_motor_state(MotorState::toward(Position::Position0))
//!     .with_gpio(GpioState::On, GpioState::Off);
//!
//! // Motor state is not part of the updateable fields
//! assert!(!attached.same_updateable_fields(&throwing));
//! assert!(attached.with_gpio(GpioState::On, GpioState::Off).same_updateable_fields(&throwing));
//! ```

use core::fmt;
use std::time::SystemTime;

use crate::config::PORTS_PER_BOARD;

/// Stable identity of one switch machine.
///
/// Assigned by wiring position on the bus (`board * 4 + port`), never chosen
/// by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SwitchMachineId(pub u16);

impl SwitchMachineId {
    /// Creates an id from its raw value.
    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Builds the id of `port` on `board`.
    #[inline]
    pub const fn from_board_port(board: usize, port: usize) -> Self {
        Self((board * PORTS_PER_BOARD + port) as u16)
    }

    /// Raw id value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Controller board this id is wired to.
    #[inline]
    pub const fn board(self) -> usize {
        self.0 as usize / PORTS_PER_BOARD
    }

    /// Port on its board (0..4).
    #[inline]
    pub const fn port(self) -> usize {
        self.0 as usize % PORTS_PER_BOARD
    }
}

impl From<u16> for SwitchMachineId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SwitchMachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resting position reported by the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Position {
    /// First resting side.
    Position0,
    /// Second resting side.
    Position1,
    /// Connected, but the port code does not resolve to a side.
    ///
    /// Seen mid-throw or on ambiguous wiring.
    #[default]
    Unknown,
}

impl Position {
    /// Short label used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Position::Position0 => "0",
            Position::Position1 => "1",
            Position::Unknown => "Unknown",
        }
    }

}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drive state of the motor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MotorState {
    /// No drive current.
    #[default]
    Idle,
    /// Driving toward [`Position::Position0`].
    ToPosition0,
    /// Driving toward [`Position::Position1`].
    ToPosition1,
    /// Actively holding without moving.
    Brake,
}

impl MotorState {
    /// Motor state that drives toward `position`.
    ///
    /// [`Position::Unknown`] is not a target, so it maps to [`MotorState::Idle`].
    ///
    /// ```
    /// use rs_tortoise::{MotorState, Position};
    ///
    /// assert_eq!(MotorState::toward(Position::Position0), MotorState::ToPosition0);
    /// assert_eq!(MotorState::toward(Position::Position1), MotorState::ToPosition1);
    /// assert_eq!(MotorState::toward(Position::Unknown), MotorState::Idle);
    /// ```
    pub const fn toward(position: Position) -> Self {
        match position {
            Position::Position0 => MotorState::ToPosition0,
            Position::Position1 => MotorState::ToPosition1,
            Position::Unknown => MotorState::Idle,
        }
    }

    /// Position the motor is currently driving toward.
    pub const fn target(&self) -> Option<Position> {
        match self {
            MotorState::ToPosition0 => Some(Position::Position0),
            MotorState::ToPosition1 => Some(Position::Position1),
            MotorState::Idle | MotorState::Brake => None,
        }
    }

    /// True while driving toward either position.
    pub const fn is_driving(&self) -> bool {
        self.target().is_some()
    }

    /// True if the motor is driving toward the side opposite `requested`.
    ///
    /// ```
    /// use rs_tortoise::{MotorState, Position};
    ///
    /// assert!(MotorState::ToPosition1.is_running_opposite_to(Position::Position0));
    /// assert!(MotorState::ToPosition0.is_running_opposite_to(Position::Position1));
    /// assert!(!MotorState::ToPosition0.is_running_opposite_to(Position::Position0));
    /// assert!(!MotorState::Brake.is_running_opposite_to(Position::Position0));
    /// assert!(!MotorState::ToPosition1.is_running_opposite_to(Position::Unknown));
    /// ```
    pub const fn is_running_opposite_to(&self, requested: Position) -> bool {
        matches!(
            (requested, self),
            (Position::Position0, MotorState::ToPosition1)
                | (Position::Position1, MotorState::ToPosition0)
        )
    }

    /// Short label used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MotorState::Idle => "Idle",
            MotorState::ToPosition0 => "To 0",
            MotorState::ToPosition1 => "To 1",
            MotorState::Brake => "Brake",
        }
    }
}

impl fmt::Display for MotorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of one auxiliary output line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum GpioState {
    /// Output low.
    #[default]
    Off,
    /// Output high.
    On,
}

impl GpioState {
    /// True when the output is driven high.
    #[inline]
    pub const fn is_on(&self) -> bool {
        matches!(self, GpioState::On)
    }

    /// Short label used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            GpioState::Off => "OFF",
            GpioState::On => "ON",
        }
    }
}

impl From<bool> for GpioState {
    fn from(on: bool) -> Self {
        if on {
            GpioState::On
        } else {
            GpioState::Off
        }
    }
}

impl fmt::Display for GpioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one switch machine.
///
/// `PartialEq` compares every field except the update timestamp. Reconciliation
/// uses the narrower [`same_updateable_fields`](Self::same_updateable_fields),
/// which ignores the motor state because it is transient rather than a target.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchMachineState {
    id: SwitchMachineId,
    position: Position,
    motor_state: MotorState,
    gpio0: GpioState,
    gpio1: GpioState,
    updated_at: SystemTime,
}

impl SwitchMachineState {
    /// Creates a state stamped with the current time.
    pub fn new(
        id: SwitchMachineId,
        position: Position,
        motor_state: MotorState,
        gpio0: GpioState,
        gpio1: GpioState,
    ) -> Self {
        Self {
            id,
            position,
            motor_state,
            gpio0,
            gpio1,
            updated_at: SystemTime::now(),
        }
    }

    /// A freshly attached machine: motor idle, both outputs off.
    pub fn attached(id: SwitchMachineId, position: Position) -> Self {
        Self::new(id, position, MotorState::Idle, GpioState::Off, GpioState::Off)
    }

    /// Switch machine id.
    #[inline]
    pub fn id(&self) -> SwitchMachineId {
        self.id
    }

    /// Last reported resting position.
    #[inline]
    pub fn position(&self) -> Position {
        self.position
    }

    /// Current motor drive state.
    #[inline]
    pub fn motor_state(&self) -> MotorState {
        self.motor_state
    }

    /// Auxiliary output 0.
    #[inline]
    pub fn gpio0(&self) -> GpioState {
        self.gpio0
    }

    /// Auxiliary output 1.
    #[inline]
    pub fn gpio1(&self) -> GpioState {
        self.gpio1
    }

    /// When this value was created.
    #[inline]
    pub fn updated_at(&self) -> SystemTime {
        self.updated_at
    }

    /// Same machine at a different position.
    pub fn with_position(&self, position: Position) -> Self {
        Self::new(self.id, position, self.motor_state, self.gpio0, self.gpio1)
    }

    /// Same machine with a different motor state.
    pub fn with_motor_state(&self, motor_state: MotorState) -> Self {
        Self::new(self.id, self.position, motor_state, self.gpio0, self.gpio1)
    }

    /// Same machine with different outputs.
    pub fn with_gpio(&self, gpio0: GpioState, gpio1: GpioState) -> Self {
        Self::new(self.id, self.position, self.motor_state, gpio0, gpio1)
    }

    /// Outputs reset: motor idle and both GPIO lines off, position kept.
    pub fn neutral(&self) -> Self {
        Self::new(
            self.id,
            self.position,
            MotorState::Idle,
            GpioState::Off,
            GpioState::Off,
        )
    }

    /// Compares position and both GPIO lines.
    pub fn same_updateable_fields(&self, other: &Self) -> bool {
        self.position == other.position && self.same_gpio(other)
    }

    /// Compares both GPIO lines.
    pub fn same_gpio(&self, other: &Self) -> bool {
        self.gpio0 == other.gpio0 && self.gpio1 == other.gpio1
    }
}

impl PartialEq for SwitchMachineState {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.position == other.position
            && self.motor_state == other.motor_state
            && self.gpio0 == other.gpio0
            && self.gpio1 == other.gpio1
    }
}

impl Eq for SwitchMachineState {}

impl fmt::Display for SwitchMachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Id: {}, Position: {}, Motor: {}, GPIO0: {}, GPIO1: {}",
            self.id, self.position, self.motor_state, self.gpio0, self.gpio1
        )
    }
}

/// A user request to change a switch machine.
///
/// Fields left as `None` keep their current value. See
/// [`resolve`](Self::resolve) for how a missing position is filled in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchMachineUpdateRequest {
    /// Target switch machine.
    pub id: SwitchMachineId,
    /// Requested resting position.
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<Position>,
    /// Requested level of output 0.
    #[cfg_attr(feature = "serde", serde(default))]
    pub gpio0: Option<GpioState>,
    /// Requested level of output 1.
    #[cfg_attr(feature = "serde", serde(default))]
    pub gpio1: Option<GpioState>,
}

impl SwitchMachineUpdateRequest {
    /// An empty request for `id`.
    pub fn new(id: SwitchMachineId) -> Self {
        Self {
            id,
            position: None,
            gpio0: None,
            gpio1: None,
        }
    }

    /// Request a position.
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Request a level for output 0.
    pub fn with_gpio0(mut self, gpio0: GpioState) -> Self {
        self.gpio0 = Some(gpio0);
        self
    }

    /// Request a level for output 1.
    pub fn with_gpio1(mut self, gpio1: GpioState) -> Self {
        self.gpio1 = Some(gpio1);
        self
    }

    /// Fills the missing fields from `current` and returns the requested state.
    ///
    /// A missing position resolves to the motor's in-flight target while it is
    /// driving, otherwise to the current resting position, so a GPIO-only
    /// request never reverses a throw. The motor state is copied from `current`.
    pub fn resolve(&self, current: &SwitchMachineState) -> SwitchMachineState {
        let position = self.position.unwrap_or_else(|| {
            current
                .motor_state()
                .target()
                .unwrap_or_else(|| current.position())
        });
        SwitchMachineState::new(
            current.id(),
            position,
            current.motor_state(),
            self.gpio0.unwrap_or(current.gpio0()),
            self.gpio1.unwrap_or(current.gpio1()),
        )
    }
}

impl From<&SwitchMachineState> for SwitchMachineUpdateRequest {
    fn from(state: &SwitchMachineState) -> Self {
        Self {
            id: state.id(),
            position: Some(state.position()),
            gpio0: Some(state.gpio0()),
            gpio1: Some(state.gpio1()),
        }
    }
}

impl From<SwitchMachineState> for SwitchMachineUpdateRequest {
    fn from(state: SwitchMachineState) -> Self {
        Self::from(&state)
    }
}
