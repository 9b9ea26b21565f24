//! Bit-level encoding of switch-machine state on the Tortoise bus.
//!
//! # Transmit
//!
//! Each switch machine owns a 4-bit nibble of the transmit buffer:
//!
//! | Bits | Meaning |
//! |------|---------|
//! | 0 | GPIO0 |
//! | 1 | GPIO1 |
//! | 2-3 | Motor: `0` idle, `1` to position 0, `2` to position 1, `3` brake |
//!
//! Two machines share a byte; even ids use the upper nibble, odd ids the lower.
//! Byte offsets are computed per board (`board * 2 + port / 2`) and addressed
//! from the end of the buffer backward, matching the daisy-chain shift order.
//!
//! # Receive
//!
//! Each receive byte reports the four ports of one board, 2 bits per port, with
//! a non-linear layout:
//!
//! | Port | Bits |
//! |------|------|
//! | 0 | 4-5 |
//! | 1 | 2-3 |
//! | 2 | 0-1 |
//! | 3 | 6-7 |
//!
//! Code `0` is disconnected and `3` is connected with unknown position. Codes
//! `1`/`2` map to position 0/1 on ports 0 and 3, and the reverse on ports 1
//! and 2, because the two port pairs are wired with opposite orientation.
//!
//! # Example
//!
//! ```rust
//! use rs_tortoise::codec::{self, PortChange};
//! use rs_tortoise::{GpioState, MotorState, Position, SwitchMachineId, SwitchMachineState};
//!
//! // One board: 2 tx bytes, 1 rx byte
//! let mut tx = [0u8; 2];
//! let state = SwitchMachineState::new(
//!     SwitchMachineId::new(0),
//!     Position::Unknown,
//!     MotorState::Idle,
//!     GpioState::On,
//!     GpioState::Off,
//! );
//! assert_eq!(codec::write_tx(&mut tx, &state), Some(1));
//! assert_eq!(tx, [0x00, 0x10]);
//!
//! let changes = codec::diff_rx_byte(0x00, 0x30, 0, 1);
//! assert_eq!(changes.len(), 1);
//! assert_eq!(changes[0].id, SwitchMachineId::new(0));
//! assert_eq!(changes[0].change, PortChange::Added(Position::Unknown));
//! ```

use heapless::Vec as HVec;

use crate::config::{
    RX_BYTES_PER_BOARD, RX_PORTS_PER_BYTE, TX_BYTES_PER_BOARD, TX_PORTS_PER_BYTE,
};
use crate::switch_machine::{GpioState, MotorState, Position, SwitchMachineId, SwitchMachineState};

// ============================================================================
// Transmit Bits
// ============================================================================

/// GPIO bits of a transmit nibble.
pub const GPIO_BIT_MASK: u8 = 0x03;
/// GPIO0 high.
pub const GPIO0_HIGH_BIT: u8 = 0x01;
/// GPIO1 high.
pub const GPIO1_HIGH_BIT: u8 = 0x02;

/// Motor bits of a transmit nibble.
pub const MOTOR_STATE_BIT_MASK: u8 = 0x0C;
/// Motor idle.
pub const MOTOR_IDLE_BITS: u8 = 0x00;
/// Motor driving to position 0.
pub const MOTOR_TO_POS0_BITS: u8 = 0x04;
/// Motor driving to position 1.
pub const MOTOR_TO_POS1_BITS: u8 = 0x08;
/// Motor braking.
pub const MOTOR_BRAKE_BITS: u8 = 0x0C;

/// All bits of one transmit nibble.
pub const DATA_BIT_MASK: u8 = GPIO_BIT_MASK | MOTOR_STATE_BIT_MASK;

const UPPER_NIBBLE_SHIFT: u32 = 4;

// ============================================================================
// Receive Bits
// ============================================================================

/// Bits of one port in a receive byte, before shifting.
pub const RX_PORT_BIT_MASK: u8 = 0x03;

/// Bit offset of each port within a receive byte.
pub const RX_PORT_BIT_OFFSETS: [u32; RX_PORTS_PER_BYTE] = [4, 2, 0, 6];

/// Port code: nothing attached.
pub const RX_DISCONNECTED: u8 = 0x00;
/// Port code: first orientation.
pub const RX_CODE_A: u8 = 0x01;
/// Port code: second orientation.
pub const RX_CODE_B: u8 = 0x02;
/// Port code: attached, position unknown.
pub const RX_UNKNOWN: u8 = 0x03;

// ============================================================================
// Transmit Encoding
// ============================================================================

/// Motor field of a transmit nibble.
pub const fn motor_bits(motor: MotorState) -> u8 {
    match motor {
        MotorState::Idle => MOTOR_IDLE_BITS,
        MotorState::ToPosition0 => MOTOR_TO_POS0_BITS,
        MotorState::ToPosition1 => MOTOR_TO_POS1_BITS,
        MotorState::Brake => MOTOR_BRAKE_BITS,
    }
}

/// The 4-bit transmit nibble: `(gpio1 << 1 | gpio0) | motor << 2`.
pub const fn tx_nibble(motor: MotorState, gpio0: GpioState, gpio1: GpioState) -> u8 {
    let mut bits = motor_bits(motor);
    if gpio0.is_on() {
        bits |= GPIO0_HIGH_BIT;
    }
    if gpio1.is_on() {
        bits |= GPIO1_HIGH_BIT;
    }
    bits
}

/// Decodes a 4-bit transmit nibble.
pub const fn decode_tx_nibble(nibble: u8) -> (MotorState, GpioState, GpioState) {
    let motor = match nibble & MOTOR_STATE_BIT_MASK {
        MOTOR_TO_POS0_BITS => MotorState::ToPosition0,
        MOTOR_TO_POS1_BITS => MotorState::ToPosition1,
        MOTOR_BRAKE_BITS => MotorState::Brake,
        _ => MotorState::Idle,
    };
    let gpio0 = if nibble & GPIO0_HIGH_BIT != 0 {
        GpioState::On
    } else {
        GpioState::Off
    };
    let gpio1 = if nibble & GPIO1_HIGH_BIT != 0 {
        GpioState::On
    } else {
        GpioState::Off
    };
    (motor, gpio0, gpio1)
}

/// Shift of `id`'s nibble within its byte. Even ids take the upper nibble.
#[inline]
pub const fn tx_shift(id: SwitchMachineId) -> u32 {
    if id.get() % 2 == 0 {
        UPPER_NIBBLE_SHIFT
    } else {
        0
    }
}

/// Index of `id`'s byte in a transmit buffer of `tx_len` bytes.
///
/// Returns `None` if the id lies beyond the configured boards.
///
/// ```
/// use rs_tortoise::codec::tx_byte_index;
/// use rs_tortoise::SwitchMachineId;
///
/// // Two boards, four tx bytes: board 0 sits at the end of the buffer
/// assert_eq!(tx_byte_index(SwitchMachineId::new(0), 4), Some(3));
/// assert_eq!(tx_byte_index(SwitchMachineId::new(3), 4), Some(2));
/// assert_eq!(tx_byte_index(SwitchMachineId::new(4), 4), Some(1));
/// assert_eq!(tx_byte_index(SwitchMachineId::new(7), 4), Some(0));
/// assert_eq!(tx_byte_index(SwitchMachineId::new(8), 4), None);
/// ```
pub const fn tx_byte_index(id: SwitchMachineId, tx_len: usize) -> Option<usize> {
    let offset = id.board() * TX_BYTES_PER_BOARD + id.port() / TX_PORTS_PER_BYTE;
    if offset < tx_len {
        Some(tx_len - 1 - offset)
    } else {
        None
    }
}

/// Writes `state`'s nibble into `tx`, leaving every other bit untouched.
///
/// Returns the byte index written, or `None` if the id does not fit.
pub fn write_tx(tx: &mut [u8], state: &SwitchMachineState) -> Option<usize> {
    let id = state.id();
    let index = tx_byte_index(id, tx.len())?;
    let shift = tx_shift(id);
    let bits = tx_nibble(state.motor_state(), state.gpio0(), state.gpio1()) << shift;
    let mask = DATA_BIT_MASK << shift;
    tx[index] = (tx[index] & !mask) | bits;
    Some(index)
}

/// Reads `id`'s current motor and GPIO bits back out of `tx`.
pub fn read_tx(tx: &[u8], id: SwitchMachineId) -> Option<(MotorState, GpioState, GpioState)> {
    let index = tx_byte_index(id, tx.len())?;
    let nibble = (tx[index] >> tx_shift(id)) & DATA_BIT_MASK;
    Some(decode_tx_nibble(nibble))
}

// ============================================================================
// Receive Decoding
// ============================================================================

/// Extracts the 2-bit code of `port` (0..4) from a receive byte.
#[inline]
pub const fn rx_port_bits(rx_byte: u8, port: usize) -> u8 {
    (rx_byte >> RX_PORT_BIT_OFFSETS[port]) & RX_PORT_BIT_MASK
}

/// True if a port code means something is attached.
#[inline]
pub const fn is_connected(code: u8) -> bool {
    code != RX_DISCONNECTED
}

/// Ports 0 and 3 read code A as position 0; ports 1 and 2 are mirrored.
const fn is_mirrored_port(port: usize) -> bool {
    matches!(port, 1 | 2)
}

/// Position encoded by `code` on `port`, or `None` when disconnected.
///
/// ```
/// use rs_tortoise::codec::decode_position;
/// use rs_tortoise::Position;
///
/// assert_eq!(decode_position(0, 1), Some(Position::Position0));
/// assert_eq!(decode_position(1, 1), Some(Position::Position1));
/// assert_eq!(decode_position(2, 2), Some(Position::Position0));
/// assert_eq!(decode_position(3, 2), Some(Position::Position1));
/// assert_eq!(decode_position(3, 3), Some(Position::Unknown));
/// assert_eq!(decode_position(0, 0), None);
/// ```
pub const fn decode_position(port: usize, code: u8) -> Option<Position> {
    match code & RX_PORT_BIT_MASK {
        RX_DISCONNECTED => None,
        RX_UNKNOWN => Some(Position::Unknown),
        RX_CODE_A if is_mirrored_port(port) => Some(Position::Position1),
        RX_CODE_A => Some(Position::Position0),
        _ if is_mirrored_port(port) => Some(Position::Position0),
        _ => Some(Position::Position1),
    }
}

/// Inverse of [`decode_position`]: the code a board reports for `position` on `port`.
pub const fn encode_position(port: usize, position: Option<Position>) -> u8 {
    match position {
        None => RX_DISCONNECTED,
        Some(Position::Unknown) => RX_UNKNOWN,
        Some(Position::Position0) if is_mirrored_port(port) => RX_CODE_B,
        Some(Position::Position0) => RX_CODE_A,
        Some(Position::Position1) if is_mirrored_port(port) => RX_CODE_A,
        Some(Position::Position1) => RX_CODE_B,
    }
}

/// Index of `id`'s byte in a receive buffer of `rx_len` bytes.
pub const fn rx_byte_index(id: SwitchMachineId, rx_len: usize) -> Option<usize> {
    let offset = id.board() * RX_BYTES_PER_BOARD;
    if offset < rx_len {
        Some(rx_len - 1 - offset)
    } else {
        None
    }
}

/// Id reported by `port` of receive byte `byte_index`.
pub const fn rx_id(byte_index: usize, rx_len: usize, port: usize) -> SwitchMachineId {
    let board = (rx_len - 1 - byte_index) / RX_BYTES_PER_BOARD;
    SwitchMachineId::from_board_port(board, port)
}

/// Sets the code a board would report for `id` in `rx`.
///
/// Used to build simulated receive frames. Returns `None` if the id does not fit.
pub fn write_rx(rx: &mut [u8], id: SwitchMachineId, position: Option<Position>) -> Option<usize> {
    let index = rx_byte_index(id, rx.len())?;
    let port = id.port();
    let shift = RX_PORT_BIT_OFFSETS[port];
    let code = encode_position(port, position);
    rx[index] = (rx[index] & !(RX_PORT_BIT_MASK << shift)) | (code << shift);
    Some(index)
}

// ============================================================================
// Receive Diffing
// ============================================================================

/// What happened on one port between two polls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortChange {
    /// Disconnected to connected.
    Added(Position),
    /// Connected to disconnected.
    Removed,
    /// Connected before and after, with a different code.
    Changed(Position),
}

/// A port transition attributed to its switch machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxChange {
    /// Switch machine on the port.
    pub id: SwitchMachineId,
    /// The transition.
    pub change: PortChange,
}

/// Classifies one port's code transition. `None` when the code is unchanged.
pub const fn classify(port: usize, prev: u8, cur: u8) -> Option<PortChange> {
    if prev == cur {
        return None;
    }
    match (decode_position(port, prev), decode_position(port, cur)) {
        (None, Some(position)) => Some(PortChange::Added(position)),
        (Some(_), None) => Some(PortChange::Removed),
        (Some(_), Some(position)) => Some(PortChange::Changed(position)),
        (None, None) => None,
    }
}

/// Every port change between two versions of receive byte `byte_index`.
///
/// Changes come back in port order (0, 1, 2, 3).
pub fn diff_rx_byte(
    prev: u8,
    cur: u8,
    byte_index: usize,
    rx_len: usize,
) -> HVec<RxChange, RX_PORTS_PER_BYTE> {
    let mut changes = HVec::new();
    if prev == cur {
        return changes;
    }
    for port in 0..RX_PORTS_PER_BYTE {
        let prev_bits = rx_port_bits(prev, port);
        let cur_bits = rx_port_bits(cur, port);
        if let Some(change) = classify(port, prev_bits, cur_bits) {
            // Capacity equals the port count, so this cannot fail
            let _ = changes.push(RxChange {
                id: rx_id(byte_index, rx_len, port),
                change,
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u16) -> SwitchMachineId {
        SwitchMachineId::new(raw)
    }

    fn state(raw: u16, motor: MotorState, g0: GpioState, g1: GpioState) -> SwitchMachineState {
        SwitchMachineState::new(id(raw), Position::Unknown, motor, g0, g1)
    }

    // =========================================================================
    // Transmit Tests
    // =========================================================================

    #[test]
    fn id0_gpio_combinations_land_in_upper_nibble_of_last_byte() {
        let cases = [
            (GpioState::On, GpioState::Off, 0x10),
            (GpioState::Off, GpioState::On, 0x20),
            (GpioState::On, GpioState::On, 0x30),
        ];
        for (g0, g1, expected) in cases {
            let mut tx = [0u8; 2];
            assert_eq!(write_tx(&mut tx, &state(0, MotorState::Idle, g0, g1)), Some(1));
            assert_eq!(tx, [0x00, expected]);
        }
    }

    #[test]
    fn odd_id_uses_lower_nibble() {
        let mut tx = [0u8; 2];
        write_tx(
            &mut tx,
            &state(1, MotorState::ToPosition1, GpioState::On, GpioState::Off),
        );
        assert_eq!(tx, [0x00, 0x09]);
    }

    #[test]
    fn motor_codes() {
        assert_eq!(tx_nibble(MotorState::Idle, GpioState::Off, GpioState::Off), 0x0);
        assert_eq!(tx_nibble(MotorState::ToPosition0, GpioState::Off, GpioState::Off), 0x4);
        assert_eq!(tx_nibble(MotorState::ToPosition1, GpioState::Off, GpioState::Off), 0x8);
        assert_eq!(tx_nibble(MotorState::Brake, GpioState::Off, GpioState::Off), 0xC);
        assert_eq!(tx_nibble(MotorState::Brake, GpioState::On, GpioState::On), 0xF);
    }

    #[test]
    fn ports_two_and_three_use_second_byte_from_end() {
        let mut tx = [0u8; 2];
        write_tx(&mut tx, &state(2, MotorState::ToPosition0, GpioState::Off, GpioState::Off));
        write_tx(&mut tx, &state(3, MotorState::Brake, GpioState::Off, GpioState::Off));
        assert_eq!(tx, [0x4C, 0x00]);
    }

    #[test]
    fn second_board_is_addressed_before_first() {
        let mut tx = [0u8; 4];
        assert_eq!(
            write_tx(&mut tx, &state(4, MotorState::Idle, GpioState::On, GpioState::Off)),
            Some(1)
        );
        assert_eq!(tx, [0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn write_preserves_neighbouring_bits() {
        let mut tx = [0xFF, 0xFF];
        write_tx(&mut tx, &state(0, MotorState::Idle, GpioState::Off, GpioState::Off));
        assert_eq!(tx, [0xFF, 0x0F]);

        write_tx(&mut tx, &state(1, MotorState::ToPosition0, GpioState::Off, GpioState::On));
        assert_eq!(tx, [0xFF, 0x06]);
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        let mut tx = [0u8; 2];
        assert_eq!(
            write_tx(&mut tx, &state(4, MotorState::Idle, GpioState::On, GpioState::On)),
            None
        );
        assert_eq!(tx, [0, 0]);
    }

    #[test]
    fn read_tx_returns_written_bits() {
        let mut tx = [0u8; 4];
        let s = state(5, MotorState::ToPosition1, GpioState::Off, GpioState::On);
        write_tx(&mut tx, &s);
        assert_eq!(
            read_tx(&tx, id(5)),
            Some((MotorState::ToPosition1, GpioState::Off, GpioState::On))
        );
        assert_eq!(
            read_tx(&tx, id(4)),
            Some((MotorState::Idle, GpioState::Off, GpioState::Off))
        );
    }

    // =========================================================================
    // Receive Tests
    // =========================================================================

    #[test]
    fn port_bit_layout() {
        assert_eq!(rx_port_bits(0x30, 0), 3);
        assert_eq!(rx_port_bits(0x0C, 1), 3);
        assert_eq!(rx_port_bits(0x03, 2), 3);
        assert_eq!(rx_port_bits(0xC0, 3), 3);
        assert_eq!(rx_port_bits(0x30, 1), 0);
    }

    #[test]
    fn position_mapping_is_mirrored_for_middle_ports() {
        for port in [0, 3] {
            assert_eq!(decode_position(port, RX_CODE_A), Some(Position::Position0));
            assert_eq!(decode_position(port, RX_CODE_B), Some(Position::Position1));
        }
        for port in [1, 2] {
            assert_eq!(decode_position(port, RX_CODE_A), Some(Position::Position1));
            assert_eq!(decode_position(port, RX_CODE_B), Some(Position::Position0));
        }
    }

    #[test]
    fn encode_position_inverts_decode() {
        for port in 0..RX_PORTS_PER_BYTE {
            for position in [
                None,
                Some(Position::Position0),
                Some(Position::Position1),
                Some(Position::Unknown),
            ] {
                assert_eq!(decode_position(port, encode_position(port, position)), position);
            }
        }
    }

    #[test]
    fn port0_unknown_from_empty_is_single_add() {
        let changes = diff_rx_byte(0x00, 0x30, 0, 1);
        assert_eq!(
            changes.as_slice(),
            &[RxChange {
                id: id(0),
                change: PortChange::Added(Position::Unknown)
            }]
        );
    }

    #[test]
    fn unchanged_byte_yields_nothing() {
        assert!(diff_rx_byte(0x5A, 0x5A, 0, 1).is_empty());
    }

    #[test]
    fn removal_and_position_change() {
        // port0: A -> disconnected, port3: A -> B
        let prev = (RX_CODE_A << 4) | (RX_CODE_A << 6);
        let cur = RX_CODE_B << 6;
        let changes = diff_rx_byte(prev, cur, 0, 1);
        assert_eq!(
            changes.as_slice(),
            &[
                RxChange { id: id(0), change: PortChange::Removed },
                RxChange { id: id(3), change: PortChange::Changed(Position::Position1) },
            ]
        );
    }

    #[test]
    fn changes_come_back_in_port_order() {
        let changes = diff_rx_byte(0x00, 0xFF, 0, 1);
        let ids: Vec<u16> = changes.iter().map(|c| c.id.get()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn rx_ids_follow_reversed_board_order() {
        // Three boards: byte 2 is board 0, byte 0 is board 2
        assert_eq!(rx_id(2, 3, 1), id(1));
        assert_eq!(rx_id(0, 3, 1), id(9));
        assert_eq!(rx_byte_index(id(9), 3), Some(0));
        assert_eq!(rx_byte_index(id(12), 3), None);
    }

    #[test]
    fn write_rx_builds_frames() {
        let mut rx = [0u8; 2];
        write_rx(&mut rx, id(0), Some(Position::Unknown));
        assert_eq!(rx, [0x00, 0x30]);

        write_rx(&mut rx, id(6), Some(Position::Position0));
        // port 2 is mirrored: position 0 reads as code B in bits 0-1
        assert_eq!(rx, [0x02, 0x30]);

        write_rx(&mut rx, id(0), None);
        assert_eq!(rx, [0x02, 0x00]);
    }
}
