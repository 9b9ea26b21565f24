//! Mock implementations for testing without hardware.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockTransport`] | [`BusTransport`] | In-memory boards: injectable rx frames, recorded tx frames |
//! | [`MockDriver`] | [`Driver`] | Records updates and lets tests emit driver events directly |
//!
//! Both are cheap handles over shared state, so a test keeps a clone after
//! handing the mock to the code under test.
//!
//! # Example
//!
//! ```rust
//! use rs_tortoise::hal::MockTransport;
//! use rs_tortoise::traits::BusTransport;
//! use rs_tortoise::{Position, SwitchMachineId};
//!
//! let mut bus = MockTransport::new(1);
//! bus.set_port(SwitchMachineId::new(3), Some(Position::Position1));
//!
//! let mut rx = [0u8; 1];
//! bus.receive(&[0, 0], &mut rx).unwrap();
//! assert_eq!(rx, [0x80]);
//!
//! bus.transmit(&[0x00, 0x10]).unwrap();
//! assert_eq!(bus.last_transmit(), Some(vec![0x00, 0x10]));
//! ```
//!
//! [`BusTransport`]: crate::traits::BusTransport
//! [`Driver`]: crate::traits::Driver

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::codec;
use crate::config::RX_BYTES_PER_BOARD;
use crate::error::DriverError;
use crate::switch_machine::{Position, SwitchMachineId, SwitchMachineState};
use crate::traits::{BusTransport, Driver, DriverEvent, DriverEventListener};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Mock Transport
// ============================================================================

/// Injected failure of a [`MockTransport`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockTransportError {
    /// Transmit was set to fail.
    #[error("mock transmit failure")]
    Transmit,
    /// Receive was set to fail.
    #[error("mock receive failure")]
    Receive,
}

#[derive(Debug, Default)]
struct MockBus {
    rx: Vec<u8>,
    transmits: Vec<Vec<u8>>,
    receive_count: usize,
    close_count: usize,
    fail_transmit: bool,
    fail_receive: bool,
}

/// In-memory bus.
///
/// Holds the frame the boards would report next, records every transmitted
/// frame, and counts receives and closes.
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    bus: Arc<Mutex<MockBus>>,
}

impl MockTransport {
    /// A bus of `boards` boards with nothing attached.
    pub fn new(boards: u8) -> Self {
        let bus = MockBus {
            rx: vec![0; usize::from(boards) * RX_BYTES_PER_BOARD],
            ..MockBus::default()
        };
        Self {
            bus: Arc::new(Mutex::new(bus)),
        }
    }

    /// Replaces the reported frame. Its length becomes the bus length.
    pub fn set_rx(&self, frame: &[u8]) {
        let mut bus = lock(&self.bus);
        bus.rx.clear();
        bus.rx.extend_from_slice(frame);
    }

    /// Attaches (`Some`) or detaches (`None`) one switch machine in the
    /// reported frame. Ids beyond the bus are ignored.
    pub fn set_port(&self, id: SwitchMachineId, position: Option<Position>) {
        let mut bus = lock(&self.bus);
        codec::write_rx(&mut bus.rx, id, position);
    }

    /// The frame the boards will report next.
    pub fn rx(&self) -> Vec<u8> {
        lock(&self.bus).rx.clone()
    }

    /// Every transmitted frame, oldest first.
    pub fn transmits(&self) -> Vec<Vec<u8>> {
        lock(&self.bus).transmits.clone()
    }

    /// Most recent transmitted frame.
    pub fn last_transmit(&self) -> Option<Vec<u8>> {
        lock(&self.bus).transmits.last().cloned()
    }

    /// Number of successful receives.
    pub fn receive_count(&self) -> usize {
        lock(&self.bus).receive_count
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        lock(&self.bus).close_count
    }

    /// Makes every transmit fail until reset.
    pub fn set_fail_transmit(&self, fail: bool) {
        lock(&self.bus).fail_transmit = fail;
    }

    /// Makes every receive fail until reset.
    pub fn set_fail_receive(&self, fail: bool) {
        lock(&self.bus).fail_receive = fail;
    }
}

impl BusTransport for MockTransport {
    type Error = MockTransportError;

    fn transmit(&mut self, tx: &[u8]) -> Result<(), Self::Error> {
        let mut bus = lock(&self.bus);
        if bus.fail_transmit {
            return Err(MockTransportError::Transmit);
        }
        bus.transmits.push(tx.to_vec());
        Ok(())
    }

    fn receive(&mut self, _tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error> {
        let mut bus = lock(&self.bus);
        if bus.fail_receive {
            return Err(MockTransportError::Receive);
        }
        rx.fill(0);
        let len = rx.len().min(bus.rx.len());
        rx[..len].copy_from_slice(&bus.rx[..len]);
        bus.receive_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        lock(&self.bus).close_count += 1;
        Ok(())
    }
}

// ============================================================================
// Mock Driver
// ============================================================================

#[derive(Default)]
struct MockDriverState {
    listener: Option<Arc<dyn DriverEventListener>>,
    updates: Vec<SwitchMachineState>,
    close_count: usize,
    fail_updates: bool,
    during_next_update: Option<DriverEvent>,
}

/// Test double for a whole [`Driver`].
///
/// Updates are recorded instead of reaching a bus; [`emit`](Self::emit) plays
/// the part of the bus by calling the registered listener on the caller's
/// thread.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockDriverState>>,
}

impl MockDriver {
    /// A driver that accepts every update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to the registered listener.
    ///
    /// Returns false if no listener is registered.
    pub fn emit(&self, event: DriverEvent) -> bool {
        // Released before dispatch: the listener may call `update_switch_machine`
        let listener = lock(&self.state).listener.clone();
        match listener {
            Some(listener) => {
                listener.on_driver_event(event);
                true
            }
            None => false,
        }
    }

    /// Every update received, oldest first.
    pub fn updates(&self) -> Vec<SwitchMachineState> {
        lock(&self.state).updates.clone()
    }

    /// Most recent update.
    pub fn last_update(&self) -> Option<SwitchMachineState> {
        lock(&self.state).updates.last().cloned()
    }

    /// Delivers `event` from inside the next accepted update, after it is
    /// recorded. Stands in for a bus report racing a write.
    pub fn emit_during_next_update(&self, event: DriverEvent) {
        lock(&self.state).during_next_update = Some(event);
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }

    /// True once `start` has registered a listener.
    pub fn is_started(&self) -> bool {
        lock(&self.state).listener.is_some()
    }

    /// Makes every update fail with [`DriverError::Closed`] until reset.
    pub fn set_fail_updates(&self, fail: bool) {
        lock(&self.state).fail_updates = fail;
    }
}

impl Driver for MockDriver {
    fn start(&self, listener: Arc<dyn DriverEventListener>) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        if state.listener.is_some() {
            return Err(DriverError::AlreadyStarted);
        }
        state.listener = Some(listener);
        Ok(())
    }

    fn update_switch_machine(&self, update: &SwitchMachineState) -> Result<(), DriverError> {
        let racing = {
            let mut state = lock(&self.state);
            if state.fail_updates {
                return Err(DriverError::Closed);
            }
            state.updates.push(update.clone());
            state.during_next_update.take()
        };
        if let Some(event) = racing {
            self.emit(event);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), DriverError> {
        lock(&self.state).close_count += 1;
        Ok(())
    }
}
