//! Bus driver loop for daisy-chained Tortoise controller boards.
//!
//! [`TortoiseBusDriver`] owns the transport and both bus buffers on a single
//! thread. That thread selects over three sources:
//!
//! - **Shutdown**: checked first on every iteration, so a pending close always
//!   wins over queued work
//! - **Update requests**: encode one switch machine into the transmit buffer
//!   and transmit it
//! - **Poll ticks**: receive, diff against the previous receive buffer and
//!   report [`DriverEvent`]s to the listener
//!
//! The listener runs on the bus thread. If it calls back into
//! [`update_switch_machine`](Driver::update_switch_machine), the write is
//! queued and transmitted as soon as the current poll finishes.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Instant;
//! use rs_tortoise::bus::TortoiseBusDriver;
//! use rs_tortoise::config::BusConfig;
//! use rs_tortoise::hal::MockTransport;
//! use rs_tortoise::traits::{Driver, DriverEvent};
//! use rs_tortoise::{Position, SwitchMachineId};
//!
//! let bus = MockTransport::new(1);
//! let (tick_tx, tick_rx) = crossbeam_channel::bounded(0);
//! let (event_tx, event_rx) = crossbeam_channel::unbounded();
//!
//! let driver = TortoiseBusDriver::new(bus.clone(), BusConfig::default().with_boards(1))
//!     .unwrap()
//!     .with_poll_trigger(tick_rx);
//! driver.start(Arc::new(move |event: DriverEvent| event_tx.send(event).unwrap())).unwrap();
//!
//! bus.set_port(SwitchMachineId::new(0), Some(Position::Unknown));
//! tick_tx.send(Instant::now()).unwrap();
//!
//! match event_rx.recv().unwrap() {
//!     DriverEvent::Added(state) => assert_eq!(state.position(), Position::Unknown),
//!     other => panic!("unexpected {other:?}"),
//! }
//! driver.close().unwrap();
//! assert_eq!(bus.close_count(), 1);
//! ```

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam_channel::{
    bounded, never, select, tick, unbounded, Receiver, Sender, TryRecvError,
};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{self, PortChange, RxChange};
use crate::config::BusConfig;
use crate::error::{ConfigError, DriverError};
use crate::switch_machine::{GpioState, MotorState, SwitchMachineState};
use crate::traits::{BusTransport, Driver, DriverEvent, DriverEventListener};

// ============================================================================
// Loop Messages
// ============================================================================

#[derive(Debug)]
enum Command {
    Write(SwitchMachineState),
    Poll,
}

#[derive(Debug)]
struct Request {
    command: Command,
    reply: Sender<Result<(), DriverError>>,
}

// ============================================================================
// Driver Handle
// ============================================================================

struct Running {
    requests: Sender<Request>,
    deferred: Sender<Command>,
    shutdown: Sender<()>,
    handle: JoinHandle<Result<(), String>>,
    loop_thread: ThreadId,
}

enum LoopState<T> {
    Idle {
        transport: T,
        poll_trigger: Option<Receiver<Instant>>,
    },
    Running(Running),
    Closed,
}

/// [`Driver`] over a [`BusTransport`] of daisy-chained Tortoise boards.
pub struct TortoiseBusDriver<T: BusTransport + 'static> {
    config: BusConfig,
    state: Mutex<LoopState<T>>,
}

impl<T: BusTransport + 'static> TortoiseBusDriver<T> {
    /// Creates a stopped driver. Polling starts with [`Driver::start`].
    pub fn new(transport: T, config: BusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(LoopState::Idle {
                transport,
                poll_trigger: None,
            }),
        })
    }

    /// Replaces the periodic poll ticker with `trigger`.
    ///
    /// Every `Instant` received on `trigger` runs one poll. If every sender is
    /// dropped the loop stops polling but keeps serving updates.
    pub fn with_poll_trigger(mut self, trigger: Receiver<Instant>) -> Self {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let LoopState::Idle { poll_trigger, .. } = state {
            *poll_trigger = Some(trigger);
        }
        self
    }

    /// Bus layout.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// True between a successful `start` and `close`.
    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), LoopState::Running(_))
    }

    /// Runs one poll now and waits for its events, and any writes the
    /// listener made while handling them, to go out.
    ///
    /// Called from the listener, the poll is queued behind the current one.
    pub fn poll_now(&self) -> Result<(), DriverError> {
        self.submit(Command::Poll)
    }

    fn lock(&self) -> MutexGuard<'_, LoopState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, command: Command) -> Result<(), DriverError> {
        let (requests, deferred, loop_thread) = match &*self.lock() {
            LoopState::Running(running) => (
                running.requests.clone(),
                running.deferred.clone(),
                running.loop_thread,
            ),
            LoopState::Idle { .. } => return Err(DriverError::NotStarted),
            LoopState::Closed => return Err(DriverError::Closed),
        };

        if thread::current().id() == loop_thread {
            trace!(?command, "deferring bus command from listener");
            return deferred.send(command).map_err(|_| DriverError::Closed);
        }

        let (reply_tx, reply_rx) = bounded(1);
        requests
            .send(Request {
                command,
                reply: reply_tx,
            })
            .map_err(|_| DriverError::Closed)?;
        reply_rx.recv().map_err(|_| DriverError::Closed)?
    }
}

impl<T: BusTransport + 'static> Driver for TortoiseBusDriver<T> {
    fn start(&self, listener: Arc<dyn DriverEventListener>) -> Result<(), DriverError> {
        let mut state = self.lock();
        let (transport, poll_trigger) = match mem::replace(&mut *state, LoopState::Closed) {
            LoopState::Idle {
                transport,
                poll_trigger,
            } => (transport, poll_trigger),
            running @ LoopState::Running(_) => {
                *state = running;
                return Err(DriverError::AlreadyStarted);
            }
            LoopState::Closed => return Err(DriverError::Closed),
        };

        let poll = poll_trigger.unwrap_or_else(|| tick(self.config.poll_interval()));
        let (requests_tx, requests_rx) = bounded(0);
        let (deferred_tx, deferred_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let bus_loop = BusLoop {
            transport,
            tx: vec![0; self.config.tx_len()],
            rx: vec![0; self.config.rx_len()],
            prev_rx: vec![0; self.config.rx_len()],
            listener,
            requests: requests_rx,
            deferred: deferred_rx,
            shutdown: shutdown_rx,
            poll,
        };

        let handle = thread::Builder::new()
            .name("tortoise-bus".into())
            .spawn(move || bus_loop.run())
            .map_err(|err| {
                error!(%err, "failed to spawn bus loop");
                DriverError::Spawn(err)
            })?;

        info!(
            boards = self.config.boards,
            switch_machines = self.config.max_switch_machines(),
            poll_interval_ms = self.config.poll_interval_ms,
            "bus driver started"
        );

        *state = LoopState::Running(Running {
            requests: requests_tx,
            deferred: deferred_tx,
            shutdown: shutdown_tx,
            loop_thread: handle.thread().id(),
            handle,
        });
        Ok(())
    }

    fn update_switch_machine(&self, state: &SwitchMachineState) -> Result<(), DriverError> {
        self.submit(Command::Write(state.clone()))
    }

    fn close(&self) -> Result<(), DriverError> {
        let previous = mem::replace(&mut *self.lock(), LoopState::Closed);
        match previous {
            LoopState::Closed => Ok(()),
            LoopState::Idle { mut transport, .. } => {
                info!("closing unstarted bus driver");
                transport
                    .close()
                    .map_err(|err| DriverError::Transport(err.to_string()))
            }
            LoopState::Running(running) => {
                let _ = running.shutdown.try_send(());
                if thread::current().id() == running.loop_thread {
                    // The loop exits after the current dispatch and closes the
                    // transport itself
                    return Ok(());
                }
                drop(running.requests);
                drop(running.deferred);
                match running.handle.join() {
                    Ok(result) => result.map_err(DriverError::Transport),
                    Err(_) => Err(DriverError::LoopPanicked),
                }
            }
        }
    }
}

impl<T: BusTransport + 'static> Drop for TortoiseBusDriver<T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "bus driver close on drop failed");
        }
    }
}

// ============================================================================
// Bus Loop
// ============================================================================

struct BusLoop<T: BusTransport> {
    transport: T,
    tx: Vec<u8>,
    rx: Vec<u8>,
    prev_rx: Vec<u8>,
    listener: Arc<dyn DriverEventListener>,
    requests: Receiver<Request>,
    deferred: Receiver<Command>,
    shutdown: Receiver<()>,
    poll: Receiver<Instant>,
}

impl<T: BusTransport> BusLoop<T> {
    fn run(mut self) -> Result<(), String> {
        debug!(tx_len = self.tx.len(), rx_len = self.rx.len(), "bus loop running");
        loop {
            if self.shutdown_requested() {
                break;
            }
            // Local handles keep `self` free for the arm bodies
            let (shutdown, requests, poll) = (
                self.shutdown.clone(),
                self.requests.clone(),
                self.poll.clone(),
            );
            select! {
                recv(shutdown) -> _ => break,
                recv(requests) -> request => match request {
                    Ok(request) => {
                        let result = self.execute(request.command);
                        // Listener write-backs land before the caller resumes
                        self.flush_deferred();
                        let _ = request.reply.send(result);
                    }
                    Err(_) => break,
                },
                recv(poll) -> instant => match instant {
                    Ok(_) => self.poll(),
                    Err(_) => {
                        warn!("poll trigger disconnected, polling stopped");
                        self.poll = never();
                    }
                },
            }
            self.flush_deferred();
        }

        info!("bus loop stopping");
        self.transport.close().map_err(|err| {
            warn!(%err, "transport close failed");
            err.to_string()
        })
    }

    fn shutdown_requested(&self) -> bool {
        match self.shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    fn execute(&mut self, command: Command) -> Result<(), DriverError> {
        match command {
            Command::Write(state) => self.write(&state),
            Command::Poll => {
                self.poll();
                Ok(())
            }
        }
    }

    fn flush_deferred(&mut self) {
        while let Ok(command) = self.deferred.try_recv() {
            if let Err(err) = self.execute(command) {
                warn!(%err, "deferred bus command failed");
            }
        }
    }

    /// Read-modify-write of one id's bits, then transmit the whole buffer.
    fn write(&mut self, state: &SwitchMachineState) -> Result<(), DriverError> {
        let Some(index) = codec::write_tx(&mut self.tx, state) else {
            warn!(id = %state.id(), "update for unaddressable switch machine");
            return Err(DriverError::InvalidId(state.id()));
        };
        debug!(%state, index, byte = self.tx[index], "bus write");

        if let Err(err) = self.transport.transmit(&self.tx) {
            warn!(%err, "bus transmit failed");
            self.emit(DriverEvent::TransportFault {
                message: err.to_string(),
            });
        }
        Ok(())
    }

    /// Receive, report every port transition, then swap buffers.
    fn poll(&mut self) {
        if let Err(err) = self.transport.receive(&self.tx, &mut self.rx) {
            warn!(%err, "bus receive failed");
            self.emit(DriverEvent::TransportFault {
                message: err.to_string(),
            });
            return;
        }
        trace!(rx = ?self.rx, "bus receive");

        let rx_len = self.rx.len();
        for index in 0..rx_len {
            let (prev, cur) = (self.prev_rx[index], self.rx[index]);
            for change in codec::diff_rx_byte(prev, cur, index, rx_len) {
                let event = self.event_for(change);
                self.emit(event);
            }
        }

        mem::swap(&mut self.rx, &mut self.prev_rx);
    }

    fn event_for(&self, change: RxChange) -> DriverEvent {
        let id = change.id;
        let (motor, gpio0, gpio1) = codec::read_tx(&self.tx, id).unwrap_or((
            MotorState::Idle,
            GpioState::Off,
            GpioState::Off,
        ));
        match change.change {
            PortChange::Added(position) => {
                debug!(%id, %position, "switch machine attached");
                DriverEvent::Added(SwitchMachineState::new(id, position, motor, gpio0, gpio1))
            }
            PortChange::Removed => {
                debug!(%id, "switch machine detached");
                DriverEvent::Removed(id)
            }
            PortChange::Changed(position) => {
                debug!(%id, %position, "switch machine position changed");
                DriverEvent::PositionChanged(SwitchMachineState::new(
                    id, position, motor, gpio0, gpio1,
                ))
            }
        }
    }

    fn emit(&self, event: DriverEvent) {
        self.listener.on_driver_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockTransport;
    use crate::switch_machine::{Position, SwitchMachineId};
    use crossbeam_channel::RecvTimeoutError;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(500);

    struct Harness {
        bus: MockTransport,
        driver: TortoiseBusDriver<MockTransport>,
        ticks: Sender<Instant>,
        events: Receiver<DriverEvent>,
    }

    fn harness(boards: u8) -> Harness {
        let bus = MockTransport::new(boards);
        let (ticks, trigger) = bounded(0);
        let (event_tx, events) = unbounded();
        let driver = TortoiseBusDriver::new(bus.clone(), BusConfig::default().with_boards(boards))
            .unwrap()
            .with_poll_trigger(trigger);
        driver
            .start(Arc::new(move |event: DriverEvent| {
                let _ = event_tx.send(event);
            }))
            .unwrap();
        Harness {
            bus,
            driver,
            ticks,
            events,
        }
    }

    fn id(raw: u16) -> SwitchMachineId {
        SwitchMachineId::new(raw)
    }

    // =========================================================================
    // Lifecycle Tests
    // =========================================================================

    #[test]
    fn rejects_invalid_config() {
        let result = TortoiseBusDriver::new(MockTransport::new(1), BusConfig::default().with_boards(0));
        assert!(result.is_err());
    }

    #[test]
    fn update_before_start_fails() {
        let driver = TortoiseBusDriver::new(MockTransport::new(1), BusConfig::default().with_boards(1)).unwrap();
        let state = SwitchMachineState::attached(id(0), Position::Unknown);
        assert!(matches!(
            driver.update_switch_machine(&state),
            Err(DriverError::NotStarted)
        ));
    }

    #[test]
    fn second_start_fails() {
        let h = harness(1);
        let result = h.driver.start(Arc::new(|_: DriverEvent| {}));
        assert!(matches!(result, Err(DriverError::AlreadyStarted)));
        assert!(h.driver.is_running());
    }

    #[test]
    fn close_is_idempotent_and_closes_transport_once() {
        let h = harness(1);
        h.driver.close().unwrap();
        h.driver.close().unwrap();
        assert_eq!(h.bus.close_count(), 1);
        assert!(!h.driver.is_running());

        let state = SwitchMachineState::attached(id(0), Position::Unknown);
        assert!(matches!(
            h.driver.update_switch_machine(&state),
            Err(DriverError::Closed)
        ));
    }

    #[test]
    fn close_without_start_closes_transport() {
        let bus = MockTransport::new(1);
        let driver = TortoiseBusDriver::new(bus.clone(), BusConfig::default().with_boards(1)).unwrap();
        driver.close().unwrap();
        drop(driver);
        assert_eq!(bus.close_count(), 1);
    }

    // =========================================================================
    // Poll Tests
    // =========================================================================

    #[test]
    fn no_events_without_changes() {
        let h = harness(1);
        h.ticks.send(Instant::now()).unwrap();
        h.ticks.send(Instant::now()).unwrap();
        assert!(matches!(
            h.events.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Timeout)
        ));
    }

    #[test]
    fn poll_now_dispatches_before_returning() {
        let h = harness(1);
        h.bus.set_rx(&[0x30]);
        h.driver.poll_now().unwrap();
        assert_eq!(
            h.events.try_recv().unwrap(),
            DriverEvent::Added(SwitchMachineState::attached(id(0), Position::Unknown))
        );
    }

    #[test]
    fn receive_failure_reports_fault_and_keeps_previous_frame() {
        let h = harness(1);
        h.bus.set_rx(&[0x30]);
        h.driver.poll_now().unwrap();
        assert!(matches!(h.events.recv_timeout(WAIT), Ok(DriverEvent::Added(_))));

        h.bus.set_fail_receive(true);
        h.driver.poll_now().unwrap();
        assert!(matches!(
            h.events.recv_timeout(WAIT),
            Ok(DriverEvent::TransportFault { .. })
        ));

        // Same frame as before the failure: nothing to report
        h.bus.set_fail_receive(false);
        h.driver.poll_now().unwrap();
        assert!(h.events.try_recv().is_err());
    }

    // =========================================================================
    // Write Tests
    // =========================================================================

    #[test]
    fn update_transmits_before_returning() {
        let h = harness(1);
        let state = SwitchMachineState::attached(id(0), Position::Unknown)
            .with_gpio(GpioState::On, GpioState::Off);
        h.driver.update_switch_machine(&state).unwrap();
        assert_eq!(h.bus.last_transmit(), Some(vec![0x00, 0x10]));
    }

    #[test]
    fn out_of_range_update_is_rejected() {
        let h = harness(1);
        let state = SwitchMachineState::attached(id(4), Position::Unknown);
        assert!(matches!(
            h.driver.update_switch_machine(&state),
            Err(DriverError::InvalidId(_))
        ));
        assert!(h.bus.transmits().is_empty());
    }

    #[test]
    fn listener_can_write_back_without_deadlock() {
        let bus = MockTransport::new(1);
        let (ticks, trigger) = bounded(0);
        let driver = Arc::new(
            TortoiseBusDriver::new(bus.clone(), BusConfig::default().with_boards(1))
                .unwrap()
                .with_poll_trigger(trigger),
        );
        let (done_tx, done_rx) = unbounded();
        let weak = Arc::downgrade(&driver);
        driver
            .start(Arc::new(move |event: DriverEvent| {
                if let (DriverEvent::Added(state), Some(driver)) = (event, weak.upgrade()) {
                    let result = driver
                        .update_switch_machine(&state.with_gpio(GpioState::On, GpioState::On));
                    done_tx.send(result.is_ok()).unwrap();
                }
            }))
            .unwrap();

        bus.set_rx(&[0x30]);
        ticks.send(Instant::now()).unwrap();
        assert_eq!(done_rx.recv_timeout(WAIT), Ok(true));

        // The queued write goes out before the next command is served
        driver.poll_now().unwrap();
        assert_eq!(bus.last_transmit(), Some(vec![0x00, 0x30]));
        driver.close().unwrap();
    }
}
