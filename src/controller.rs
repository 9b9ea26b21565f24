//! Switch-machine controller.
//!
//! [`TortoiseController`] keeps the authoritative [`SwitchMachineStore`] in
//! step with what the bus reports, decides when a motor must be driven, and
//! publishes every change as a [`SwitchMachineEvent`].
//!
//! # Reconciliation
//!
//! An update request is compared with the stored state:
//!
//! | Situation | Bus write | Motor | Store + event |
//! |-----------|-----------|-------|---------------|
//! | Same position and GPIO, motor not reversing | no | unchanged | no |
//! | Position differs | yes | toward the requested position | if motor or GPIO changed |
//! | Motor driving away from the requested position | yes | toward the requested position | yes |
//! | Only GPIO differs | yes | unchanged | yes |
//!
//! The stored position is never updated optimistically; it follows the bus.
//! Writes only ever change the motor and GPIO fields, applied onto whatever
//! the store holds once the bus has taken the write, so a position the bus
//! reported in the meantime survives. User updates and motor stops are
//! serialized with each other.
//!
//! Whenever the motor starts driving, a stop is scheduled after the configured
//! run time.
//!
//! # Divergence
//!
//! A driver event that contradicts the store (an `Added` for an attached id,
//! a `Removed` or `PositionChanged` for an unknown one) means the bus and the
//! store no longer agree. The controller logs it, cancels pending stops,
//! closes the driver and hands the error to the divergence handler. The
//! default handler aborts the process.
//!
//! # Example
//!
//! ```rust
//! use rs_tortoise::config::ControllerConfig;
//! use rs_tortoise::hal::MockDriver;
//! use rs_tortoise::traits::DriverEvent;
//! use rs_tortoise::{
//!     MotorState, Position, SwitchMachineId, SwitchMachineState, SwitchMachineUpdateRequest,
//!     TortoiseController,
//! };
//!
//! let driver = MockDriver::new();
//! let controller = TortoiseController::new(driver.clone(), ControllerConfig::default()).unwrap();
//!
//! let id = SwitchMachineId::new(0);
//! driver.emit(DriverEvent::Added(SwitchMachineState::attached(id, Position::Position0)));
//!
//! controller
//!     .update_switch_machine(SwitchMachineUpdateRequest::new(id).with_position(Position::Position1))
//!     .unwrap();
//!
//! let state = controller.get_switch_machine_by_id(id).unwrap();
//! assert_eq!(state.motor_state(), MotorState::ToPosition1);
//! assert_eq!(state.position(), Position::Position0);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, StoreError};
use crate::events::{EventType, SwitchMachineEvent, SwitchMachineEventListener};
use crate::scheduler::MotorStopScheduler;
use crate::store::SwitchMachineStore;
use crate::switch_machine::{
    MotorState, SwitchMachineId, SwitchMachineState, SwitchMachineUpdateRequest,
};
use crate::traits::{Driver, DriverEvent};

/// Called once the store and the bus have diverged, after the driver has been
/// closed.
pub type DivergenceHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

fn abort_on_divergence(_: &StoreError) {
    std::process::abort();
}

struct Inner<D: Driver> {
    driver: D,
    store: SwitchMachineStore,
    scheduler: MotorStopScheduler,
    config: ControllerConfig,
    listener: RwLock<Option<SwitchMachineEventListener>>,
    on_divergence: DivergenceHandler,
    // Held from reading the store until the write is applied to it
    writes: Mutex<()>,
}

/// Authoritative switch-machine state over a [`Driver`].
///
/// Cheap to clone; clones share the same store, driver and listener.
pub struct TortoiseController<D: Driver + 'static> {
    inner: Arc<Inner<D>>,
}

impl<D: Driver + 'static> Clone for TortoiseController<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver + 'static> TortoiseController<D> {
    /// Creates the controller and starts `driver` with it as listener.
    ///
    /// A store divergence aborts the process.
    pub fn new(driver: D, config: ControllerConfig) -> Result<Self, ControllerError> {
        Self::with_divergence_handler(driver, config, Arc::new(abort_on_divergence))
    }

    /// Like [`new`](Self::new), but calls `on_divergence` instead of
    /// aborting. The driver is already closed when it runs.
    pub fn with_divergence_handler(
        driver: D,
        config: ControllerConfig,
        on_divergence: DivergenceHandler,
    ) -> Result<Self, ControllerError> {
        let inner = Arc::new(Inner {
            driver,
            store: SwitchMachineStore::new(),
            scheduler: MotorStopScheduler::new(),
            config,
            listener: RwLock::new(None),
            on_divergence,
            writes: Mutex::new(()),
        });

        let weak: Weak<Inner<D>> = Arc::downgrade(&inner);
        inner.driver.start(Arc::new(move |event: DriverEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_driver_event(event);
            }
        }))?;

        info!(
            motor_run_time_ms = inner.config.motor_run_time_ms,
            "tortoise controller started"
        );
        Ok(Self { inner })
    }

    /// Applies a user request. See the module docs for the rules.
    pub fn update_switch_machine(
        &self,
        request: SwitchMachineUpdateRequest,
    ) -> Result<(), ControllerError> {
        self.inner.update_switch_machine(request)
    }

    /// Every attached switch machine, ordered by id.
    pub fn get_switch_machines(&self) -> Vec<SwitchMachineState> {
        self.inner.store.get_all()
    }

    /// One switch machine.
    pub fn get_switch_machine_by_id(
        &self,
        id: SwitchMachineId,
    ) -> Result<SwitchMachineState, ControllerError> {
        self.inner
            .store
            .get_by_id(id)
            .ok_or(ControllerError::NotExist(id))
    }

    /// True if `id` is attached.
    pub fn has_switch_machine(&self, id: SwitchMachineId) -> bool {
        self.inner.store.has_id(id)
    }

    /// Registers the domain event listener, replacing any previous one.
    ///
    /// Bus-reported changes are delivered on the driver's thread. The listener
    /// must hand work off rather than call
    /// [`update_switch_machine`](Self::update_switch_machine) inline, since
    /// another update may be waiting on that thread.
    pub fn set_switch_machine_event_listener<F>(&self, listener: F)
    where
        F: Fn(&SwitchMachineEvent) + Send + Sync + 'static,
    {
        let listener: SwitchMachineEventListener = Arc::new(listener);
        *self
            .inner
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Removes the domain event listener.
    pub fn clear_switch_machine_event_listener(&self) {
        *self
            .inner
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Applies one driver event. Normally called by the driver.
    ///
    /// An event that contradicts the store triggers the divergence path
    /// described in the module docs.
    pub fn handle_driver_event(&self, event: DriverEvent) {
        self.inner.handle_driver_event(event);
    }

    /// The driver this controller runs on.
    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Controller settings.
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Cancels pending motor stops and closes the driver.
    pub fn close(&self) -> Result<(), ControllerError> {
        info!("closing tortoise controller");
        self.inner.scheduler.cancel_all();
        self.inner.driver.close()?;
        Ok(())
    }
}

impl<D: Driver + 'static> Inner<D> {
    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_switch_machine(
        self: &Arc<Self>,
        request: SwitchMachineUpdateRequest,
    ) -> Result<(), ControllerError> {
        let id = request.id;
        let _writes = self.lock_writes();
        let current = self
            .store
            .get_by_id(id)
            .ok_or(ControllerError::NotExist(id))?;
        let requested = request.resolve(&current);
        debug!(%current, %requested, "update requested");

        let reversing = current
            .motor_state()
            .is_running_opposite_to(requested.position());
        if requested.same_updateable_fields(&current) && !reversing {
            debug!(%id, "no change requested");
            return Ok(());
        }

        let motor = if requested.position() != current.position() || reversing {
            MotorState::toward(requested.position())
        } else {
            current.motor_state()
        };
        let next = SwitchMachineState::new(
            id,
            current.position(),
            motor,
            requested.gpio0(),
            requested.gpio1(),
        );
        if next == current {
            debug!(%id, "already driving toward requested position");
            return Ok(());
        }

        debug!(%next, "writing switch machine");
        self.driver.update_switch_machine(&next)?;

        let (gpio0, gpio1) = (next.gpio0(), next.gpio1());
        let applied = self
            .store
            .modify(id, |latest| latest.with_motor_state(motor).with_gpio(gpio0, gpio1));
        let updated = match applied {
            Ok(updated) => updated,
            Err(_) => {
                // Detached while the write was in flight; it may have landed
                // after the removal reset
                warn!(%id, "switch machine removed during write, resetting outputs");
                if let Err(err) = self.driver.update_switch_machine(&next.neutral()) {
                    warn!(%id, %err, "output reset failed");
                }
                return Err(ControllerError::NotExist(id));
            }
        };

        if motor != current.motor_state() {
            if motor.is_driving() {
                self.schedule_stop(id, motor);
            } else {
                self.scheduler.cancel(id);
            }
        }
        self.emit(EventType::Updated, updated);
        Ok(())
    }

    fn schedule_stop(self: &Arc<Self>, id: SwitchMachineId, motor: MotorState) {
        let weak = Arc::downgrade(self);
        let delay = self.config.motor_run_time();
        debug!(%id, %motor, ?delay, "scheduling motor stop");
        self.scheduler.schedule(id, delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.stop_motor(id, motor);
            }
        });
    }

    /// Idles the motor of `id` if it is still running as `scheduled`, keeping
    /// whatever position and GPIO the store holds by now.
    fn stop_motor(&self, id: SwitchMachineId, scheduled: MotorState) {
        let _writes = self.lock_writes();
        let Some(current) = self.store.get_by_id(id) else {
            debug!(%id, "motor stop skipped, switch machine gone");
            return;
        };
        if current.motor_state() != scheduled {
            debug!(%current, %scheduled, "motor stop skipped, motor was redirected");
            return;
        }
        let stopped = current.with_motor_state(MotorState::Idle);
        debug!(%stopped, "stopping motor");

        if let Err(err) = self.driver.update_switch_machine(&stopped) {
            warn!(%id, %err, "motor stop write failed");
            return;
        }
        match self
            .store
            .modify(id, |latest| latest.with_motor_state(MotorState::Idle))
        {
            Ok(stopped) => self.emit(EventType::Updated, stopped),
            Err(_) => debug!(%id, "switch machine removed while stopping"),
        }
    }

    fn handle_driver_event(&self, event: DriverEvent) {
        match event {
            DriverEvent::Added(state) => {
                debug!(%state, "driver reported switch machine added");
                if let Err(err) = self.store.add(state.clone()) {
                    return self.diverged(err);
                }
                self.emit(EventType::Added, state);
            }
            DriverEvent::PositionChanged(reported) => {
                let position = reported.position();
                match self
                    .store
                    .modify(reported.id(), |latest| latest.with_position(position))
                {
                    Ok(next) => {
                        debug!(%next, "driver reported position change");
                        self.emit(EventType::Updated, next);
                    }
                    Err(err) => self.diverged(err),
                }
            }
            DriverEvent::Removed(id) => {
                self.scheduler.cancel(id);
                let last = match self.store.remove(id) {
                    Ok(last) => last,
                    Err(err) => return self.diverged(err),
                };
                debug!(%last, "driver reported switch machine removed, resetting outputs");
                if let Err(err) = self.driver.update_switch_machine(&last.neutral()) {
                    warn!(%id, %err, "output reset failed");
                }
                self.emit(EventType::Removed, last);
            }
            DriverEvent::TransportFault { message } => {
                warn!(%message, "bus transport fault");
            }
        }
    }

    /// The bus and the store disagree: stop driving anything, then fail.
    fn diverged(&self, err: StoreError) {
        error!(%err, "switch machine store diverged from bus");
        self.scheduler.cancel_all();
        if let Err(close_err) = self.driver.close() {
            warn!(%close_err, "driver close after divergence failed");
        }
        (self.on_divergence)(&err);
    }

    fn emit(&self, event_type: EventType, state: SwitchMachineState) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener(&SwitchMachineEvent::new(event_type, state));
        }
    }
}
