//! The status-unit engine: a typed `(queue, status) -> callback` table.
//!
//! # How a queue runs
//!
//! A connection's state slot holds `Some((queue, status))` while a queue is
//! running.  Each [`StatusUnitEngine::drive_once`] call looks up the callback
//! registered for that pair, invokes it, and stores what it returned:
//!
//! ```text
//! (Recv, Start)  ──callback──►  Ok(Some(Length))  → slot = (Recv, Length)
//! (Recv, Length) ──callback──►  Ok(Some(Length))  → run again next tick
//! (Recv, Payload)──callback──►  Ok(None)          → slot = None (idle)
//! (Recv, Mask)   ──callback──►  Err(Halt::Abort)  → slot left as the callback set it
//! ```
//!
//! The engine knows nothing about sockets; the context type `X` supplies the
//! slot through [`UnitState`].

mod signal;

pub use signal::{Halt, UnitResult};

use std::collections::HashMap;

use crate::domain::units::{StateSlot, UnitId};

/// Read/write access to the state slot an engine drives.
pub trait UnitState<Q, S> {
    fn state(&self) -> StateSlot<Q, S>;
    fn set_state(&mut self, next: StateSlot<Q, S>);
}

/// What one `drive_once` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive<Q, S> {
    /// The slot was idle; nothing ran.
    Idle,
    /// No callback is registered for the running pair.  State is unchanged.
    Unregistered { queue: Q, status: S },
    /// A callback ran and returned `next`.
    Ran { queue: Q, status: S, next: Option<S> },
}

/// Typed table of status units.
pub struct StatusUnitEngine<Q, S, U> {
    queues: HashMap<Q, HashMap<S, U>>,
    order: Vec<Q>,
}

impl<Q: UnitId, S: UnitId, U> Default for StatusUnitEngine<Q, S, U> {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<Q: UnitId, S: UnitId, U> StatusUnitEngine<Q, S, U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `unit` for `(queue, status)`, replacing any previous one.
    pub fn add_status_unit(&mut self, queue: Q, status: S, unit: U) {
        if !self.queues.contains_key(&queue) {
            self.order.push(queue);
        }
        self.queues.entry(queue).or_default().insert(status, unit);
    }

    /// True when at least one status is registered for `queue`.
    pub fn is_set_queue(&self, queue: Q) -> bool {
        self.queues.contains_key(&queue)
    }

    /// Registered queues in registration order.
    pub fn queue_names(&self) -> &[Q] {
        &self.order
    }

    /// Registered statuses of `queue` (unordered).
    pub fn status_names(&self, queue: Q) -> Vec<S> {
        self.queues
            .get(&queue)
            .map(|statuses| statuses.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn unit(&self, queue: Q, status: S) -> Option<&U> {
        self.queues.get(&queue)?.get(&status)
    }

    /// Runs the callback for the context's current `(queue, status)` once.
    ///
    /// # Errors
    ///
    /// Propagates the [`Halt`] raised by the callback.  The state slot is not
    /// written in that case.
    pub fn drive_once<X>(&self, ctx: &mut X) -> Result<Drive<Q, S>, Halt>
    where
        X: UnitState<Q, S>,
        U: Fn(&mut X) -> UnitResult<Option<S>>,
    {
        let Some((queue, status)) = ctx.state() else {
            return Ok(Drive::Idle);
        };
        let Some(unit) = self.unit(queue, status) else {
            return Ok(Drive::Unregistered { queue, status });
        };

        let next = unit(&mut *ctx)?;
        ctx.set_state(next.map(|s| (queue, s)));
        Ok(Drive::Ran {
            queue,
            status,
            next,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{UnitError, UnitErrorCode};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Queue {
        Recv,
        Close,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Status {
        Start,
        Length,
    }

    #[derive(Default)]
    struct Ctx {
        slot: StateSlot<Queue, Status>,
        calls: u32,
    }

    impl UnitState<Queue, Status> for Ctx {
        fn state(&self) -> StateSlot<Queue, Status> {
            self.slot
        }
        fn set_state(&mut self, next: StateSlot<Queue, Status>) {
            self.slot = next;
        }
    }

    type Unit = Box<dyn Fn(&mut Ctx) -> UnitResult<Option<Status>>>;

    fn engine() -> StatusUnitEngine<Queue, Status, Unit> {
        let mut engine: StatusUnitEngine<Queue, Status, Unit> = StatusUnitEngine::new();
        engine.add_status_unit(
            Queue::Recv,
            Status::Start,
            Box::new(|ctx: &mut Ctx| -> UnitResult<Option<Status>> {
                ctx.calls += 1;
                Ok(Some(Status::Length))
            }),
        );
        engine.add_status_unit(
            Queue::Recv,
            Status::Length,
            Box::new(|ctx: &mut Ctx| -> UnitResult<Option<Status>> {
                ctx.calls += 1;
                Ok(None)
            }),
        );
        engine
    }

    #[test]
    fn test_drive_idle_slot_is_a_no_op() {
        // Arrange
        let engine = engine();
        let mut ctx = Ctx::default();

        // Act
        let outcome = engine.drive_once(&mut ctx).unwrap();

        // Assert
        assert_eq!(outcome, Drive::Idle);
        assert_eq!(ctx.calls, 0);
    }

    #[test]
    fn test_drive_writes_back_returned_status() {
        let engine = engine();
        let mut ctx = Ctx {
            slot: Some((Queue::Recv, Status::Start)),
            calls: 0,
        };

        let outcome = engine.drive_once(&mut ctx).unwrap();

        assert_eq!(
            outcome,
            Drive::Ran {
                queue: Queue::Recv,
                status: Status::Start,
                next: Some(Status::Length)
            }
        );
        assert_eq!(ctx.slot, Some((Queue::Recv, Status::Length)));
    }

    #[test]
    fn test_drive_none_returns_slot_to_idle() {
        let engine = engine();
        let mut ctx = Ctx {
            slot: Some((Queue::Recv, Status::Length)),
            calls: 0,
        };

        engine.drive_once(&mut ctx).unwrap();

        // Queue and status are cleared together.
        assert_eq!(ctx.slot, None);
    }

    #[test]
    fn test_drive_missing_registration_leaves_state_unchanged() {
        let engine = engine();
        let mut ctx = Ctx {
            slot: Some((Queue::Close, Status::Start)),
            calls: 0,
        };

        let outcome = engine.drive_once(&mut ctx).unwrap();

        assert_eq!(
            outcome,
            Drive::Unregistered {
                queue: Queue::Close,
                status: Status::Start
            }
        );
        assert_eq!(ctx.slot, Some((Queue::Close, Status::Start)));
    }

    #[test]
    fn test_drive_halt_does_not_overwrite_slot() {
        // Arrange: the callback moves the slot itself, then aborts.
        let mut engine: StatusUnitEngine<Queue, Status, Unit> = StatusUnitEngine::new();
        engine.add_status_unit(
            Queue::Recv,
            Status::Start,
            Box::new(|ctx: &mut Ctx| -> UnitResult<Option<Status>> {
                ctx.slot = Some((Queue::Close, Status::Start));
                Err(Halt::Abort)
            }),
        );
        let mut ctx = Ctx {
            slot: Some((Queue::Recv, Status::Start)),
            calls: 0,
        };

        // Act
        let outcome = engine.drive_once(&mut ctx);

        // Assert
        assert_eq!(outcome, Err(Halt::Abort));
        assert_eq!(ctx.slot, Some((Queue::Close, Status::Start)));
    }

    #[test]
    fn test_drive_propagates_unit_error() {
        let mut engine: StatusUnitEngine<Queue, Status, Unit> = StatusUnitEngine::new();
        engine.add_status_unit(
            Queue::Recv,
            Status::Start,
            Box::new(|_: &mut Ctx| -> UnitResult<Option<Status>> {
                Err(Halt::Failed(UnitError::new(
                    UnitErrorCode::ReceivingFail,
                    "boom",
                )))
            }),
        );
        let mut ctx = Ctx {
            slot: Some((Queue::Recv, Status::Start)),
            calls: 0,
        };

        let outcome = engine.drive_once(&mut ctx);

        assert!(matches!(outcome, Err(Halt::Failed(e)) if e.code == UnitErrorCode::ReceivingFail));
    }

    #[test]
    fn test_queue_and_status_listing() {
        let engine = engine();
        assert!(engine.is_set_queue(Queue::Recv));
        assert!(!engine.is_set_queue(Queue::Close));
        assert_eq!(engine.queue_names(), &[Queue::Recv]);
        let mut statuses = engine.status_names(Queue::Recv);
        statuses.sort_by_key(|s| *s as u8);
        assert_eq!(statuses, vec![Status::Start, Status::Length]);
        assert!(engine.status_names(Queue::Close).is_empty());
    }
}
