use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::BusyPolicy;
use crate::dispatcher::panic_message;
use crate::error::{ChannelError, Result};

/// Identifies one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Claim on the transaction slot, returned by
/// [`TransactionCoordinator::begin`].
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    id: TransactionId,
    deadline: Instant,
    timeout: Duration,
}

impl Ticket {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

type Matcher<M> = Box<dyn Fn(&M) -> bool + Send>;

enum Outcome<M> {
    Reply(M),
    Cancelled,
}

struct Pending<M> {
    id: TransactionId,
    matcher: Matcher<M>,
    outcome: Option<Outcome<M>>,
}

struct Slot<M> {
    pending: Option<Pending<M>>,
    next_id: u64,
    closed: bool,
}

/// Single-slot correlation of replies to the request awaiting them.
///
/// At most one transaction is pending at a time. It leaves the slot when its
/// caller collects the outcome, times out, or aborts.
pub struct TransactionCoordinator<M> {
    slot: Mutex<Slot<M>>,
    changed: Condvar,
}

impl<M> TransactionCoordinator<M> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                next_id: 0,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<M>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for a transaction resolved by the first message
    /// `matcher` accepts.
    ///
    /// `timeout` bounds both the wait for the slot and the wait for the
    /// reply.
    pub fn begin<F>(&self, matcher: F, timeout: Duration, policy: BusyPolicy) -> Result<Ticket>
    where
        F: Fn(&M) -> bool + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Err(ChannelError::Closed);
            }
            if slot.pending.is_none() {
                break;
            }
            if policy == BusyPolicy::FailFast {
                return Err(ChannelError::Busy);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ChannelError::Timeout(timeout));
            }
            slot = self
                .changed
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let id = TransactionId(slot.next_id);
        slot.next_id += 1;
        slot.pending = Some(Pending {
            id,
            matcher: Box::new(matcher),
            outcome: None,
        });
        debug!(%id, ?timeout, "transaction started");
        Ok(Ticket {
            id,
            deadline,
            timeout,
        })
    }

    /// Block until the transaction resolves or its deadline passes.
    ///
    /// A reply that arrived before the deadline wins even if the caller
    /// observes it late.
    pub fn wait(&self, ticket: Ticket) -> Result<M> {
        let mut slot = self.lock();
        loop {
            let resolved = match &slot.pending {
                Some(pending) if pending.id == ticket.id => pending.outcome.is_some(),
                _ => return Err(ChannelError::Cancelled),
            };
            if resolved {
                let outcome = slot.pending.take().and_then(|pending| pending.outcome);
                self.changed.notify_all();
                return match outcome {
                    Some(Outcome::Reply(message)) => {
                        debug!(id = %ticket.id, "transaction resolved");
                        Ok(message)
                    }
                    _ => Err(ChannelError::Cancelled),
                };
            }

            let now = Instant::now();
            if now >= ticket.deadline {
                slot.pending = None;
                self.changed.notify_all();
                warn!(id = %ticket.id, timeout = ?ticket.timeout, "transaction timed out");
                return Err(ChannelError::Timeout(ticket.timeout));
            }
            slot = self
                .changed
                .wait_timeout(slot, ticket.deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Release the slot without waiting, e.g. when the request write failed.
    pub fn abort(&self, id: TransactionId) {
        let mut slot = self.lock();
        if slot.pending.as_ref().is_some_and(|pending| pending.id == id) {
            slot.pending = None;
            self.changed.notify_all();
            debug!(%id, "transaction aborted");
        }
    }

    /// Resolve the pending transaction with `message` if it matches.
    ///
    /// Returns the message back when nothing consumed it. A matcher that
    /// panics is logged and counts as no match.
    pub fn offer(&self, message: M) -> Option<M> {
        let mut slot = self.lock();
        let Some(pending) = slot.pending.as_mut().filter(|p| p.outcome.is_none()) else {
            return Some(message);
        };
        let matcher = &pending.matcher;
        let matched = match panic::catch_unwind(AssertUnwindSafe(|| matcher(&message))) {
            Ok(matched) => matched,
            Err(payload) => {
                error!(id = %pending.id, panic = %panic_message(payload), "reply matcher panicked");
                false
            }
        };
        if !matched {
            return Some(message);
        }
        pending.outcome = Some(Outcome::Reply(message));
        self.changed.notify_all();
        None
    }

    /// Resolve any pending transaction as cancelled and refuse new ones.
    pub fn cancel_all(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        if let Some(pending) = slot.pending.as_mut() {
            if pending.outcome.is_none() {
                pending.outcome = Some(Outcome::Cancelled);
                debug!(id = %pending.id, "transaction cancelled");
            }
        }
        self.changed.notify_all();
    }

    /// Whether a transaction is waiting for its reply.
    pub fn is_pending(&self) -> bool {
        self.lock()
            .pending
            .as_ref()
            .is_some_and(|pending| pending.outcome.is_none())
    }
}

impl<M> Default for TransactionCoordinator<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for TransactionCoordinator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.lock();
        f.debug_struct("TransactionCoordinator")
            .field("pending", &slot.pending.as_ref().map(|pending| pending.id))
            .field("closed", &slot.closed)
            .finish()
    }
}
