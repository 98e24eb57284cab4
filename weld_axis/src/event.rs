//! One-shot completion events.
//!
//! A blocking caller resets the event, which hands out a ticket, posts its
//! request with that ticket and waits. The cyclic side signals the ticket
//! with the outcome. Every reset starts a new generation: waiters and
//! signals of an older generation are superseded, so a caller whose request
//! was replaced never consumes the completion of its successor.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Generation handle returned by [`CompletionEvent::reset`].
///
/// Generation 0 is never handed out, which lets a raw value of 0 mean
/// "no ticket" where tickets are stored in atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventTicket(u64);

impl EventTicket {
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }
}

#[derive(Debug, Default)]
struct EventState {
    generation: u64,
    outcome: Option<bool>,
}

/// Auto-resetting binary event with timed wait.
#[derive(Debug, Default)]
pub struct CompletionEvent {
    state: Mutex<EventState>,
    cond: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and wake any superseded waiter.
    pub fn reset(&self) -> EventTicket {
        let mut state = self.state.lock();
        state.generation += 1;
        state.outcome = None;
        self.cond.notify_all();
        EventTicket(state.generation)
    }

    /// Current generation, if any reset happened yet.
    pub fn ticket(&self) -> Option<EventTicket> {
        EventTicket::from_raw(self.state.lock().generation)
    }

    /// Complete `ticket` with `outcome`.
    ///
    /// Returns `false` (and does nothing) when the ticket is stale.
    pub fn signal(&self, ticket: EventTicket, outcome: bool) -> bool {
        let mut state = self.state.lock();
        if state.generation != ticket.0 {
            return false;
        }
        state.outcome = Some(outcome);
        self.cond.notify_all();
        true
    }

    /// Whether `ticket` has been signaled and not yet consumed.
    pub fn is_signaled(&self, ticket: EventTicket) -> bool {
        let state = self.state.lock();
        state.generation == ticket.0 && state.outcome.is_some()
    }

    /// Wait for `ticket` to be signaled.
    ///
    /// - `Some(outcome)` when signaled; the signal is consumed
    /// - `Some(false)` when a newer reset superseded the ticket
    /// - `None` on timeout
    pub fn wait(&self, ticket: EventTicket, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.generation != ticket.0 {
                return Some(false);
            }
            if let Some(outcome) = state.outcome.take() {
                return Some(outcome);
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                // a signal may have raced the timeout
                if state.generation == ticket.0 {
                    return state.outcome.take();
                }
                return Some(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_kept() {
        let ev = CompletionEvent::new();
        let t = ev.reset();
        assert!(ev.signal(t, true));
        assert!(ev.is_signaled(t));
        assert_eq!(ev.wait(t, Duration::from_millis(10)), Some(true));
        // auto-reset
        assert!(!ev.is_signaled(t));
        assert_eq!(ev.wait(t, Duration::from_millis(10)), None);
    }

    #[test]
    fn stale_signal_is_ignored() {
        let ev = CompletionEvent::new();
        let first = ev.reset();
        let second = ev.reset();
        assert!(!ev.signal(first, true));
        assert!(!ev.is_signaled(second));
        assert_eq!(ev.ticket(), Some(second));
    }

    #[test]
    fn reset_supersedes_waiter() {
        let ev = Arc::new(CompletionEvent::new());
        let first = ev.reset();
        let waiter = {
            let ev = Arc::clone(&ev);
            thread::spawn(move || ev.wait(first, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        let second = ev.reset();
        assert_eq!(waiter.join().unwrap(), Some(false));
        assert!(ev.signal(second, true));
    }

    #[test]
    fn cross_thread_signal() {
        let ev = Arc::new(CompletionEvent::new());
        let t = ev.reset();
        let signaler = {
            let ev = Arc::clone(&ev);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                ev.signal(t, false)
            })
        };
        assert_eq!(ev.wait(t, Duration::from_secs(5)), Some(false));
        assert!(signaler.join().unwrap());
    }

    #[test]
    fn ticket_zero_is_none() {
        assert_eq!(EventTicket::from_raw(0), None);
        assert_eq!(EventTicket::from_raw(7).map(EventTicket::raw), Some(7));
        assert_eq!(CompletionEvent::new().ticket(), None);
    }
}
