use parking_lot::{Condvar, Mutex};
use std::fmt;

/// Resolves a value at most once, sharing the result with every caller.
///
/// The first caller of [`Negotiator::resolve`] runs the decision; concurrent callers block until
/// it completes and then observe the same value. Once resolved, the value never changes for the
/// lifetime of the negotiator. If the decision panics, the negotiator is poisoned and every
/// caller panics rather than waiting for a value that will never arrive.
pub struct Negotiator<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

type Decide<T> = Box<dyn FnOnce() -> T + Send>;

enum State<T> {
    Unresolved(Decide<T>),
    Resolving,
    Resolved(T),
    Poisoned,
}

/// Publishes the outcome of a decision when dropped, including when the decision unwinds.
struct Deciding<'a, T> {
    negotiator: &'a Negotiator<T>,
    value: Option<T>,
}

// === impl Negotiator ===

impl<T: Clone> Negotiator<T> {
    pub fn new(decide: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            state: Mutex::new(State::Unresolved(Box::new(decide))),
            resolved: Condvar::new(),
        }
    }

    pub fn resolve(&self) -> T {
        let mut state = self.state.lock();
        loop {
            match &*state {
                State::Resolved(value) => return value.clone(),
                State::Resolving => {
                    self.resolved.wait(&mut state);
                    continue;
                }
                State::Poisoned => panic!("negotiation panicked"),
                State::Unresolved(_) => {}
            }

            if let State::Unresolved(decide) = std::mem::replace(&mut *state, State::Resolving) {
                // The lock is released while deciding so that waiters park on the condvar.
                drop(state);
                let mut deciding = Deciding {
                    negotiator: self,
                    value: None,
                };
                let value = decide();
                deciding.value = Some(value.clone());
                return value;
            }
        }
    }

    /// Returns the resolved value without triggering resolution.
    pub fn get(&self) -> Option<T> {
        match &*self.state.lock() {
            State::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Negotiator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Negotiator");
        match &*self.state.lock() {
            State::Unresolved(_) => d.field("state", &"unresolved"),
            State::Resolving => d.field("state", &"resolving"),
            State::Resolved(value) => d.field("resolved", value),
            State::Poisoned => d.field("state", &"poisoned"),
        };
        d.finish()
    }
}

// === impl Deciding ===

impl<T> Drop for Deciding<'_, T> {
    fn drop(&mut self) {
        let mut state = self.negotiator.state.lock();
        *state = match self.value.take() {
            Some(value) => State::Resolved(value),
            None => State::Poisoned,
        };
        drop(state);
        self.negotiator.resolved.notify_all();
    }
}
