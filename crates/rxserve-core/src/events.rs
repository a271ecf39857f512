//! Listener plumbing for subsystem events.
//!
//! Each subsystem defines its own event enum and exposes `on_*` hooks on
//! its builder; this module provides the shared registry those hooks feed.

use std::fmt;
use std::sync::Arc;

/// An observable occurrence inside a subsystem.
pub trait Event: Send + Sync + fmt::Debug {
    /// Event discriminant, e.g. `"state_transition"`.
    fn kind(&self) -> &'static str;
    /// Name of the component instance that emitted the event.
    fn component(&self) -> &str;
}

/// Receives events from one subsystem.
pub trait Listener<E: Event>: Send + Sync {
    fn on_event(&self, event: &E);
}

/// A registered set of listeners.
///
/// Emission isolates panics: a misbehaving listener is logged and skipped
/// so the remaining listeners still run.
#[derive(Clone)]
pub struct Listeners<E: Event> {
    listeners: Vec<Arc<dyn Listener<E>>>,
}

impl<E: Event> Listeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: Listener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if outcome.is_err() {
                tracing::warn!(
                    component = event.component(),
                    kind = event.kind(),
                    "event listener panicked"
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E: Event> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a closure into a [`Listener`].
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<E, F> Listener<E> for FnListener<F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}
