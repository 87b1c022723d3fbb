//! Typed observer primitives.
//!
//! Every outward signal of the engine is an explicit typed channel owned by
//! its producer; there is no global event bus. [`Signal`] carries a current
//! value plus change subscribers, [`EventStream`] is a drainable event queue,
//! and [`Debouncer`] batches bursts of events into one trigger.

use crossbeam_channel::{unbounded, Receiver, Sender};
use instant::Instant;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Callback<T> = Box<dyn FnMut(&T) + Send>;

struct SignalInner<T> {
    value: T,
    callbacks: Vec<Callback<T>>,
}

/// A current-value observable. Subscribers run synchronously on the thread
/// that calls [`Signal::set`]; callbacks must not set the same signal again.
pub struct Signal<T> {
    inner: Arc<Mutex<SignalInner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq> Signal<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SignalInner {
                value: initial,
                callbacks: Vec::new(),
            })),
        }
    }

    /// The current value.
    pub fn get(&self) -> T {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.value.clone()
    }

    /// Updates the value, notifying subscribers only when it changed.
    pub fn set(&self, value: T) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.value == value {
            return;
        }
        inner.value = value;
        let value = inner.value.clone();
        for callback in inner.callbacks.iter_mut() {
            callback(&value);
        }
    }

    /// Registers a change subscriber.
    pub fn subscribe(&self, callback: impl FnMut(&T) + Send + 'static) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.callbacks.push(Box::new(callback));
    }
}

/// A drainable queue of events with a cloneable sender side. The engine
/// emits; one logical consumer drains.
pub struct EventStream<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> EventStream<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn emit(&self, event: T) {
        // The receiver half lives as long as self, so the send cannot fail.
        let _ = self.tx.send(event);
    }

    /// A sender handle for producers on other threads.
    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    /// All events emitted since the last drain.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}

impl<T> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapses bursts of events into a single trigger once a quiet window has
/// passed since the last event.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
        }
    }

    /// Notes that an event happened, restarting the quiet window.
    pub fn note(&mut self) {
        self.last_event = Some(Instant::now());
    }

    /// True once the quiet window has elapsed since the last noted event.
    /// Resets on firing; returns false until the next [`Debouncer::note`].
    pub fn ready(&mut self) -> bool {
        match self.last_event {
            Some(last) if last.elapsed() >= self.window => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }

    /// True while an event burst is waiting for its quiet window.
    pub fn pending(&self) -> bool {
        self.last_event.is_some()
    }
}
