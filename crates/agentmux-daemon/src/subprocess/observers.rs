//! Ordered observer list used for process output and exit fan-out.

use std::sync::{Mutex, MutexGuard, PoisonError};

type Handler<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Ordered list of handlers, all invoked synchronously for every value.
///
/// A list can be latched with [`notify_final`](Self::notify_final): the final
/// value is delivered once to every registered handler, later notifications
/// are ignored, and handlers registered afterwards are called immediately
/// with it. Handlers must not register on the same list while being invoked.
pub struct Observers<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    handlers: Vec<Handler<T>>,
    latched: Option<T>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Observers<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handlers: Vec::new(),
                latched: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler.
    pub fn register(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        let mut inner = self.lock();
        if let Some(value) = &inner.latched {
            handler(value);
        }
        inner.handlers.push(Box::new(handler));
    }

    /// Deliver `value` to every handler in registration order.
    pub fn notify(&self, value: &T) {
        let inner = self.lock();
        if inner.latched.is_some() {
            return;
        }
        for handler in &inner.handlers {
            handler(value);
        }
    }

    /// Deliver a terminal value and latch it. Returns `false` if already latched.
    pub fn notify_final(&self, value: T) -> bool {
        let mut inner = self.lock();
        if inner.latched.is_some() {
            return false;
        }
        for handler in &inner.handlers {
            handler(&value);
        }
        inner.latched = Some(value);
        true
    }

    pub fn is_latched(&self) -> bool {
        self.lock().latched.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Observers<u32>) {
        (Arc::new(Mutex::new(Vec::new())), Observers::new())
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let (log, observers) = recorder();
        for name in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            observers.register(move |v| log.lock().unwrap().push(format!("{name}{v}")));
        }
        observers.notify(&1);
        observers.notify(&2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a1", "b1", "c1", "a2", "b2", "c2"]
        );
    }

    #[test]
    fn final_value_is_delivered_once() {
        let (log, observers) = recorder();
        let early = Arc::clone(&log);
        observers.register(move |v| early.lock().unwrap().push(format!("early{v}")));

        assert!(observers.notify_final(7));
        assert!(!observers.notify_final(8));
        observers.notify(&9);

        let late = Arc::clone(&log);
        observers.register(move |v| late.lock().unwrap().push(format!("late{v}")));

        assert_eq!(*log.lock().unwrap(), vec!["early7", "late7"]);
        assert!(observers.is_latched());
        assert_eq!(observers.len(), 2);
    }
}
