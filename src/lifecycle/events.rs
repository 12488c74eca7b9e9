//! Server lifecycle events.

use dashmap::DashMap;
use std::sync::Arc;
use strum_macros::Display;

/// The occasions a server announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ServerEvent {
    Start,
    Close,
}

type Listener = Arc<dyn Fn(ServerEvent) + Send + Sync>;

/// Subscribers for [`ServerEvent`]s.
///
/// Listeners run synchronously, in subscription order, on the task that
/// emits the event.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use trellis::lifecycle::{ServerEvent, ServerEvents};
///
/// let events = ServerEvents::new();
/// let started = Arc::new(AtomicBool::new(false));
/// let flag = started.clone();
/// events.subscribe(ServerEvent::Start, move |_| flag.store(true, Ordering::SeqCst));
///
/// assert_eq!(events.emit(ServerEvent::Start), 1);
/// assert!(started.load(Ordering::SeqCst));
/// ```
#[derive(Clone, Default)]
pub struct ServerEvents {
    listeners: Arc<DashMap<ServerEvent, Vec<Listener>>>,
}

impl ServerEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event: ServerEvent, listener: F)
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        self.listeners.entry(event).or_default().push(Arc::new(listener));
    }

    /// Notify every listener of `event`. Returns how many were called.
    pub fn emit(&self, event: ServerEvent) -> usize {
        // Listeners may subscribe while being notified; call them on a copy.
        let listeners: Vec<Listener> = self
            .listeners
            .get(&event)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        tracing::debug!("Emitting {} to {} listener(s)", event, listeners.len());
        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    pub fn listener_count(&self, event: ServerEvent) -> usize {
        self.listeners.get(&event).map_or(0, |entry| entry.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listeners_run_in_order_per_event() {
        let events = ServerEvents::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let log = log.clone();
            events.subscribe(ServerEvent::Start, move |event| {
                log.lock().unwrap().push(format!("{name}:{event}"));
            });
        }
        let close_log = log.clone();
        events.subscribe(ServerEvent::Close, move |event| {
            close_log.lock().unwrap().push(format!("closer:{event}"));
        });

        assert_eq!(events.emit(ServerEvent::Start), 2);
        assert_eq!(events.emit(ServerEvent::Close), 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:Start", "second:Start", "closer:Close"]
        );
    }

    #[test]
    fn test_listener_may_subscribe_while_notified() {
        let events = ServerEvents::new();
        let inner = events.clone();
        events.subscribe(ServerEvent::Start, move |_| {
            inner.subscribe(ServerEvent::Start, |_| {});
        });
        assert_eq!(events.emit(ServerEvent::Start), 1);
        assert_eq!(events.listener_count(ServerEvent::Start), 2);
    }
}
