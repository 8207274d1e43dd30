//! Event routing with handler isolation.
//!
//! Maps each [`EventKind`] to at most one async handler. Dispatch awaits
//! the handler and swallows its errors with a log line; a faulty handler
//! must never tear down the event loop.

use crate::error::Result;
use crate::events::{Event, EventKind};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Handler = Box<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Registry of per-event-kind handlers.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<EventKind, Handler>,
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for an event kind, replacing any previous one.
    pub fn register<F, Fut>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers
            .insert(kind, Box::new(move |event| Box::pin(handler(event))));
    }

    /// Whether a handler is registered for the given kind.
    #[must_use]
    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Dispatch an event to its handler, if any.
    ///
    /// Handler errors are logged with the event kind and not re-raised.
    /// A missing handler is reported at debug level only.
    pub async fn dispatch(&self, event: Event) {
        let kind = event.kind();
        match self.handlers.get(&kind) {
            Some(handler) => {
                debug!(event = ?kind, "dispatching event");
                if let Err(e) = handler(event).await {
                    error!(event = ?kind, error = %e, "event handler failed");
                }
            }
            None => debug!(event = ?kind, "no handler registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn dispatch_invokes_registered_handler() {
        let mut router = EventRouter::new();
        let received = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&received);
        router.register(EventKind::SpeechStart, move |_event| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

        router.dispatch(Event::SpeechStart).await;
        assert!(received.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handler_receives_payload_exactly_once() {
        let mut router = EventRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(String::new()));

        let calls_clone = Arc::clone(&calls);
        let seen_clone = Arc::clone(&seen);
        router.register(EventKind::TranscriptionFinal, move |event| {
            let calls = Arc::clone(&calls_clone);
            let seen = Arc::clone(&seen_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Event::TranscriptionFinal { text } = event {
                    *seen.lock().await = text;
                }
                Ok(())
            }
        });

        router
            .dispatch(Event::TranscriptionFinal {
                text: "turn it on".into(),
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(&*seen.lock().await, "turn it on");
    }

    #[tokio::test]
    async fn dispatch_without_handler_is_harmless() {
        let router = EventRouter::new();
        router.dispatch(Event::TtsComplete).await;
    }

    #[tokio::test]
    async fn handler_errors_are_swallowed() {
        let mut router = EventRouter::new();
        router.register(EventKind::Timeout, |_event| async {
            Err(AssistantError::Llm("boom".into()))
        });
        // Must not panic or propagate.
        router.dispatch(Event::Timeout).await;
    }

    #[tokio::test]
    async fn register_replaces_previous_handler() {
        let mut router = EventRouter::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&first);
        router.register(EventKind::TtsStart, move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let c = Arc::clone(&second);
        router.register(EventKind::TtsStart, move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        router.dispatch(Event::TtsStart).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
