//! State-sync broadcaster (spec §4.L): fans out every state-manager event
//! to the dashboard transport, coalescing high-frequency events with a
//! keyed debounce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::events::{Event, EventBus};
use crate::external::DashboardTransport;

pub struct Broadcaster {
    events: Arc<EventBus>,
    transport: Arc<dyn DashboardTransport>,
    debounce: Duration,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: Notify,
    stopped: AtomicBool,
}

impl Broadcaster {
    pub fn spawn(events: Arc<EventBus>, transport: Arc<dyn DashboardTransport>, debounce: Duration) -> Arc<Self> {
        let this = Arc::new(Self {
            events,
            transport,
            debounce,
            pending: Mutex::new(HashMap::new()),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
        });
        tokio::spawn(this.clone().run());
        this
    }

    async fn run(self: Arc<Self>) {
        let mut rx = self.events.subscribe();
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                recv = rx.recv() => {
                    match recv {
                        Ok(event) => self.handle_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Broadcaster::run: receiver lagged, some events were dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: Event) {
        match event.debounce_key() {
            None => self.emit_now(event).await,
            Some(key) => {
                let mut pending = self.pending.lock().await;
                if let Some(handle) = pending.remove(&key) {
                    handle.abort();
                }
                let this = self.clone();
                let debounce = self.debounce;
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(debounce).await;
                    this.emit_now(event).await;
                });
                pending.insert(key, handle);
            }
        }
    }

    /// Every broadcast is wrapped so a transport error for one event never
    /// breaks the subscription chain for the next (spec §4.L); the
    /// transport trait itself is infallible at this boundary, so this is a
    /// single call site rather than a try/catch.
    async fn emit_now(&self, event: Event) {
        let message = serde_json::json!({"type": event.event_type(), "payload": event});
        self.transport.broadcast(message).await;
    }

    /// Cancels every pending debounce timer and stops consuming events.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        let mut pending = self.pending.lock().await;
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingTransport {
        messages: TokioMutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl DashboardTransport for RecordingTransport {
        async fn broadcast(&self, message: serde_json::Value) {
            self.messages.lock().await.push(message);
        }
        async fn send_to(&self, _client_id: &str, _message: serde_json::Value) {}
    }

    #[tokio::test]
    async fn low_frequency_events_fire_immediately() {
        let events = crate::events::create_event_bus();
        let transport = Arc::new(RecordingTransport { messages: TokioMutex::new(Vec::new()) });
        let broadcaster = Broadcaster::spawn(events.clone(), transport.clone(), Duration::from_millis(50));
        events.emit(Event::TasksUpdated);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.messages.lock().await.len(), 1);
        broadcaster.shutdown().await;
    }

    #[tokio::test]
    async fn high_frequency_events_coalesce_within_debounce_window() {
        let events = crate::events::create_event_bus();
        let transport = Arc::new(RecordingTransport { messages: TokioMutex::new(Vec::new()) });
        let broadcaster = Broadcaster::spawn(events.clone(), transport.clone(), Duration::from_millis(60));

        for _ in 0..5 {
            events.emit(Event::StateCapacity { snapshot: serde_json::json!({}) });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.messages.lock().await.len(), 1);
        broadcaster.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_debounce_without_firing() {
        let events = crate::events::create_event_bus();
        let transport = Arc::new(RecordingTransport { messages: TokioMutex::new(Vec::new()) });
        let broadcaster = Broadcaster::spawn(events.clone(), transport.clone(), Duration::from_millis(200));

        events.emit(Event::StateCapacity { snapshot: serde_json::json!({}) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broadcaster.shutdown().await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(transport.messages.lock().await.is_empty());
    }
}
