use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::notifications::OrderNotifier;

/// Domain events emitted after a transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderCreated(id) => *id,
            Event::OrderStatusChanged { order_id, .. } => *order_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for room in the channel.
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Queues an event without waiting. Used once the state change is already
    /// committed, so a backed-up notifier drops the event instead of stalling
    /// the request.
    pub fn emit(&self, event: Event) {
        let order_id = event.order_id();
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(%order_id, ?event, "Event channel full, dropping notification");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%order_id, "Dropping event, processor is gone");
            }
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender::new(tx), rx)
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), ServiceError>;
}

#[async_trait]
impl EventHandler for OrderNotifier {
    async fn handle_event(&self, event: Event) -> Result<(), ServiceError> {
        match event {
            Event::OrderCreated(order_id) => self.order_created(order_id).await?,
            Event::OrderStatusChanged {
                order_id,
                new_status,
                ..
            } => self.status_changed(order_id, new_status).await?,
        }
        Ok(())
    }
}

/// Drains the channel until every sender is dropped. Handler failures are
/// logged and never stop the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handler: Arc<dyn EventHandler>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(?event, "Received event");
        if let Err(e) = handler.handle_event(event.clone()).await {
            error!(
                order_id = %event.order_id(),
                error = %e,
                "Failed to handle event"
            );
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: Event) -> Result<(), ServiceError> {
            let fail = matches!(event, Event::OrderCreated(id) if id.is_nil());
            self.seen.lock().unwrap().push(event);
            if fail {
                return Err(ServiceError::ExternalServiceError("smtp down".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn loop_survives_handler_failures_and_stops_when_senders_drop() {
        let (sender, rx) = channel(8);
        let recorder = Arc::new(Recorder::default());
        let worker = tokio::spawn(process_events(rx, recorder.clone()));

        let id = Uuid::new_v4();
        sender.emit(Event::OrderCreated(Uuid::nil()));
        sender.emit(Event::OrderStatusChanged {
            order_id: id,
            old_status: OrderStatus::Processing,
            new_status: OrderStatus::Shipped,
        });
        drop(sender);
        worker.await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].order_id(), id);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (sender, rx) = channel(1);
        drop(rx);
        assert!(matches!(
            sender.send(Event::OrderCreated(Uuid::new_v4())).await,
            Err(ServiceError::EventError(_))
        ));
        // emit only logs
        sender.emit(Event::OrderCreated(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn emit_drops_events_when_channel_is_full() {
        let (sender, mut rx) = channel(1);
        let first = Uuid::new_v4();
        sender.emit(Event::OrderCreated(first));
        sender.emit(Event::OrderCreated(Uuid::new_v4()));

        assert_eq!(rx.try_recv().ok(), Some(Event::OrderCreated(first)));
        assert!(rx.try_recv().is_err());
    }
}
