//! Change notifications for observers of the sync engine.

use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

/// Which kind of stream an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventChannel {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A search page was imported for the stream.
    StreamUpdated { stream_id: i64, updated_ids: Vec<i64> },
    /// Unread, unarchived issues across all streams.
    UnreadCount(u64),
}

impl StreamEvent {
    /// `None` for events that are not tied to a stream.
    #[must_use]
    pub const fn channel(&self) -> Option<EventChannel> {
        match self {
            Self::StreamUpdated { stream_id, .. } if *stream_id > 0 => Some(EventChannel::User),
            Self::StreamUpdated { .. } => Some(EventChannel::System),
            Self::UnreadCount(_) => None,
        }
    }
}

/// Fan-out of [`StreamEvent`]s. Dropping a receiver unsubscribes it.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StreamEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    /// Send to current subscribers; a bus without subscribers drops the event.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_by_stream_sign() {
        let user = StreamEvent::StreamUpdated {
            stream_id: 3,
            updated_ids: vec![],
        };
        let system = StreamEvent::StreamUpdated {
            stream_id: -2,
            updated_ids: vec![1],
        };
        assert_eq!(user.channel(), Some(EventChannel::User));
        assert_eq!(system.channel(), Some(EventChannel::System));
        assert_eq!(StreamEvent::UnreadCount(4).channel(), None);
    }

    #[tokio::test]
    async fn test_subscribers_receive_and_drop() {
        let bus = EventBus::new();
        bus.emit(StreamEvent::UnreadCount(0));

        let mut rx = bus.subscribe();
        bus.emit(StreamEvent::UnreadCount(7));
        assert_eq!(rx.recv().await.unwrap(), StreamEvent::UnreadCount(7));

        drop(rx);
        bus.emit(StreamEvent::UnreadCount(8));
    }
}
