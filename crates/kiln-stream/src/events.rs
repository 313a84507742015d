//! Stream parser events and their fan-out
//!
//! Every event is scoped to a stream id. Listeners are independently
//! removable callbacks or unbounded channels; publishing never waits on a
//! subscriber, and a closed channel is pruned on the next publish.

use kiln_core::{ArtifactBlock, ContentType, ParseFailure};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::parser::ParserState;

/// Events raised while a stream is parsed
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The parser moved between states
    StateTransition {
        stream_id: String,
        from: ParserState,
        to: ParserState,
    },
    /// An artifact's open tag resolved; its body may still be arriving
    ArtifactDetected {
        stream_id: String,
        id: String,
        content_type: ContentType,
        title: String,
    },
    /// An artifact reached its depth-zero closing delimiter and was structured
    ArtifactCompleted {
        stream_id: String,
        block: Arc<ArtifactBlock>,
    },
    /// A span was discarded (unterminated or structurally broken)
    ParseFailed {
        stream_id: String,
        failure: ParseFailure,
    },
}

impl StreamEvent {
    pub fn stream_id(&self) -> &str {
        match self {
            StreamEvent::StateTransition { stream_id, .. }
            | StreamEvent::ArtifactDetected { stream_id, .. }
            | StreamEvent::ArtifactCompleted { stream_id, .. }
            | StreamEvent::ParseFailed { stream_id, .. } => stream_id,
        }
    }

    /// Short event name, as used in logs and CLI output
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::StateTransition { .. } => "state_transition",
            StreamEvent::ArtifactDetected { .. } => "artifact_detected",
            StreamEvent::ArtifactCompleted { .. } => "artifact_completed",
            StreamEvent::ParseFailed { .. } => "parse_failed",
        }
    }
}

/// Handle returned by a subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&StreamEvent) + Send + Sync>;

/// Delivers events to subscribers in production order
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
    channels: Vec<(ListenerId, mpsc::UnboundedSender<StreamEvent>)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    /// Register a callback. Callbacks run inline and must not block.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Register a channel subscriber
    pub fn subscribe_channel(&mut self) -> (ListenerId, mpsc::UnboundedReceiver<StreamEvent>) {
        let id = self.allocate_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.push((id, tx));
        (id, rx)
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.channels.retain(|(lid, _)| *lid != id);
        self.len() != before
    }

    pub fn publish(&mut self, event: &StreamEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
        self.channels.retain(|(id, tx)| {
            let open = tx.send(event.clone()).is_ok();
            if !open {
                tracing::debug!("Dropping closed event channel {:?}", id);
            }
            open
        });
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.listeners.len() + self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn detected(id: &str) -> StreamEvent {
        StreamEvent::ArtifactDetected {
            stream_id: "s1".to_string(),
            id: id.to_string(),
            content_type: ContentType::Html,
            title: id.to_string(),
        }
    }

    #[test]
    fn test_callbacks_receive_in_order() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |event| {
            if let StreamEvent::ArtifactDetected { id, .. } = event {
                sink.lock().unwrap().push(id.clone());
            }
        });

        bus.publish(&detected("a"));
        bus.publish(&detected("b"));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_unsubscribe_is_independent() {
        let mut bus = EventBus::new();
        let count_a = Arc::new(Mutex::new(0));
        let count_b = Arc::new(Mutex::new(0));
        let (a, b) = (count_a.clone(), count_b.clone());
        let id_a = bus.subscribe(move |_| *a.lock().unwrap() += 1);
        bus.subscribe(move |_| *b.lock().unwrap() += 1);

        bus.publish(&detected("x"));
        assert!(bus.unsubscribe(id_a));
        assert!(!bus.unsubscribe(id_a));
        bus.publish(&detected("y"));

        assert_eq!(*count_a.lock().unwrap(), 1);
        assert_eq!(*count_b.lock().unwrap(), 2);
    }

    #[test]
    fn test_closed_channel_pruned() {
        let mut bus = EventBus::new();
        let (_, rx) = bus.subscribe_channel();
        let (_, mut live) = bus.subscribe_channel();
        assert_eq!(bus.len(), 2);

        drop(rx);
        bus.publish(&detected("z"));
        assert_eq!(bus.len(), 1);
        assert_eq!(live.try_recv().unwrap().name(), "artifact_detected");
    }
}
