use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use parley_types::events::PushEvent;

use crate::transport::{DeliveryError, PushTransport, Topic};

struct Subscriber {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<PushEvent>,
}

/// Routes push events to the connections subscribed to a topic.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// topic -> open connections listening on it
    topics: DashMap<Topic, Vec<Subscriber>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an existing connection channel to a topic. One connection may
    /// listen on several topics through the same sender.
    pub fn subscribe(&self, topic: Topic, conn_id: Uuid, tx: mpsc::UnboundedSender<PushEvent>) {
        let mut subscribers = self.inner.topics.entry(topic).or_default();
        if subscribers.iter().any(|s| s.conn_id == conn_id) {
            return;
        }
        subscribers.push(Subscriber { conn_id, tx });
    }

    /// Open a fresh single-topic listener. Returns (conn_id, receiver).
    pub fn listen(&self, topic: Topic) -> (Uuid, mpsc::UnboundedReceiver<PushEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(topic, conn_id, tx);
        (conn_id, rx)
    }

    pub fn unsubscribe(&self, topic: &Topic, conn_id: Uuid) {
        let now_empty = match self.inner.topics.get_mut(topic) {
            Some(mut subscribers) => {
                subscribers.retain(|s| s.conn_id != conn_id);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.inner.topics.remove_if(topic, |_, subs| subs.is_empty());
        }
    }

    /// Remove a connection from every topic it listens on.
    pub fn drop_connection(&self, conn_id: Uuid) {
        for mut entry in self.inner.topics.iter_mut() {
            entry.value_mut().retain(|s| s.conn_id != conn_id);
        }
        self.inner.topics.retain(|_, subs| !subs.is_empty());
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

impl PushTransport for Dispatcher {
    fn publish(&self, topic: &Topic, event: &PushEvent) -> Result<usize, DeliveryError> {
        let Some(mut subscribers) = self.inner.topics.get_mut(topic) else {
            return Ok(0);
        };

        subscribers.retain(|s| !s.tx.is_closed());
        let listening = subscribers.len();
        let delivered = subscribers
            .iter()
            .filter(|s| s.tx.send(event.clone()).is_ok())
            .count();

        debug!(%topic, delivered, "push published");
        if listening > 0 && delivered == 0 {
            return Err(DeliveryError::ChannelClosed {
                topic: topic.to_string(),
            });
        }
        Ok(delivered)
    }
}
