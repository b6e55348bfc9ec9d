//! In-memory broker for tests and local runs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::sync::{oneshot, watch};

use crate::broker::{
    Acknowledger, BrokerChannel, Confirm, Connector, InboundMessage, InboundStream,
    OutboundMessage,
};
use crate::error::{MessagingError, Result};
use crate::queues::QueueSpec;

/// How the broker answers publisher confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmMode {
    #[default]
    Ack,
    Nack,
    /// Never answers; publishers run into their timeout.
    Silent,
}

/// A message accepted for publishing, as recorded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub queue: String,
    pub body: Vec<u8>,
    pub priority: u8,
    pub persistent: bool,
}

impl PublishedMessage {
    /// Decodes the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

struct Consumer {
    channel: u64,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

struct Unacked {
    channel: u64,
    body: Vec<u8>,
}

#[derive(Default)]
struct QueueState {
    spec: Option<QueueSpec>,
    ready: VecDeque<Vec<u8>>,
    consumers: Vec<Consumer>,
    next: usize,
    next_tag: u64,
    /// Delivered but not yet settled, by delivery tag.
    unacked: BTreeMap<u64, Unacked>,
    acked: usize,
    nacked: usize,
}

impl QueueState {
    /// Puts back every unsettled delivery of the channels matching `closed`.
    ///
    /// Requeued messages go to the head of the queue in delivery order.
    fn requeue_unacked(&mut self, closed: impl Fn(u64) -> bool) {
        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, delivery)| closed(delivery.channel))
            .map(|(tag, _)| *tag)
            .collect();
        for tag in tags.into_iter().rev() {
            if let Some(delivery) = self.unacked.remove(&tag) {
                self.ready.push_front(delivery.body);
            }
        }
    }
}

#[derive(Default)]
struct BrokerState {
    confirm_mode: ConfirmMode,
    refuse_connections: bool,
    next_channel: u64,
    connections: usize,
    open: HashMap<u64, watch::Sender<Option<String>>>,
    queues: HashMap<String, QueueState>,
    published: Vec<PublishedMessage>,
    unconfirmed: Vec<oneshot::Sender<Confirm>>,
}

impl BrokerState {
    fn ensure_open(&self, channel: u64) -> Result<()> {
        if self.open.contains_key(&channel) {
            Ok(())
        } else {
            Err(MessagingError::Broker("channel is closed".to_string()))
        }
    }
}

/// Broker double that routes messages between publishers and consumers in
/// process.
///
/// Acked publishes are delivered round-robin to the queue's consumers or
/// held until one appears. Nacked-with-requeue messages are redelivered
/// the same way. Deliveries still unsettled when their channel closes go
/// back to the head of the queue.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_confirm_mode(&self, mode: ConfirmMode) {
        lock(&self.state).confirm_mode = mode;
    }

    /// Makes subsequent connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.state).refuse_connections = refuse;
    }

    /// Closes every open channel as if the broker went away.
    ///
    /// Consumer streams end, unsettled deliveries are requeued and
    /// outstanding confirmations are dropped.
    pub fn drop_connection(&self, reason: &str) {
        let mut state = lock(&self.state);
        for (_, closed) in state.open.drain() {
            closed.send_replace(Some(reason.to_string()));
        }
        for queue in state.queues.values_mut() {
            queue.consumers.clear();
            queue.requeue_unacked(|_| true);
        }
        state.unconfirmed.clear();
    }

    /// Number of successful connections so far.
    pub fn connection_count(&self) -> usize {
        lock(&self.state).connections
    }

    /// Names of the declared queues, sorted.
    pub fn declared_queues(&self) -> Vec<String> {
        let state = lock(&self.state);
        let mut names: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.spec.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Declaration parameters of a queue, if declared.
    pub fn queue_spec(&self, queue: &str) -> Option<QueueSpec> {
        lock(&self.state).queues.get(queue).and_then(|q| q.spec)
    }

    /// Every publish accepted on `queue`, whatever the confirm mode.
    pub fn published(&self, queue: &str) -> Vec<PublishedMessage> {
        lock(&self.state)
            .published
            .iter()
            .filter(|m| m.queue == queue)
            .cloned()
            .collect()
    }

    /// Delivers a message to `queue` as an external producer would.
    pub fn push(&self, queue: &str, body: Vec<u8>) {
        let mut state = lock(&self.state);
        let target = state.queues.entry(queue.to_string()).or_default();
        self.dispatch(target, queue, body);
    }

    /// Delivers a JSON message to `queue`.
    pub fn push_json<T: Serialize>(&self, queue: &str, message: &T) -> serde_json::Result<()> {
        self.push(queue, serde_json::to_vec(message)?);
        Ok(())
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn ready_count(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.iter().filter(|c| !c.tx.is_closed()).count())
    }

    /// Messages delivered on `queue` and not yet acked or nacked.
    pub fn unacked_count(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    pub fn acked(&self, queue: &str) -> usize {
        lock(&self.state).queues.get(queue).map_or(0, |q| q.acked)
    }

    pub fn nacked(&self, queue: &str) -> usize {
        lock(&self.state).queues.get(queue).map_or(0, |q| q.nacked)
    }

    fn dispatch(&self, target: &mut QueueState, queue: &str, mut body: Vec<u8>) {
        while !target.consumers.is_empty() {
            let idx = target.next % target.consumers.len();
            let channel = target.consumers[idx].channel;
            target.next_tag += 1;
            let tag = target.next_tag;
            let acker = MemoryAcker {
                broker: self.clone(),
                channel,
                queue: queue.to_string(),
                tag,
            };
            let message = InboundMessage::new(body.clone(), Box::new(acker));
            match target.consumers[idx].tx.send(message) {
                Ok(()) => {
                    target.unacked.insert(tag, Unacked { channel, body });
                    target.next = idx + 1;
                    return;
                }
                Err(SendError(returned)) => {
                    target.consumers.remove(idx);
                    body = returned.body;
                }
            }
        }
        target.ready.push_back(body);
    }

    fn settle(&self, channel: u64, queue: &str, tag: u64, nack: Option<bool>) -> Result<()> {
        let mut state = lock(&self.state);
        state.ensure_open(channel)?;
        let target = state.queues.entry(queue.to_string()).or_default();
        let delivery = target
            .unacked
            .remove(&tag)
            .ok_or_else(|| MessagingError::Broker(format!("unknown delivery tag {tag}")))?;
        match nack {
            None => target.acked += 1,
            Some(requeue) => {
                target.nacked += 1;
                if requeue {
                    self.dispatch(target, queue, delivery.body);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>> {
        let mut state = lock(&self.state);
        if state.refuse_connections {
            return Err(MessagingError::Broker("connection refused".to_string()));
        }
        state.next_channel += 1;
        state.connections += 1;
        let id = state.next_channel;
        let (closed_tx, closed) = watch::channel(None);
        state.open.insert(id, closed_tx);

        Ok(Arc::new(MemoryChannel {
            broker: self.clone(),
            id,
            closed,
        }))
    }
}

struct MemoryChannel {
    broker: InMemoryBroker,
    id: u64,
    closed: watch::Receiver<Option<String>>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = lock(&self.broker.state);
        state.ensure_open(self.id)?;
        let queue = state.queues.entry(spec.name.to_string()).or_default();
        match queue.spec {
            Some(existing) if existing != *spec => Err(MessagingError::Broker(format!(
                "queue {} redeclared with different arguments",
                spec.name
            ))),
            _ => {
                queue.spec = Some(*spec);
                Ok(())
            }
        }
    }

    async fn publish(
        &self,
        queue: &str,
        message: OutboundMessage,
    ) -> Result<oneshot::Receiver<Confirm>> {
        let mut state = lock(&self.broker.state);
        state.ensure_open(self.id)?;
        state.published.push(PublishedMessage {
            queue: queue.to_string(),
            body: message.body.clone(),
            priority: message.priority,
            persistent: message.persistent,
        });

        let (tx, rx) = oneshot::channel();
        let mode = state.confirm_mode;
        match mode {
            ConfirmMode::Ack => {
                let target = state.queues.entry(queue.to_string()).or_default();
                self.broker.dispatch(target, queue, message.body);
                let _ = tx.send(Confirm::Ack);
            }
            ConfirmMode::Nack => {
                let _ = tx.send(Confirm::Nack);
            }
            ConfirmMode::Silent => state.unconfirmed.push(tx),
        }
        Ok(rx)
    }

    async fn consume(&self, queue: &str) -> Result<InboundStream> {
        let mut state = lock(&self.broker.state);
        state.ensure_open(self.id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let target = state.queues.entry(queue.to_string()).or_default();
        target.consumers.push(Consumer { channel: self.id, tx });
        let waiting: Vec<Vec<u8>> = target.ready.drain(..).collect();
        for body in waiting {
            self.broker.dispatch(target, queue, body);
        }

        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
        .boxed())
    }

    fn closed(&self) -> watch::Receiver<Option<String>> {
        self.closed.clone()
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.broker.state);
        if let Some(closed) = state.open.remove(&self.id) {
            closed.send_replace(Some("closed by client".to_string()));
        }
        let id = self.id;
        let queues: Vec<String> = state.queues.keys().cloned().collect();
        for name in queues {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.consumers.retain(|c| c.channel != id);
                queue.requeue_unacked(|channel| channel == id);
                let waiting: Vec<Vec<u8>> = queue.ready.drain(..).collect();
                for body in waiting {
                    self.broker.dispatch(queue, &name, body);
                }
            }
        }
        Ok(())
    }
}

struct MemoryAcker {
    broker: InMemoryBroker,
    channel: u64,
    queue: String,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.broker.settle(self.channel, &self.queue, self.tag, None)
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.broker
            .settle(self.channel, &self.queue, self.tag, Some(requeue))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
