//! The transport: confirmed publish, consumer dispatch and reconnect.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use metrics::counter;
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerChannel, Confirm, Connector, InboundStream, OutboundMessage};
use crate::error::{BoxError, MessagingError, Result};
use crate::queues::{TOPOLOGY, priority_for};

/// Runtime settings of the transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long a publish waits for the broker's confirmation.
    pub confirm_timeout: Duration,
    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

/// Handles the body of one consumed message.
///
/// `Ok` acknowledges the message, `Err` requeues it. Delivery is
/// at-least-once, so handlers must tolerate redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> std::result::Result<(), BoxError>;
}

/// Publishes raw message bodies.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_bytes(&self, queue: &str, body: Vec<u8>) -> Result<()>;
}

/// Typed publishing on top of [`Publisher`].
#[async_trait]
pub trait PublisherExt: Publisher {
    /// Encodes `message` as JSON and publishes it.
    async fn publish<T>(&self, queue: &str, message: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let body = serde_json::to_vec(message)?;
        self.publish_bytes(queue, body).await
    }
}

impl<P: Publisher + ?Sized> PublisherExt for P {}

struct Inner {
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    channel: RwLock<Option<Arc<dyn BrokerChannel>>>,
    ready: watch::Sender<bool>,
    consumers: Mutex<HashMap<String, Arc<dyn MessageHandler>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

/// Broker client shared by the saga, the worker and the consumers.
///
/// Cheap to clone. Call [`Transport::close`] to stop the background tasks.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("ready", &self.is_ready())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Connects, declares the topology and starts the reconnect watcher.
    #[tracing::instrument(skip(connector))]
    pub async fn connect(connector: Arc<dyn Connector>, config: TransportConfig) -> Result<Self> {
        let inner = Arc::new(Inner {
            connector,
            config,
            channel: RwLock::new(None),
            ready: watch::Sender::new(false),
            consumers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown: watch::Sender::new(false),
        });

        let closed = inner.establish().await?;
        let watcher = tokio::spawn(watch_connection(Arc::clone(&inner), closed));
        inner.track(watcher);

        info!("Messaging transport connected");
        Ok(Self { inner })
    }

    /// Returns true while a live channel is available.
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Publishes and waits for the confirmation, giving up when `cancel` resolves.
    ///
    /// A cancelled publish has an unknown outcome: the broker may still
    /// accept the message.
    #[tracing::instrument(skip(self, body, cancel), fields(bytes = body.len()))]
    pub async fn publish_with_cancel<F>(&self, queue: &str, body: Vec<u8>, cancel: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let outcome = self.inner.publish(queue, body, cancel).await;
        match &outcome {
            Ok(()) => {
                counter!("messages_published_total", "queue" => queue.to_string()).increment(1);
                debug!("Message published");
            }
            Err(MessagingError::Cancelled) => {
                info!("Publish cancelled before confirmation, outcome unknown");
            }
            Err(err) => {
                counter!("messages_publish_failed_total", "queue" => queue.to_string())
                    .increment(1);
                warn!(error = %err, "Publish failed");
            }
        }
        outcome
    }

    /// Registers `handler` for `queue` and starts consuming.
    ///
    /// The handler is remembered and re-registered after every reconnect,
    /// even when starting it now fails. A queue takes one handler; a second
    /// registration is rejected.
    #[tracing::instrument(skip(self, handler))]
    pub async fn consume(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        {
            let mut consumers = lock(&self.inner.consumers);
            if consumers.contains_key(queue) {
                return Err(MessagingError::ConsumerRegister {
                    queue: queue.to_string(),
                    reason: "queue already has a handler".to_string(),
                });
            }
            consumers.insert(queue.to_string(), Arc::clone(&handler));
        }

        let channel = self.inner.ready_channel().await?;
        self.inner.start_consumer(&channel, queue, handler).await?;

        info!("Consumer registered for queue");
        Ok(())
    }

    /// Stops the reconnect watcher and every consumer, then closes the channel.
    pub async fn close(&self) -> Result<()> {
        self.inner.shutdown.send_replace(true);
        self.inner.ready.send_replace(false);
        let channel = self.inner.channel.write().await.take();

        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        for task in tasks {
            if let Err(err) = task.await
                && err.is_panic()
            {
                error!(error = %err, "Transport task panicked");
            }
        }

        if let Some(channel) = channel {
            channel.close().await?;
        }
        info!("Messaging transport closed");
        Ok(())
    }
}

#[async_trait]
impl Publisher for Transport {
    async fn publish_bytes(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        self.publish_with_cancel(queue, body, std::future::pending::<()>())
            .await
    }
}

impl Inner {
    /// Opens a channel, declares the topology and replays registered consumers.
    async fn establish(self: &Arc<Self>) -> Result<watch::Receiver<Option<String>>> {
        let channel = self.connector.connect().await?;

        for spec in &TOPOLOGY {
            if let Err(err) = channel.declare_queue(spec).await {
                let _ = channel.close().await;
                return Err(err);
            }
            debug!(queue = spec.name, "Queue declared");
        }

        let closed = channel.closed();

        let handlers: Vec<(String, Arc<dyn MessageHandler>)> = lock(&self.consumers)
            .iter()
            .map(|(queue, handler)| (queue.clone(), Arc::clone(handler)))
            .collect();
        for (queue, handler) in handlers {
            if let Err(err) = self.start_consumer(&channel, &queue, handler).await {
                error!(%queue, error = %err, "Failed to restart consumer after reconnect");
            }
        }

        if *self.shutdown.borrow() {
            let _ = channel.close().await;
            return Err(MessagingError::ClientNotReady);
        }

        *self.channel.write().await = Some(channel);
        self.ready.send_replace(true);
        Ok(closed)
    }

    async fn ready_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        if !*self.ready.borrow() {
            return Err(MessagingError::ClientNotReady);
        }
        self.channel
            .read()
            .await
            .clone()
            .ok_or(MessagingError::ClientNotReady)
    }

    async fn publish<F>(&self, queue: &str, body: Vec<u8>, cancel: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let channel = self.ready_channel().await?;
        let message = OutboundMessage {
            body,
            priority: priority_for(queue),
            persistent: true,
        };
        let confirmation = channel.publish(queue, message).await?;

        tokio::select! {
            _ = cancel => Err(MessagingError::Cancelled),
            verdict = tokio::time::timeout(self.config.confirm_timeout, confirmation) => {
                match verdict {
                    Err(_) => Err(MessagingError::PublishTimeout),
                    // The channel died before confirming.
                    Ok(Err(_)) => Err(MessagingError::ClientNotReady),
                    Ok(Ok(Confirm::Ack)) => Ok(()),
                    Ok(Ok(Confirm::Nack)) => Err(MessagingError::MessageNacked),
                }
            }
        }
    }

    async fn start_consumer(
        self: &Arc<Self>,
        channel: &Arc<dyn BrokerChannel>,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let stream =
            channel
                .consume(queue)
                .await
                .map_err(|err| MessagingError::ConsumerRegister {
                    queue: queue.to_string(),
                    reason: err.to_string(),
                })?;

        let task = tokio::spawn(run_consumer(
            Arc::clone(self),
            queue.to_string(),
            handler,
            stream,
        ));
        self.track(task);
        Ok(())
    }

    async fn mark_not_ready(&self) {
        self.ready.send_replace(false);
        self.channel.write().await.take();
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}

async fn run_consumer(
    inner: Arc<Inner>,
    queue: String,
    handler: Arc<dyn MessageHandler>,
    mut stream: InboundStream,
) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut ready = inner.ready.subscribe();

    loop {
        let message = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            next = stream.next() => match next {
                Some(message) => message,
                None => {
                    warn!(%queue, "Consumer channel closed");
                    break;
                }
            },
        };
        counter!("messages_consumed_total", "queue" => queue.clone()).increment(1);

        let outcome = handler.handle(&message.body).await;

        // Nothing is settled while the transport is reconnecting.
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            res = ready.wait_for(|ready| *ready) => {
                if res.is_err() {
                    break;
                }
            }
        }

        let settled = match outcome {
            Ok(()) => message.ack().await,
            Err(err) => {
                error!(%queue, error = %err, "Error handling message, requeueing");
                message.nack(true).await
            }
        };
        if let Err(err) = settled {
            warn!(%queue, error = %err, "Failed to settle message");
        }
    }
    debug!(%queue, "Consumer stopped");
}

async fn watch_connection(inner: Arc<Inner>, mut closed: watch::Receiver<Option<String>>) {
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        let reason = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => return,
            res = closed.wait_for(|reason| reason.is_some()) => match res {
                Ok(reason) => (*reason).clone().unwrap_or_default(),
                Err(_) => "channel dropped".to_string(),
            },
        };

        inner.mark_not_ready().await;
        warn!(%reason, "Broker connection closed, attempting to reconnect");

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return,
                _ = tokio::time::sleep(inner.config.reconnect_interval) => {}
            }

            info!("Attempting to reconnect to broker");
            match inner.establish().await {
                Ok(next) => {
                    closed = next;
                    counter!("broker_reconnects_total").increment(1);
                    info!("Reconnected to broker");
                    break;
                }
                Err(err) => error!(error = %err, "Failed to reconnect"),
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
