//! Long-lived change-feed subscriptions.
//!
//! A [`FeedSubscriber`] opens one subscription per entity kind and pushes the
//! envelopes it receives into a [`MirrorStore`]. The store is seeded by the
//! caller from a snapshot fetched out of band; the subscription only applies
//! what it observes after it starts.
//!
//! # Reconnects
//!
//! Transport errors and closed streams are logged and followed by a reconnect
//! with jittered exponential backoff. There is no retry limit. The failure
//! count resets only once a connection delivers an envelope or stays up for
//! `stable_after_ms`. Events missed while disconnected are not recovered
//! here: callers that need them refetch a snapshot and call
//! [`FeedHandle::replace_snapshot`].
//!
//! # Closing
//!
//! [`FeedHandle::close`] cancels the delivery task and waits for it. Delivery
//! checks for cancellation while holding the store lock, so no envelope lands
//! in the store once `close` has started. Dropping the handle cancels too.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;
use crate::error::Result;
use crate::feed::backoff::reconnect_delay;
use crate::feed::envelope::{ChangeEnvelope, EntityKind, Record};
use crate::feed::filter::FeedFilter;
use crate::feed::store::MirrorStore;

/// Envelopes delivered by one connection. An `Err` item or the end of the
/// stream ends the connection.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<ChangeEnvelope>> + Send>>;

/// Store shared between a feed handle and its UI consumer.
pub type SharedStore = Arc<RwLock<MirrorStore>>;

/// Connection to the remote change feed.
pub trait FeedTransport: Send + Sync + 'static {
    /// Start a subscription. Called again after every disconnect.
    fn connect(
        &self,
        kind: EntityKind,
        filter: Option<FeedFilter>,
    ) -> impl Future<Output = Result<EnvelopeStream>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Still retrying, but past the configured bound; shown as "connection lost".
    Lost { attempts: u32 },
    Closed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting { attempt } => write!(f, "reconnecting ({})", attempt),
            ConnectionStatus::Lost { attempts } => write!(f, "lost ({} attempts)", attempts),
            ConnectionStatus::Closed => write!(f, "closed"),
        }
    }
}

pub struct FeedSubscriber<T> {
    transport: Arc<T>,
    config: FeedConfig,
    shutdown: CancellationToken,
}

impl<T: FeedTransport> FeedSubscriber<T> {
    pub fn new(transport: T, config: FeedConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tie every handle opened from here to `token`, typically the process
    /// shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Open a subscription that feeds `store`.
    pub fn open(
        &self,
        kind: EntityKind,
        filter: Option<FeedFilter>,
        store: SharedStore,
    ) -> FeedHandle {
        let cancel = self.shutdown.child_token();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let task = tokio::spawn(run_feed(FeedTask {
            transport: self.transport.clone(),
            kind,
            filter: filter.clone(),
            store: store.clone(),
            config: self.config.clone(),
            cancel: cancel.clone(),
            status_tx,
        }));

        let filter_query = filter.as_ref().map(FeedFilter::to_query).unwrap_or_default();
        tracing::info!(entity = %kind, filter = %filter_query, "Feed subscription opened");

        FeedHandle {
            kind,
            store,
            cancel,
            task: Some(task),
            status_rx,
        }
    }

    /// Open a subscription over a fresh store seeded with `initial`.
    pub fn open_with_snapshot(
        &self,
        kind: EntityKind,
        filter: Option<FeedFilter>,
        initial: Vec<Record>,
    ) -> FeedHandle {
        let store = Arc::new(RwLock::new(MirrorStore::with_snapshot(kind, initial)));
        self.open(kind, filter, store)
    }
}

/// Owned, closable subscription.
pub struct FeedHandle {
    kind: EntityKind,
    store: SharedStore,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl FeedHandle {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub async fn snapshot(&self) -> Vec<Record> {
        self.store.read().await.snapshot()
    }

    /// Swap in a freshly fetched snapshot, e.g. to cover a reconnect gap.
    pub async fn replace_snapshot(&self, records: Vec<Record>) -> usize {
        self.store.write().await.replace_snapshot(records)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    /// Stop delivery and wait for the background task to finish.
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::warn!(entity = %self.kind, error = %e, "Feed task ended abnormally");
            }
        }
        tracing::info!(entity = %self.kind, "Feed subscription closed");
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct FeedTask<T> {
    transport: Arc<T>,
    kind: EntityKind,
    filter: Option<FeedFilter>,
    store: SharedStore,
    config: FeedConfig,
    cancel: CancellationToken,
    status_tx: watch::Sender<ConnectionStatus>,
}

async fn run_feed<T: FeedTransport>(task: FeedTask<T>) {
    let mut attempt: u32 = 0;

    'feed: loop {
        let connected = tokio::select! {
            _ = task.cancel.cancelled() => break 'feed,
            result = task.transport.connect(task.kind, task.filter.clone()) => result,
        };

        match connected {
            Ok(mut stream) => {
                task.status_tx.send_replace(ConnectionStatus::Connected);
                tracing::info!(entity = %task.kind, attempt, "Feed connected");

                // Failures keep counting until this connection delivers or stays up.
                let stable = tokio::time::sleep(task.config.stable_after());
                tokio::pin!(stable);

                loop {
                    let item = tokio::select! {
                        _ = task.cancel.cancelled() => break 'feed,
                        _ = &mut stable, if attempt > 0 => {
                            attempt = 0;
                            continue;
                        }
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(envelope)) => {
                            attempt = 0;
                            task.deliver(envelope).await;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(entity = %task.kind, error = %e, "Feed transport error");
                            break;
                        }
                        None => {
                            tracing::warn!(entity = %task.kind, "Feed stream ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(entity = %task.kind, attempt, error = %e, "Feed connect failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let status = if attempt >= task.config.lost_after_attempts {
            ConnectionStatus::Lost { attempts: attempt }
        } else {
            ConnectionStatus::Reconnecting { attempt }
        };
        task.status_tx.send_replace(status);

        let delay = reconnect_delay(attempt, &task.config);
        tracing::debug!(entity = %task.kind, attempt, delay_ms = delay.as_millis(), "Reconnecting feed");
        tokio::select! {
            _ = task.cancel.cancelled() => break 'feed,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    task.status_tx.send_replace(ConnectionStatus::Closed);
}

impl<T> FeedTask<T> {
    async fn deliver(&self, envelope: ChangeEnvelope) {
        if envelope.entity_kind != self.kind {
            tracing::debug!(
                entity = %self.kind,
                delivered = %envelope.entity_kind,
                "Dropping envelope for another entity kind"
            );
            return;
        }
        if let Some(filter) = &self.filter {
            if !filter.matches(&envelope) {
                tracing::debug!(
                    entity = %self.kind,
                    record_id = %envelope.record_id,
                    filter = %filter,
                    "Dropping envelope outside filter"
                );
                return;
            }
        }

        let mut store = self.store.write().await;
        // close() may have started while we waited for the lock
        if self.cancel.is_cancelled() {
            return;
        }
        store.apply(envelope);
    }
}
