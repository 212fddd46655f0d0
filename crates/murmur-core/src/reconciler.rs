//! Occupancy reconciliation.
//!
//! The reconciler merges one snapshot with a continuous stream of presence
//! deltas. All writes go through `watch::Sender::send_if_modified`, so each
//! read-compute-publish step is atomic with respect to the others, and every
//! observer gets the latest map as soon as it subscribes.

use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use murmur_protocol::{ChannelId, Event, PresenceEvent, UserId};
use murmur_transport::{Listener, PubSub, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{CoreError, ReconcileError};
use crate::metrics;
use crate::occupancy::{apply_event, Occupancy, OccupancyMap};
use crate::online::{fold_presence, online_view, OnlineMap, PresenceAggregate};
use crate::stream::{distinct_until_changed, watch_stream};

type SharedMap = Arc<watch::Sender<Option<Arc<OccupancyMap>>>>;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Channels to subscribe to and snapshot.
    pub channels: Vec<ChannelId>,
    /// The user running this client. Always reported online.
    pub local_user: UserId,
    /// Whether subscriptions request presence deltas.
    pub with_presence: bool,
}

impl PresenceConfig {
    /// Create a configuration for a local user and a set of channels.
    #[must_use]
    pub fn new(local_user: impl Into<UserId>, channels: Vec<ChannelId>) -> Self {
        Self {
            channels,
            local_user: local_user.into(),
            with_presence: true,
        }
    }
}

/// Keeps a per-channel occupancy map in sync with the transport.
pub struct OccupancyReconciler {
    transport: Arc<dyn PubSub>,
    config: PresenceConfig,
    state: SharedMap,
    lifecycle: AsyncMutex<()>,
    bound: AtomicBool,
    listening: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    folds: Mutex<Vec<JoinHandle<()>>>,
}

impl OccupancyReconciler {
    /// Create an unbound reconciler.
    #[must_use]
    pub fn new(transport: Arc<dyn PubSub>, config: PresenceConfig) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            transport,
            config,
            state: Arc::new(state),
            lifecycle: AsyncMutex::new(()),
            bound: AtomicBool::new(false),
            listening: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            folds: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to presence deltas and fetch one snapshot.
    ///
    /// Returns once the subscription is in place; the snapshot resolves in
    /// the background. A failed snapshot is logged and otherwise ignored.
    /// Binding an already bound reconciler does nothing. `bind` and
    /// [`unbind`](Self::unbind) never overlap: each waits for the other.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the subscription.
    pub async fn bind(&self) -> Result<(), CoreError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.bound.load(Ordering::SeqCst) {
            debug!("Presence already bound");
            return Ok(());
        }

        self.transport
            .subscribe(&self.config.channels, self.config.with_presence)
            .await?;
        self.bound.store(true, Ordering::SeqCst);

        // Register before the snapshot so no delta falls in between.
        let listener = self.transport.listen();
        self.listening.store(true, Ordering::SeqCst);

        let deltas = tokio::spawn(run_deltas(
            listener,
            Arc::clone(&self.state),
            Arc::clone(&self.listening),
        ));
        let snapshot = tokio::spawn(fetch_snapshot(
            Arc::clone(&self.transport),
            self.config.channels.clone(),
            Arc::clone(&self.state),
        ));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([deltas, snapshot]);

        info!(
            channels = self.config.channels.len(),
            transport = self.transport.name(),
            "Presence bound"
        );
        Ok(())
    }

    /// Stop listening, drop the occupancy map and unsubscribe.
    ///
    /// Safe to call repeatedly.
    pub async fn unbind(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.bound.swap(false, Ordering::SeqCst) {
            return;
        }

        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        self.listening.store(false, Ordering::SeqCst);
        self.state.send_replace(None);

        if let Err(e) = self
            .transport
            .unsubscribe(&self.config.channels, self.config.with_presence)
            .await
        {
            warn!(error = %e, "Failed to unsubscribe presence channels");
        }
        info!("Presence unbound");
    }

    /// Whether the delta task is running.
    ///
    /// Turns `false` after [`unbind`](Self::unbind) or once a malformed
    /// event stopped the task.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// The most recent occupancy map, if one was published.
    #[must_use]
    pub fn current(&self) -> Option<Arc<OccupancyMap>> {
        self.state.borrow().clone()
    }

    /// The local user.
    #[must_use]
    pub fn local_user(&self) -> &str {
        &self.config.local_user
    }

    /// Every published occupancy map, latest first.
    pub fn occupancy_maps(&self) -> BoxStream<'static, Arc<OccupancyMap>> {
        watch_stream(self.state.subscribe())
            .filter_map(future::ready)
            .boxed()
    }

    /// Occupancy of one channel, emitted on change.
    pub fn get_occupancy(&self, channel_id: &str) -> BoxStream<'static, Occupancy> {
        let channel_id = channel_id.to_string();
        distinct_until_changed(
            self.occupancy_maps()
                .map(move |map| map.get_or_empty(&channel_id)),
        )
    }

    /// Online status of every listed user, plus the local user.
    pub fn online(&self) -> BoxStream<'static, OnlineMap> {
        let local_user = self.config.local_user.clone();
        self.occupancy_maps()
            .map(move |map| online_view(&map, &local_user))
            .boxed()
    }

    /// Whether a user is online, emitted on change.
    pub fn is_online(&self, user_id: &str) -> BoxStream<'static, bool> {
        let user_id = user_id.to_string();
        let is_local = user_id == self.config.local_user;
        distinct_until_changed(
            self.occupancy_maps()
                .map(move |map| is_local || map.iter().any(|o| o.contains(&user_id))),
        )
    }

    /// Keep an externally owned aggregate in sync with the online view.
    ///
    /// Every published map is folded into `aggregate` with
    /// [`fold_presence`]. The fold runs until the reconciler is dropped.
    pub fn get_presence(&self, aggregate: PresenceAggregate) -> PresenceAggregate {
        let mut online = self.online();
        let target = Arc::clone(&aggregate);
        let local_user = self.config.local_user.clone();

        let fold = tokio::spawn(async move {
            while let Some(view) = online.next().await {
                fold_presence(&target, &view, &local_user);
            }
        });
        self.folds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fold);

        aggregate
    }
}

impl Drop for OccupancyReconciler {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        let folds = self.folds.get_mut().unwrap_or_else(PoisonError::into_inner);
        for fold in folds.drain(..) {
            fold.abort();
        }
    }
}

/// Publish the snapshot as the current map, replacing whatever is there.
async fn fetch_snapshot(transport: Arc<dyn PubSub>, channels: Vec<ChannelId>, state: SharedMap) {
    match transport.here_now(&channels, true).await {
        Ok(snapshot) => {
            let map = OccupancyMap::from_here_now(&snapshot);
            debug!(
                channels = map.len(),
                occupancy = snapshot.total_occupancy(),
                "Presence snapshot applied"
            );
            state.send_replace(Some(Arc::new(map)));
        }
        Err(e) => {
            metrics::record_snapshot_failure();
            warn!(error = %e, "Presence snapshot failed, continuing with deltas only");
        }
    }
}

/// Fold presence deltas until the transport closes or an event is malformed.
async fn run_deltas(mut listener: Box<dyn Listener>, state: SharedMap, listening: Arc<AtomicBool>) {
    loop {
        match listener.recv().await {
            Ok(Some(Event::Presence(event))) => {
                if let Err(e) = apply_to(&state, &event) {
                    error!(error = %e, "Malformed presence event, presence updates stopped");
                    break;
                }
                metrics::record_presence_event(event.action.as_str());
            }
            Ok(Some(other)) => {
                trace!(kind = other.kind(), "Ignoring non-presence event");
            }
            Ok(None) => {
                debug!("Transport closed, presence updates stopped");
                break;
            }
            Err(TransportError::Lagged(missed)) => {
                warn!(missed, "Presence listener lagged, occupancy may be stale");
            }
            Err(e) => {
                warn!(error = %e, "Presence listener error");
            }
        }
    }
    listening.store(false, Ordering::SeqCst);
}

fn apply_to(state: &SharedMap, event: &PresenceEvent) -> Result<(), ReconcileError> {
    let mut outcome = Ok(());
    state.send_if_modified(|current| {
        let empty = OccupancyMap::new();
        let base = current.as_deref().unwrap_or(&empty);
        match apply_event(base, event) {
            Ok(next) => {
                *current = Some(Arc::new(next));
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        }
    });
    outcome
}
