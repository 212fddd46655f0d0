//! In-process loopback relay.
//!
//! `LoopbackTransport` plays the hosted service: it keeps per-channel
//! occupants, answers "here now" queries, and fans encoded frames out to
//! every registered listener. Signals are echoed back to all listeners,
//! including the sender, as the hosted service does.
//!
//! It doubles as the collaborator for tests: snapshot queries can be held
//! back or failed, and signal sends can be failed on demand.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use murmur_protocol::{
    codec, ChannelId, ChannelOccupants, Event, HereNow, PresenceEvent, Signal, UserId,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::traits::{Listener, PubSub, TransportError};

/// Default frame fan-out capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Relay-side state of one channel.
#[derive(Debug, Default)]
struct ChannelState {
    occupants: Vec<UserId>,
    subscriptions: usize,
    presence_subscriptions: usize,
}

impl ChannelState {
    fn delivers(&self, event: &Event) -> bool {
        match event {
            Event::Presence(_) => self.presence_subscriptions > 0,
            _ => self.subscriptions > 0,
        }
    }
}

struct Inner {
    channels: DashMap<ChannelId, ChannelState>,
    frames: broadcast::Sender<Bytes>,
    here_now_gate: watch::Sender<bool>,
    fail_here_now: AtomicBool,
    fail_signals: AtomicBool,
    subscribe_delay_ms: AtomicU64,
    sent: Mutex<Vec<Signal>>,
}

/// An in-process pub/sub relay.
#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<Inner>,
}

impl LoopbackTransport {
    /// Create a new loopback relay.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a relay with a specific fan-out capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity);
        let (here_now_gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                channels: DashMap::new(),
                frames,
                here_now_gate,
                fail_here_now: AtomicBool::new(false),
                fail_signals: AtomicBool::new(false),
                subscribe_delay_ms: AtomicU64::new(0),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Publish an event to listeners of its channel.
    ///
    /// Returns the number of listeners that received it. Events for
    /// channels nobody subscribed to are dropped.
    pub fn inject(&self, event: Event) -> usize {
        let delivered = self
            .inner
            .channels
            .get(event.channel())
            .map(|state| state.delivers(&event))
            .unwrap_or(false);

        if !delivered {
            trace!(channel = %event.channel(), kind = event.kind(), "No subscribers, dropping event");
            return 0;
        }

        match codec::encode(&event) {
            Ok(frame) => self.inject_frame(frame),
            Err(e) => {
                warn!(channel = %event.channel(), error = %e, "Failed to encode event");
                0
            }
        }
    }

    /// Publish a raw frame to every listener, bypassing subscriptions.
    pub fn inject_frame(&self, frame: Bytes) -> usize {
        self.inner.frames.send(frame).unwrap_or_default()
    }

    /// A user joins a channel.
    pub fn join(&self, channel: &str, user: &str) -> usize {
        let occupancy = {
            let mut state = self.inner.channels.entry(channel.to_string()).or_default();
            if !state.occupants.iter().any(|u| u == user) {
                state.occupants.push(user.to_string());
            }
            state.occupants.len()
        };
        debug!(channel = %channel, user = %user, occupancy, "Relay: join");
        self.inject(PresenceEvent::join(channel, user, occupancy).into())
    }

    /// A user leaves a channel.
    pub fn leave(&self, channel: &str, user: &str) -> usize {
        let occupancy = self.remove_occupant(channel, user);
        debug!(channel = %channel, user = %user, occupancy, "Relay: leave");
        self.inject(PresenceEvent::leave(channel, user, occupancy).into())
    }

    /// A user times out of a channel.
    pub fn timeout(&self, channel: &str, user: &str) -> usize {
        let occupancy = self.remove_occupant(channel, user);
        debug!(channel = %channel, user = %user, occupancy, "Relay: timeout");
        self.inject(PresenceEvent::timeout(channel, user, occupancy).into())
    }

    /// Announce batched changes for a channel.
    pub fn interval(
        &self,
        channel: &str,
        join: Vec<UserId>,
        leave: Vec<UserId>,
        timeout: Vec<UserId>,
    ) -> usize {
        let occupancy = {
            let mut state = self.inner.channels.entry(channel.to_string()).or_default();
            state
                .occupants
                .retain(|u| !leave.contains(u) && !timeout.contains(u));
            for user in &join {
                if !state.occupants.contains(user) {
                    state.occupants.push(user.clone());
                }
            }
            state.occupants.len()
        };
        self.inject(PresenceEvent::interval(channel, join, leave, timeout, occupancy).into())
    }

    fn remove_occupant(&self, channel: &str, user: &str) -> usize {
        self.inner
            .channels
            .get_mut(channel)
            .map(|mut state| {
                state.occupants.retain(|u| u != user);
                state.occupants.len()
            })
            .unwrap_or(0)
    }

    /// Current relay-side occupants of a channel.
    #[must_use]
    pub fn occupants(&self, channel: &str) -> Vec<UserId> {
        self.inner
            .channels
            .get(channel)
            .map(|s| s.occupants.clone())
            .unwrap_or_default()
    }

    /// Check whether anyone is subscribed to a channel.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.inner
            .channels
            .get(channel)
            .map(|s| s.subscriptions > 0)
            .unwrap_or(false)
    }

    /// Hold "here now" queries until [`release_here_now`](Self::release_here_now).
    pub fn hold_here_now(&self) {
        self.inner.here_now_gate.send_replace(false);
    }

    /// Let held "here now" queries complete.
    pub fn release_here_now(&self) {
        self.inner.here_now_gate.send_replace(true);
    }

    /// Make "here now" queries fail.
    pub fn set_here_now_failure(&self, fail: bool) {
        self.inner.fail_here_now.store(fail, Ordering::SeqCst);
    }

    /// Make signal sends fail.
    pub fn set_signal_failure(&self, fail: bool) {
        self.inner.fail_signals.store(fail, Ordering::SeqCst);
    }

    /// Delay every subscription by `delay`.
    pub fn set_subscribe_delay(&self, delay: Duration) {
        self.inner
            .subscribe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Check whether anyone receives presence deltas for a channel.
    #[must_use]
    pub fn is_presence_subscribed(&self, channel: &str) -> bool {
        self.inner
            .channels
            .get(channel)
            .map(|s| s.presence_subscriptions > 0)
            .unwrap_or(false)
    }

    /// Signals accepted so far.
    #[must_use]
    pub fn sent_signals(&self) -> Vec<Signal> {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for LoopbackTransport {
    async fn subscribe(
        &self,
        channels: &[ChannelId],
        with_presence: bool,
    ) -> Result<(), TransportError> {
        let delay = self.inner.subscribe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        for channel in channels {
            let mut state = self.inner.channels.entry(channel.clone()).or_default();
            state.subscriptions += 1;
            if with_presence {
                state.presence_subscriptions += 1;
            }
            debug!(channel = %channel, with_presence, "Relay: subscribed");
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        channels: &[ChannelId],
        with_presence: bool,
    ) -> Result<(), TransportError> {
        for channel in channels {
            if let Some(mut state) = self.inner.channels.get_mut(channel) {
                state.subscriptions = state.subscriptions.saturating_sub(1);
                if with_presence {
                    state.presence_subscriptions = state.presence_subscriptions.saturating_sub(1);
                }
                debug!(
                    channel = %channel,
                    remaining = state.subscriptions,
                    presence = state.presence_subscriptions,
                    "Relay: unsubscribed"
                );
            }
        }
        Ok(())
    }

    fn listen(&self) -> Box<dyn Listener> {
        Box::new(LoopbackListener {
            frames: self.inner.frames.subscribe(),
        })
    }

    async fn here_now(
        &self,
        channels: &[ChannelId],
        include_uuids: bool,
    ) -> Result<HereNow, TransportError> {
        let mut gate = self.inner.here_now_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| TransportError::Closed)?;

        if self.inner.fail_here_now.load(Ordering::SeqCst) {
            return Err(TransportError::QueryFailed("loopback failure injected".into()));
        }

        let mut snapshot = HereNow::new();
        for channel in channels {
            let occupants = self.occupants(channel);
            snapshot.channels.insert(
                channel.clone(),
                ChannelOccupants {
                    occupancy: occupants.len(),
                    occupants: include_uuids.then_some(occupants),
                },
            );
        }
        Ok(snapshot)
    }

    async fn signal(&self, signal: Signal) -> Result<(), TransportError> {
        if self.inner.fail_signals.load(Ordering::SeqCst) {
            return Err(TransportError::SignalFailed(
                "loopback failure injected".into(),
            ));
        }

        let timetoken = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let signal = signal.with_timetoken(timetoken);

        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal.clone());

        trace!(channel = %signal.channel, payload = %signal.payload, "Relay: signal");
        self.inject(Event::Signal(signal));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Listener over the relay's frame fan-out.
struct LoopbackListener {
    frames: broadcast::Receiver<Bytes>,
}

#[async_trait]
impl Listener for LoopbackListener {
    async fn recv(&mut self) -> Result<Option<Event>, TransportError> {
        match self.frames.recv().await {
            Ok(frame) => Ok(Some(codec::decode(&frame)?)),
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Err(TransportError::Lagged(missed))
            }
        }
    }
}
