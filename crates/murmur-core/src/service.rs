//! Typing service: local `set_typing`, peer signals and the expiry sweep.

use futures_util::stream::{BoxStream, StreamExt};
use murmur_protocol::{ChannelId, Event, Signal, TypingSignal, UserId};
use murmur_transport::{Listener, PubSub, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::CoreError;
use crate::metrics;
use crate::scheduler::TimeoutScheduler;
use crate::stream::{debounce, distinct_until_changed, watch_stream};
use crate::typing::{typing_in, Typing, TypingStore};

/// Typing service configuration.
#[derive(Debug, Clone)]
pub struct TypingConfig {
    /// The user running this client.
    pub local_user: UserId,
    /// Entries older than this are swept away.
    pub timeout: Duration,
    /// An unchanged typing state is re-sent after this long.
    pub resend: Duration,
    /// Sweep period.
    pub sweep_interval: Duration,
    /// Observer debounce window.
    pub debounce: Duration,
    /// Upper bound on a single signal send.
    pub send_timeout: Duration,
}

impl TypingConfig {
    /// Default configuration for a local user.
    #[must_use]
    pub fn new(local_user: impl Into<UserId>) -> Self {
        Self {
            local_user: local_user.into(),
            timeout: Duration::from_secs(5),
            resend: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
            debounce: Duration::from_secs(1),
            send_timeout: Duration::from_secs(5),
        }
    }
}

struct Binding {
    channel: ChannelId,
    listener: JoinHandle<()>,
    scheduler: TimeoutScheduler,
}

/// Who is typing, and telling others when we are.
pub struct TypingService {
    transport: Arc<dyn PubSub>,
    config: TypingConfig,
    clock: Arc<dyn Clock>,
    store: Arc<TypingStore>,
    lifecycle: AsyncMutex<()>,
    running: AtomicBool,
    binding: Mutex<Option<Binding>>,
}

impl TypingService {
    /// Create an unbound service using the system clock.
    #[must_use]
    pub fn new(transport: Arc<dyn PubSub>, config: TypingConfig) -> Self {
        Self::with_clock(transport, config, Arc::new(SystemClock::new()))
    }

    /// Create an unbound service with a specific clock.
    #[must_use]
    pub fn with_clock(
        transport: Arc<dyn PubSub>,
        config: TypingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            config,
            clock,
            store: Arc::new(TypingStore::new()),
            lifecycle: AsyncMutex::new(()),
            running: AtomicBool::new(false),
            binding: Mutex::new(None),
        }
    }

    /// Listen for peer typing signals on a channel and start the sweep.
    ///
    /// Does nothing while already bound. `bind` and
    /// [`unbind`](Self::unbind) never overlap: each waits for the other.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the subscription.
    pub async fn bind(&self, channel_id: &str) -> Result<(), CoreError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.running.load(Ordering::SeqCst) {
            debug!(channel = %channel_id, "Typing already running");
            return Ok(());
        }

        let channels = [channel_id.to_string()];
        self.transport.subscribe(&channels, false).await?;
        self.running.store(true, Ordering::SeqCst);

        let listener = tokio::spawn(run_signals(
            self.transport.listen(),
            channel_id.to_string(),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.resend,
        ));

        let mut scheduler = TimeoutScheduler::new(self.config.sweep_interval);
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let timeout = self.config.timeout;
        scheduler.start(move || {
            expire_stale(&store, clock.as_ref(), timeout);
        });

        *self.binding.lock().unwrap_or_else(PoisonError::into_inner) = Some(Binding {
            channel: channel_id.to_string(),
            listener,
            scheduler,
        });

        info!(channel = %channel_id, "Typing bound");
        Ok(())
    }

    /// Stop listening and sweeping, and forget all typing state.
    ///
    /// Safe to call repeatedly.
    pub async fn unbind(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let binding = self
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut binding) = binding else {
            return;
        };

        binding.listener.abort();
        binding.scheduler.stop();
        self.store.clear();

        if let Err(e) = self
            .transport
            .unsubscribe(&[binding.channel.clone()], false)
            .await
        {
            warn!(channel = %binding.channel, error = %e, "Failed to unsubscribe typing channel");
        }
        info!(channel = %binding.channel, "Typing unbound");
    }

    /// Whether the service is bound.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Update a user's typing state and tell peers when it matters.
    ///
    /// `timestamp` defaults to now. Updates that change nothing observable
    /// (same state, recently sent) are dropped and return `false`. A failed
    /// send is logged; the local state keeps the update regardless.
    pub async fn set_typing(
        &self,
        user_id: &str,
        channel_id: &str,
        is_typing: bool,
        timestamp: Option<u64>,
    ) -> bool {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now_ms());
        let candidate = Typing::new(user_id, channel_id, is_typing, timestamp);

        if !self.store.update(candidate, self.config.resend) {
            trace!(user = %user_id, channel = %channel_id, is_typing, "Typing unchanged, not sent");
            return false;
        }

        let kind = TypingSignal::from_typing(is_typing);
        let signal = Signal::typing(channel_id, user_id, kind);
        let sent = tokio::time::timeout(self.config.send_timeout, self.transport.signal(signal))
            .await
            .unwrap_or(Err(TransportError::Timeout));
        match sent {
            Ok(()) => metrics::record_signal_sent(kind.as_payload()),
            Err(e) => {
                metrics::record_signal_failure();
                warn!(user = %user_id, channel = %channel_id, error = %e, "Typing signal failed");
            }
        }
        true
    }

    /// Users typing in a channel, debounced and emitted on change.
    ///
    /// With `filter_own` the local user is left out.
    pub fn get_typing(&self, channel_id: &str, filter_own: bool) -> BoxStream<'static, Vec<UserId>> {
        let channel_id = channel_id.to_string();
        let exclude = filter_own.then(|| self.config.local_user.clone());
        let users = watch_stream(self.store.subscribe())
            .map(move |map| typing_in(&map, &channel_id, exclude.as_deref()));
        distinct_until_changed(debounce(users, self.config.debounce))
    }

    /// Users typing in a channel right now, without debouncing.
    #[must_use]
    pub fn typing_now(&self, channel_id: &str, filter_own: bool) -> Vec<UserId> {
        let exclude = filter_own.then_some(self.config.local_user.as_str());
        typing_in(&self.store.snapshot(), channel_id, exclude)
    }

    /// Run one expiry pass now.
    pub fn sweep(&self) -> Vec<Typing> {
        expire_stale(&self.store, self.clock.as_ref(), self.config.timeout)
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &TypingStore {
        &self.store
    }
}

impl Drop for TypingService {
    fn drop(&mut self) {
        let binding = self.binding.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(binding) = binding.as_mut() {
            binding.listener.abort();
            binding.scheduler.stop();
        }
    }
}

fn expire_stale(store: &TypingStore, clock: &dyn Clock, timeout: Duration) -> Vec<Typing> {
    let expired = store.expire(clock.now_ms(), timeout);
    if !expired.is_empty() {
        metrics::record_typing_expired(expired.len());
        for entry in &expired {
            debug!(user = %entry.user_id, channel = %entry.channel_id, "Typing expired");
        }
    }
    expired
}

/// Apply peer typing signals for one channel. Never re-sends.
async fn run_signals(
    mut listener: Box<dyn Listener>,
    channel_id: ChannelId,
    store: Arc<TypingStore>,
    clock: Arc<dyn Clock>,
    resend: Duration,
) {
    loop {
        match listener.recv().await {
            Ok(Some(Event::Signal(signal))) if signal.channel == channel_id => {
                let Some(kind) = signal.typing_signal() else {
                    trace!(channel = %channel_id, "Ignoring non-typing signal");
                    continue;
                };
                let candidate =
                    Typing::new(signal.publisher, channel_id.clone(), kind.is_typing(), clock.now_ms());
                store.update(candidate, resend);
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(channel = %channel_id, "Transport closed, typing listener stopped");
                break;
            }
            Err(TransportError::Lagged(missed)) => {
                warn!(channel = %channel_id, missed, "Typing listener lagged");
            }
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Typing listener error");
            }
        }
    }
}
