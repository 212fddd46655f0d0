//! # murmur-core
//!
//! Ephemeral presence and typing awareness for realtime chat.
//!
//! This crate turns the raw feed of a pub/sub transport into two views a UI
//! can observe without ever blocking on the network:
//!
//! - **Occupancy** - a point-in-time snapshot reconciled with incremental
//!   join/leave/timeout/interval deltas into "who is in each channel"
//! - **Online** - that occupancy flattened into "who is online"
//! - **Typing** - a debounced, timeout-pruned "who is typing" per channel
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ OccupancyReconciler  │────▶│ Online view │
//! └─────────────┘     └──────────────────────┘     └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐     ┌──────────────────────┐
//! │ TypingStore │◀────│    TypingService     │◀──── TimeoutScheduler
//! └─────────────┘     └──────────────────────┘
//! ```
//!
//! Every shared "latest value" sits behind a `tokio::sync::watch` channel:
//! writers read-modify-publish under the channel's lock, readers get the
//! most recent value the moment they subscribe.

pub mod clock;
pub mod error;
pub mod metrics;
pub mod occupancy;
pub mod online;
pub mod reconciler;
pub mod scheduler;
pub mod service;
pub mod stream;
pub mod typing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, ReconcileError};
pub use murmur_protocol::{ChannelId, UserId};
pub use occupancy::{apply_event, Occupancy, OccupancyMap};
pub use online::{fold_presence, online_view, OnlineMap, PresenceAggregate};
pub use reconciler::{OccupancyReconciler, PresenceConfig};
pub use scheduler::TimeoutScheduler;
pub use service::{TypingConfig, TypingService};
pub use typing::{Typing, TypingMap, TypingStore};
