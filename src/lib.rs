//! # Lock-free substrate for push-based reactive streams
//!
//! This crate provides the concurrency building blocks that demand-regulated
//! stream stages are made of: resource lifecycle slots, saturating demand
//! accounting, a non-blocking drain guard, SPSC/MPSC queues and subscription
//! arbiters.
//!
//! ## Core Concepts
//!
//! - **Stage contract**: `on_subscribe`, then items, then at most one terminal
//!   signal (see [`traits`])
//! - **Demand**: downstream asks for `n` items; upstream never delivers more
//!   (see [`demand`])
//! - **Drain loop**: one thread at a time hands buffered items downstream;
//!   everyone else leaves a signal behind (see [`drain`])
//! - **Hooks**: where failures with no live subscriber end up (see [`hooks`])
//!
//! ## Example
//!
//! ```rust
//! use fluxweld::prelude::*;
//!
//! let queue = SpscQueue::with_capacity(8);
//! let wip = WorkCoordinator::new();
//! let demand = DemandCounter::new();
//!
//! for i in 0..10 {
//!     queue.offer(i);
//! }
//! demand.request(4);
//!
//! let mut delivered = Vec::new();
//! wip.drain(|| {
//!     while demand.get() > 0 {
//!         match queue.poll() {
//!             Some(item) => {
//!                 delivered.push(item);
//!                 demand.produced(1, &Hooks::panicking());
//!             }
//!             None => break,
//!         }
//!     }
//! });
//!
//! assert_eq!(delivered, vec![0, 1, 2, 3]);
//! assert_eq!(queue.len(), 6);
//! ```

pub mod arbiter;
pub mod config;
pub mod cow;
pub mod demand;
pub mod disposable;
pub mod drain;
pub mod error;
pub mod error_slot;
pub mod hooks;
pub mod queue;
pub mod scheduler;
pub mod serialize;
pub mod stage;
pub mod traits;

mod metrics;

// Re-export commonly used items
pub mod prelude {
    pub use crate::arbiter::{MultiArbiter, SingleArbiter};
    pub use crate::config::Config;
    pub use crate::demand::{add_cap, DemandCounter, UNBOUNDED};
    pub use crate::disposable::{Disposables, ResourceSet, ResourceSlot, VersionedSlot};
    pub use crate::drain::WorkCoordinator;
    pub use crate::error::{Error, ProtocolViolation, Result};
    pub use crate::error_slot::ErrorSlot;
    pub use crate::hooks::Hooks;
    pub use crate::queue::{IslandQueue, MpscQueue, SimpleQueue, SlottedIslandQueue, SpscQueue};
    pub use crate::scheduler::{Scheduler, TokioScheduler};
    pub use crate::stage::{BufferedRelay, Deadline, PublisherExt};
    pub use crate::traits::{
        CompletableObserver, CompletableSource, Disposable, Publisher, SingleObserver,
        SingleSource, Subscriber, Subscription,
    };
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
