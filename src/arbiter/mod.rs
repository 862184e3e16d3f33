//! Subscription arbiters: owners of a stage's upstream attachment.
//!
//! Both arbiters share one state shape, `Empty → Active → Cancelled`, with
//! `Cancelled` absorbing: once cancelled, every subscription handed in is
//! cancelled on arrival.
//!
//! - [`SingleArbiter`] accepts exactly one subscription and accumulates any
//!   demand signalled before it arrives.
//! - [`MultiArbiter`] lets the upstream be replaced at any time (retry,
//!   resubscribe, switch) and re-issues outstanding demand to the newcomer.

mod multi;
mod single;

pub use multi::MultiArbiter;
pub use single::SingleArbiter;
