//! Counters for substrate events.
//!
//! With the `metrics` feature enabled these forward to the [`metrics`] crate
//! facade; otherwise they compile to nothing.

#[cfg(feature = "metrics")]
mod imp {
    use ::metrics::counter;

    pub fn record_queue_growth(queue: &'static str) {
        counter!("fluxweld_queue_growths_total", "queue" => queue).increment(1);
    }

    pub fn record_violation(kind: &'static str) {
        counter!("fluxweld_protocol_violations_total", "kind" => kind).increment(1);
    }

    pub fn record_undeliverable() {
        counter!("fluxweld_undeliverable_errors_total").increment(1);
    }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    #[inline(always)]
    pub fn record_queue_growth(_queue: &'static str) {}

    #[inline(always)]
    pub fn record_violation(_kind: &'static str) {}

    #[inline(always)]
    pub fn record_undeliverable() {}
}

pub(crate) use imp::{record_queue_growth, record_undeliverable, record_violation};
