use std::sync::atomic::{AtomicU64, Ordering};

/// Returns a process-unique fallback correlation ID. Used when a webhook
/// arrives without a delivery header and for internally enqueued jobs.
pub fn fallback_delivery_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("local-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(fallback_delivery_id(), fallback_delivery_id());
    }

    #[test]
    fn ids_carry_the_local_prefix() {
        assert!(fallback_delivery_id().starts_with("local-"));
    }
}
