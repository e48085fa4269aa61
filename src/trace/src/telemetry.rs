use opentelemetry::trace::TraceId;
use rand::Rng;

/// Random trace id recorded on reconcile spans so that log lines of one
/// reconciliation can be correlated.
pub fn get_trace_id() -> TraceId {
    let mut rng = rand::thread_rng();
    let val: u128 = rng.gen();
    TraceId::from(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_get_trace_id() {
        let a = get_trace_id();
        let b = get_trace_id();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 32);
    }
}
