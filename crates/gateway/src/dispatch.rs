use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tracing::warn,
    waygate_common::{EventEnvelope, GatewayError},
};

/// A downstream consumer of canonical events.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    /// Sink identifier for logs and error reports.
    fn name(&self) -> &str;

    async fn deliver(&self, envelope: &EventEnvelope) -> Result<(), GatewayError>;
}

/// Deliver one envelope to every sink concurrently, each under its own
/// timeout. A sink failing or timing out never prevents or delays delivery
/// to the others; failures are logged and returned for observability only.
pub async fn dispatch_all(
    sinks: &[Arc<dyn DispatchSink>],
    envelope: &EventEnvelope,
    timeout: Duration,
) -> Vec<GatewayError> {
    let attempts = sinks.iter().map(|sink| async move {
        match tokio::time::timeout(timeout, sink.deliver(envelope)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(GatewayError::SinkDeliveryFailed {
                sink: sink.name().to_string(),
                reason: format!("timed out after {}s", timeout.as_secs()),
            }),
        }
    });

    let failures: Vec<GatewayError> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .collect();

    for failure in &failures {
        warn!(
            tenant = %envelope.tenant_id,
            event = %envelope.event,
            error = %failure,
            "sink delivery failed"
        );
    }
    failures
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use waygate_common::event::events;

    use super::*;

    struct FlakySink {
        name: &'static str,
        fail: bool,
        hang: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DispatchSink for FlakySink {
        fn name(&self) -> &str {
            self.name
        }

        async fn deliver(&self, _envelope: &EventEnvelope) -> Result<(), GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(GatewayError::SinkDeliveryFailed {
                    sink: self.name.into(),
                    reason: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn sink(name: &'static str, fail: bool, hang: bool) -> Arc<FlakySink> {
        Arc::new(FlakySink {
            name,
            fail,
            hang,
            calls: AtomicUsize::new(0),
        })
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(events::MESSAGE, "t1", 1, serde_json::json!({}))
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let bad = sink("bad", true, false);
        let good = sink("good", false, false);
        let sinks: Vec<Arc<dyn DispatchSink>> = vec![bad.clone(), good.clone()];

        let failures = dispatch_all(&sinks, &envelope(), Duration::from_secs(5)).await;

        assert_eq!(failures.len(), 1);
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_sink_times_out_and_others_deliver() {
        let slow = sink("slow", false, true);
        let good = sink("good", false, false);
        let sinks: Vec<Arc<dyn DispatchSink>> = vec![slow.clone(), good.clone()];

        let failures = dispatch_all(&sinks, &envelope(), Duration::from_secs(1)).await;

        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("timed out"));
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_sinks_is_a_no_op() {
        let failures = dispatch_all(&[], &envelope(), Duration::from_secs(1)).await;
        assert!(failures.is_empty());
    }
}
