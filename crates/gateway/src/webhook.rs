use std::sync::RwLock;

use {
    async_trait::async_trait,
    tracing::debug,
    waygate_common::{EventEnvelope, GatewayError},
};

use crate::dispatch::DispatchSink;

/// Posts each envelope as a JSON body to the tenant's webhook URL.
///
/// One POST per envelope, no retries; at-least-once delivery is explicitly
/// not a goal. A tenant without a configured URL short-circuits to success.
pub struct WebhookSink {
    tenant_id: String,
    client: reqwest::Client,
    url: RwLock<Option<String>>,
}

impl WebhookSink {
    pub fn new(tenant_id: impl Into<String>, client: reqwest::Client, url: Option<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client,
            url: RwLock::new(url),
        }
    }

    /// Swap the target URL; takes effect for the next envelope.
    pub fn set_url(&self, url: Option<String>) {
        if let Ok(mut guard) = self.url.write() {
            *guard = url;
        }
    }

    fn url(&self) -> Option<String> {
        self.url.read().ok().and_then(|g| g.clone())
    }
}

#[async_trait]
impl DispatchSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, envelope: &EventEnvelope) -> Result<(), GatewayError> {
        let Some(url) = self.url() else {
            debug!(tenant = %self.tenant_id, "no webhook URL configured, skipping");
            return Ok(());
        };

        let response = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| GatewayError::SinkDeliveryFailed {
                sink: "webhook".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::SinkDeliveryFailed {
                sink: "webhook".into(),
                reason: format!("{url} responded {status}"),
            });
        }

        debug!(tenant = %self.tenant_id, event = %envelope.event, "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use waygate_common::event::events;

    use super::*;

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(
            events::MESSAGE,
            "t1",
            7,
            serde_json::json!({"id": "m1", "text": "hi"}),
        )
    }

    #[tokio::test]
    async fn posts_envelope_as_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "event": "Message",
                "tenant_id": "t1",
            })))
            .with_status(200)
            .create_async()
            .await;

        let sink = WebhookSink::new(
            "t1",
            reqwest::Client::new(),
            Some(format!("{}/hook", server.url())),
        );
        sink.deliver(&envelope()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_a_delivery_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let sink = WebhookSink::new(
            "t1",
            reqwest::Client::new(),
            Some(format!("{}/hook", server.url())),
        );
        let err = sink.deliver(&envelope()).await.unwrap_err();
        assert!(matches!(err, GatewayError::SinkDeliveryFailed { .. }));
    }

    #[tokio::test]
    async fn missing_url_short_circuits() {
        let sink = WebhookSink::new("t1", reqwest::Client::new(), None);
        sink.deliver(&envelope()).await.unwrap();
    }
}
