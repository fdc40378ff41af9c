//! Webhook dispatcher: fire-and-forget delivery of inbound-message notifications.
//!
//! Every notification is delivered on its own task. Failed attempts are retried
//! with exponential backoff (1s, 2s, 4s, ...) and dropped after the configured
//! number of attempts. Callers never observe delivery failures.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use waku_core::config::WebhookConfig;
use waku_core::error::{Result, WakuError};
use waku_core::types::WebhookNotification;

pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: Option<String>,
    enabled: bool,
    retry_count: u32,
    initial_backoff: Duration,
    permits: Arc<Semaphore>,
}

impl WebhookDispatcher {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| WakuError::Config(format!("failed to build webhook client: {e}")))?;

        Ok(Self {
            client,
            url: config.resolve_url(),
            enabled: config.enabled,
            retry_count: config.retry_count.max(1),
            initial_backoff: config.initial_backoff(),
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        })
    }

    /// Dispatcher that drops every notification.
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            url: None,
            enabled: false,
            retry_count: 1,
            initial_backoff: Duration::ZERO,
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Whether notifications will actually be sent.
    pub fn is_active(&self) -> bool {
        self.enabled && self.url.is_some()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Queue delivery of one notification and return immediately.
    ///
    /// Returns the delivery task, or `None` when the dispatcher is inactive.
    pub fn dispatch(self: &Arc<Self>, notification: WebhookNotification) -> Option<JoinHandle<()>> {
        if !self.is_active() {
            debug!(
                device_id = %notification.device_id,
                message_id = %notification.message_id,
                "Webhook disabled or URL not set, skipping message forwarding"
            );
            return None;
        }

        let dispatcher = self.clone();
        Some(tokio::spawn(async move {
            // The permit is taken inside the task so the caller never waits.
            let Ok(_permit) = dispatcher.permits.clone().acquire_owned().await else {
                return;
            };

            match dispatcher.deliver(&notification).await {
                Ok(attempts) => {
                    debug!(
                        device_id = %notification.device_id,
                        message_id = %notification.message_id,
                        attempts,
                        "Webhook delivered"
                    );
                }
                Err(e) => {
                    error!(
                        device_id = %notification.device_id,
                        message_id = %notification.message_id,
                        %e,
                        "Webhook delivery failed, dropping notification"
                    );
                }
            }
        }))
    }

    /// Deliver with retries. Returns the number of attempts used on success.
    pub async fn deliver(&self, notification: &WebhookNotification) -> Result<u32> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| WakuError::Config("webhook URL not set".into()))?;

        let mut backoff = self.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.retry_count {
            #[cfg(feature = "metrics")]
            crate::metrics::record_webhook_attempt();

            match self.client.post(url).json(notification).send().await {
                Ok(resp) if resp.status().is_success() => {
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_webhook_delivered();
                    return Ok(attempt);
                }
                Ok(resp) => {
                    last_error = format!("webhook returned status code: {}", resp.status().as_u16());
                }
                Err(e) => {
                    last_error = format!("failed to send request: {e}");
                }
            }

            warn!(
                message_id = %notification.message_id,
                attempt,
                max_attempts = self.retry_count,
                error = %last_error,
                "Webhook attempt failed"
            );

            if attempt < self.retry_count {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }

        #[cfg(feature = "metrics")]
        crate::metrics::record_webhook_exhausted();

        Err(WakuError::DeliveryExhausted {
            attempts: self.retry_count,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use waku_core::types::MessageKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> WebhookNotification {
        WebhookNotification {
            device_id: "dev-a".into(),
            message_id: "3EB0C767D26A".into(),
            from: "628123456789".into(),
            from_name: "Sari".into(),
            message: "halo".into(),
            message_type: MessageKind::Text,
            timestamp: 1_700_000_000,
            is_group: false,
            group_jid: None,
            group_name: None,
            media_url: None,
            quoted_message: None,
        }
    }

    fn config(url: String, retry_count: u32, initial_backoff_ms: u64) -> WebhookConfig {
        WebhookConfig {
            enabled: true,
            url: Some(url),
            retry_count,
            initial_backoff_ms,
            ..WebhookConfig::default()
        }
    }

    /// Fails the first `failures` requests, then answers 200, recording when
    /// each request arrived.
    struct Flaky {
        failures: usize,
        arrivals: Arc<std::sync::Mutex<Vec<Instant>>>,
    }

    impl wiremock::Respond for Flaky {
        fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
            let mut arrivals = self.arrivals.lock().unwrap();
            arrivals.push(Instant::now());
            if arrivals.len() <= self.failures {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200)
            }
        }
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let server = MockServer::start().await;
        let arrivals = Arc::new(std::sync::Mutex::new(Vec::new()));
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(Flaky {
                failures: 2,
                arrivals: arrivals.clone(),
            })
            .expect(3)
            .mount(&server)
            .await;

        let dispatcher =
            WebhookDispatcher::new(&config(format!("{}/hook", server.uri()), 3, 1000)).unwrap();

        let attempts = dispatcher.deliver(&notification()).await.unwrap();
        assert_eq!(attempts, 3);
        server.verify().await;

        let arrivals = arrivals.lock().unwrap().clone();
        assert_eq!(arrivals.len(), 3);
        let first_gap = arrivals[1] - arrivals[0];
        let second_gap = arrivals[2] - arrivals[1];
        assert!(first_gap >= Duration::from_secs(1), "first gap {first_gap:?}");
        assert!(second_gap >= Duration::from_secs(2), "second gap {second_gap:?}");
    }

    #[tokio::test]
    async fn test_always_failing_stops_at_retry_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dispatcher =
            WebhookDispatcher::new(&config(format!("{}/hook", server.uri()), 3, 10)).unwrap();
        let err = dispatcher.deliver(&notification()).await.unwrap_err();
        match err {
            WakuError::DeliveryExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"), "got: {last_error}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn test_transport_error_is_retried() {
        let dispatcher =
            WebhookDispatcher::new(&config("http://127.0.0.1:1/hook".into(), 2, 10)).unwrap();
        let err = dispatcher.deliver(&notification()).await.unwrap_err();
        assert!(matches!(err, WakuError::DeliveryExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_dispatch_posts_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "device_id": "dev-a",
                "from": "628123456789",
                "from_name": "Sari",
                "message_type": "text",
                "group_jid": null,
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Arc::new(
            WebhookDispatcher::new(&config(format!("{}/hook", server.uri()), 3, 10)).unwrap(),
        );
        let handle = dispatcher.dispatch(notification()).expect("dispatcher is active");
        handle.await.unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let dispatcher = Arc::new(WebhookDispatcher::disabled());
        assert!(!dispatcher.is_active());
        assert!(dispatcher.dispatch(notification()).is_none());

        let no_url = Arc::new(
            WebhookDispatcher::new(&WebhookConfig {
                enabled: true,
                ..WebhookConfig::default()
            })
            .unwrap(),
        );
        assert!(no_url.dispatch(notification()).is_none());
    }

    #[test]
    fn test_zero_retry_count_still_attempts_once() {
        let dispatcher = WebhookDispatcher::new(&WebhookConfig {
            retry_count: 0,
            ..WebhookConfig::default()
        })
        .unwrap();
        assert_eq!(dispatcher.retry_count(), 1);
    }
}
