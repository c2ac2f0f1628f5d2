//! Webhook delivery over HTTP.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::{WebhookClient, WebhookError, WebhookRequest};

/// POSTs the webhook body as JSON with the configured headers.
///
/// Runs on the webhook worker thread, so a blocking client is fine.
#[derive(Debug, Clone)]
pub struct HttpWebhookClient {
    client: Client,
}

impl HttpWebhookClient {
    /// Creates a client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("geofence-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WebhookError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    fn header_map(request: &WebhookRequest) -> Result<HeaderMap, WebhookError> {
        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| WebhookError::InvalidRequest(format!("header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| WebhookError::InvalidRequest(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

impl WebhookClient for HttpWebhookClient {
    fn post(&self, request: &WebhookRequest) -> Result<u16, WebhookError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| WebhookError::InvalidRequest(format!("url {:?}: {e}", request.url)))?;
        let headers = Self::header_map(request)?;

        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(&request.body)
            .send()
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(WebhookError::Status {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::geofence::GeofenceId;
    use crate::transition::TransitionKind;

    fn request(url: &str, headers: &[(&str, &str)]) -> WebhookRequest {
        WebhookRequest {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            body: serde_json::json!({"ok": true}),
            geofence_id: GeofenceId::from("g"),
            kind: TransitionKind::Enter,
        }
    }

    #[test]
    fn test_rejects_bad_url_without_network() {
        let client = HttpWebhookClient::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.post(&request("not a url", &[])),
            Err(WebhookError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_rejects_bad_header_name() {
        let client = HttpWebhookClient::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.post(&request("https://example.test", &[("bad header", "v")])),
            Err(WebhookError::InvalidRequest(_))
        ));
    }
}
