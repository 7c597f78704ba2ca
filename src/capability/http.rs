//! HTTP capability client — posts JSON payloads to the workflow host's
//! webhooks.

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capability::{
    Capability, CapabilityClient, CapabilityRequest, CapabilityResponse, DraftResponse,
    FetchResponse, SendResponse, SummarizeResponse,
};
use crate::error::CapabilityError;

/// Capability client that talks to the workflow host over HTTP.
pub struct HttpCapabilityClient {
    base_url: String,
    client: Client,
}

impl HttpCapabilityClient {
    /// Create a client for the given workflow host base URL
    /// (e.g. `http://n8n:5678`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// POST the payload, with one internal retry for connection-level errors.
    ///
    /// Logical failures (HTTP error status, `success: false`, unparseable
    /// body) are never retried here — that decision belongs to the engine.
    async fn post(
        &self,
        capability: Capability,
        payload: &Value,
    ) -> Result<Value, CapabilityError> {
        let url = format!("{}{}", self.base_url, capability.webhook_path());
        debug!(%capability, %url, "Invoking capability");

        let mut attempted_reconnect = false;
        let response = loop {
            let result = self
                .client
                .post(&url)
                .timeout(capability.timeout())
                .json(payload)
                .send()
                .await;

            match result {
                Ok(resp) => break resp,
                Err(e) if e.is_timeout() => {
                    return Err(CapabilityError::Timeout {
                        capability,
                        timeout: capability.timeout(),
                    });
                }
                Err(e) if e.is_connect() && !attempted_reconnect => {
                    warn!(%capability, error = %e, "Connection failed, retrying once");
                    attempted_reconnect = true;
                }
                Err(e) => {
                    return Err(CapabilityError::Remote {
                        capability,
                        reason: e.to_string(),
                    });
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Remote {
                capability,
                reason: format!("HTTP {status}"),
            });
        }

        // Never surface partially-parsed JSON: a bad body is a typed failure.
        let body: Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed {
                capability,
                reason: format!("response body is not valid JSON: {e}"),
            })?;

        // Workflows report logical failure in-band.
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("workflow reported failure")
                .to_string();
            return Err(CapabilityError::Rejected {
                capability,
                message,
            });
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl CapabilityClient for HttpCapabilityClient {
    async fn invoke(
        &self,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let capability = request.capability();
        let payload = serde_json::to_value(&request).map_err(|e| CapabilityError::Malformed {
            capability,
            reason: format!("failed to serialize request: {e}"),
        })?;

        let body = self.post(capability, &payload).await?;

        let response = match capability {
            Capability::Fetch => {
                let parsed: FetchResponse = parse_body(capability, body)?;
                info!(new_count = parsed.new_count, "Fetch complete");
                CapabilityResponse::Fetch(parsed)
            }
            // Raw value — the classification step owns lenient parsing.
            Capability::Classify => CapabilityResponse::Classify(body),
            Capability::Summarize => {
                let parsed: SummarizeResponse = parse_body(capability, body)?;
                CapabilityResponse::Summarize(parsed)
            }
            Capability::DraftReply => {
                let parsed: DraftResponse = parse_body(capability, body)?;
                CapabilityResponse::Draft(parsed)
            }
            Capability::Send => {
                let parsed: SendResponse = parse_body(capability, body)?;
                CapabilityResponse::Send(parsed)
            }
        };

        Ok(response)
    }
}

/// Deserialize a structured response body into its contract type.
fn parse_body<T: serde::de::DeserializeOwned>(
    capability: Capability,
    body: Value,
) -> Result<T, CapabilityError> {
    serde_json::from_value(body).map_err(|e| CapabilityError::Malformed {
        capability,
        reason: format!("response does not match {capability} contract: {e}"),
    })
}
