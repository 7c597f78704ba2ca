//! Remote capability adapters — uniform call interface to the external
//! webhook workflows (mail fetch/delivery and LLM prompting live behind
//! them).
//!
//! Each capability is a tagged request/response pair dispatched through a
//! single `invoke` entry point. Adapters are pure I/O: timeouts, retries and
//! branching are owned by the orchestration engine.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;
use crate::model::Tone;

pub use http::HttpCapabilityClient;

/// The five remote capabilities the engine orchestrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Pull new mail into the store.
    Fetch,
    /// Classify one mail item (type, importance, sentiment, needs-reply).
    Classify,
    /// Produce the daily digest text.
    Summarize,
    /// Draft one reply in a given tone.
    DraftReply,
    /// Deliver an approved reply.
    Send,
}

impl Capability {
    /// Timeout budget for a single call to this capability.
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Fetch | Self::Send => Duration::from_secs(30),
            Self::Classify | Self::DraftReply => Duration::from_secs(60),
            Self::Summarize => Duration::from_secs(120),
        }
    }

    /// Webhook path on the workflow host.
    pub fn webhook_path(&self) -> &'static str {
        match self {
            Self::Fetch => "/webhook/mail",
            Self::Classify => "/webhook/analyze",
            Self::Summarize => "/webhook/summary",
            Self::DraftReply => "/webhook/generate-reply",
            Self::Send => "/webhook/send-reply",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Classify => write!(f, "classify"),
            Self::Summarize => write!(f, "summarize"),
            Self::DraftReply => write!(f, "draft_reply"),
            Self::Send => write!(f, "send"),
        }
    }
}

// ── Requests ────────────────────────────────────────────────────────

/// Fetch new mail received on or after `since_date`.
#[derive(Debug, Clone, Serialize)]
pub struct FetchRequest {
    pub since_date: NaiveDate,
}

/// Classify one mail item. The body is truncated by the classification
/// step before the request is built.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest {
    pub item_id: i64,
    pub subject: String,
    pub sender: String,
    pub body: String,
}

/// Summarize a day's mail.
#[derive(Debug, Clone, Serialize)]
pub struct SummarizeRequest {
    pub summary_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_ids: Option<Vec<i64>>,
}

/// Draft one reply in the given tone.
#[derive(Debug, Clone, Serialize)]
pub struct DraftRequest {
    pub item_id: i64,
    pub tone: Tone,
    pub subject: String,
    pub sender: String,
    pub body: String,
}

/// Deliver a reply.
#[derive(Debug, Clone, Serialize)]
pub struct SendRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Tagged union of all capability requests — one variant per capability.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum CapabilityRequest {
    Fetch(FetchRequest),
    Classify(ClassifyRequest),
    Summarize(SummarizeRequest),
    DraftReply(DraftRequest),
    Send(SendRequest),
}

impl CapabilityRequest {
    /// Which capability this request targets.
    pub fn capability(&self) -> Capability {
        match self {
            Self::Fetch(_) => Capability::Fetch,
            Self::Classify(_) => Capability::Classify,
            Self::Summarize(_) => Capability::Summarize,
            Self::DraftReply(_) => Capability::DraftReply,
            Self::Send(_) => Capability::Send,
        }
    }
}

// ── Responses ───────────────────────────────────────────────────────

/// One mail item as returned by the fetch workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedMail {
    /// Source mailbox UID — the natural dedup key.
    pub uid: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Fetch result: the new items themselves, so the store owns dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub new_count: usize,
    #[serde(default)]
    pub items: Vec<FetchedMail>,
}

/// Summary result for one day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeResponse {
    pub summary: String,
    #[serde(default)]
    pub email_count: i64,
}

/// One drafted reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftResponse {
    pub tone: Tone,
    pub text: String,
}

/// Send result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(default)]
    pub sent_id: Option<String>,
}

/// Tagged union of all capability responses.
///
/// The classify payload stays a raw JSON value: the classification step owns
/// the degrade-to-defaults parsing, so a structurally odd (but valid-JSON)
/// LLM answer is not an adapter failure.
#[derive(Debug, Clone)]
pub enum CapabilityResponse {
    Fetch(FetchResponse),
    Classify(serde_json::Value),
    Summarize(SummarizeResponse),
    Draft(DraftResponse),
    Send(SendResponse),
}

impl CapabilityResponse {
    pub fn into_fetch(self) -> Result<FetchResponse, CapabilityError> {
        match self {
            Self::Fetch(r) => Ok(r),
            other => Err(mismatch(Capability::Fetch, &other)),
        }
    }

    pub fn into_classify(self) -> Result<serde_json::Value, CapabilityError> {
        match self {
            Self::Classify(v) => Ok(v),
            other => Err(mismatch(Capability::Classify, &other)),
        }
    }

    pub fn into_summarize(self) -> Result<SummarizeResponse, CapabilityError> {
        match self {
            Self::Summarize(r) => Ok(r),
            other => Err(mismatch(Capability::Summarize, &other)),
        }
    }

    pub fn into_draft(self) -> Result<DraftResponse, CapabilityError> {
        match self {
            Self::Draft(r) => Ok(r),
            other => Err(mismatch(Capability::DraftReply, &other)),
        }
    }

    pub fn into_send(self) -> Result<SendResponse, CapabilityError> {
        match self {
            Self::Send(r) => Ok(r),
            other => Err(mismatch(Capability::Send, &other)),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Classify(_) => "classify",
            Self::Summarize(_) => "summarize",
            Self::Draft(_) => "draft_reply",
            Self::Send(_) => "send",
        }
    }
}

fn mismatch(expected: Capability, got: &CapabilityResponse) -> CapabilityError {
    CapabilityError::Malformed {
        capability: expected,
        reason: format!("expected {expected} response, got {}", got.label()),
    }
}

// ── Client trait ────────────────────────────────────────────────────

/// Uniform call interface to the remote capabilities.
///
/// Implementations do at most one internal low-level retry for
/// connection-level errors; logical retry belongs to the engine.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    async fn invoke(
        &self,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_budgets() {
        assert_eq!(Capability::Fetch.timeout(), Duration::from_secs(30));
        assert_eq!(Capability::Send.timeout(), Duration::from_secs(30));
        assert_eq!(Capability::Classify.timeout(), Duration::from_secs(60));
        assert_eq!(Capability::DraftReply.timeout(), Duration::from_secs(60));
        assert_eq!(Capability::Summarize.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn request_capability_mapping() {
        let req = CapabilityRequest::Send(SendRequest {
            to: "a@example.com".into(),
            subject: "Re: hello".into(),
            body: "hi".into(),
        });
        assert_eq!(req.capability(), Capability::Send);
        assert_eq!(req.capability().webhook_path(), "/webhook/send-reply");
    }

    #[test]
    fn response_accessor_mismatch_is_malformed() {
        let resp = CapabilityResponse::Send(SendResponse {
            success: true,
            sent_id: None,
        });
        let err = resp.into_fetch().unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn fetch_response_deserializes_without_items() {
        let resp: FetchResponse = serde_json::from_str(r#"{"new_count": 0}"#).unwrap();
        assert_eq!(resp.new_count, 0);
        assert!(resp.items.is_empty());
    }

    #[test]
    fn request_serializes_tagged() {
        let req = CapabilityRequest::Fetch(FetchRequest {
            since_date: NaiveDate::from_ymd_opt(2026, 8, 27).unwrap(),
        });
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["capability"], "fetch");
        assert_eq!(json["since_date"], "2026-08-27");
    }
}
