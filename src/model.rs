//! Domain entities — mail items, reply suggestions, sent records, and daily
//! summaries.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::Classification;
use crate::error::ValidationError;

/// Reply tone. Exactly three tones exist; every suggestion set is keyed by
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Formal,
    Casual,
    Brief,
}

impl Tone {
    /// All tones, in the order drafts are requested.
    pub const ALL: [Tone; 3] = [Tone::Formal, Tone::Casual, Tone::Brief];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Formal => "formal",
            Self::Casual => "casual",
            Self::Brief => "brief",
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tone {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "formal" => Ok(Self::Formal),
            "casual" => Ok(Self::Casual),
            "brief" => Ok(Self::Brief),
            other => Err(ValidationError::UnknownTone(other.to_string())),
        }
    }
}

// ── Mail items ──────────────────────────────────────────────────────

/// A fetched mail message. Append-only: items are created on fetch, mutated
/// by classification and reply steps, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailItem {
    /// Row id.
    pub id: i64,
    /// Source mailbox UID — the natural dedup key (UNIQUE in the store).
    pub original_uid: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    /// Present once the classification step has run.
    pub classification: Option<Classification>,
    pub is_replied: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A mail item as handed to the store for upsert (no row id yet).
#[derive(Debug, Clone)]
pub struct NewMailItem {
    pub original_uid: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

// ── Reply suggestions ───────────────────────────────────────────────

/// Status of a reply suggestion set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    /// Waiting for a human decision.
    Pending,
    /// Approved — a send was triggered.
    Approved,
    /// Rejected by the user.
    Rejected,
    /// Lapsed past retention without a decision.
    Expired,
    /// Superseded by a newer suggestion set for the same mail.
    Superseded,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "expired" => Self::Expired,
            "superseded" => Self::Superseded,
            _ => Self::Pending,
        }
    }
}

/// One classification's candidate answers: a tone → draft map held behind
/// the approval gate.
///
/// Invariant: at most one non-expired suggestion set per mail id — inserting
/// a new set supersedes the previous pending one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplySuggestion {
    pub id: Uuid,
    pub mail_id: i64,
    /// Drafts per tone. A tone whose draft call failed is simply absent.
    pub drafts: BTreeMap<Tone, String>,
    pub status: SuggestionStatus,
    /// The tone the user picked, set on approval.
    pub selected_tone: Option<Tone>,
    /// Whether the approved text was edited before sending.
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ReplySuggestion {
    /// Create a new pending suggestion set.
    pub fn new(mail_id: i64, drafts: BTreeMap<Tone, String>, retention: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            mail_id,
            drafts,
            status: SuggestionStatus::Pending,
            selected_tone: None,
            edited: false,
            created_at: now,
            expires_at: now + retention,
        }
    }

    /// Whether the retention window has passed.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

// ── Sent records ────────────────────────────────────────────────────

/// Delivery outcome of an audited send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentStatus {
    Sent,
    Failed,
}

impl SentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "failed" => Self::Failed,
            _ => Self::Sent,
        }
    }
}

/// An audited send. Created only after the approval gate confirms; immutable
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentRecord {
    pub id: i64,
    /// Source mail id; None for standalone sends.
    pub mail_id: Option<i64>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: SentStatus,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

// ── Daily summaries ─────────────────────────────────────────────────

/// One digest per calendar day (UNIQUE on date). Re-running the task for the
/// same day overwrites content and count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub summary: String,
    pub item_count: i64,
    pub updated_at: DateTime<Utc>,
}
