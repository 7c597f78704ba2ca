//! Backend-agnostic `Store` trait — single async interface for all
//! persistence.
//!
//! Writes are single statements; idempotence comes from unique-key upserts
//! (mail natural id, summary date), not locks or multi-row transactions.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::classify::Classification;
use crate::engine::run::Run;
use crate::error::DatabaseError;
use crate::model::{
    DailySummary, MailItem, NewMailItem, ReplySuggestion, SentRecord, SentStatus,
    SuggestionStatus, Tone,
};

#[async_trait]
pub trait Store: Send + Sync {
    // ── Mail items ──────────────────────────────────────────────────

    /// Upsert a fetched mail item keyed by its natural id (`original_uid`).
    /// Duplicate fetches overwrite under last-write-wins; the row id of the
    /// (possibly pre-existing) item is returned.
    async fn upsert_mail_item(&self, item: &NewMailItem) -> Result<i64, DatabaseError>;

    /// Get a mail item by row id.
    async fn get_mail_item(&self, id: i64) -> Result<Option<MailItem>, DatabaseError>;

    /// Look up a mail item by its natural id.
    async fn get_mail_by_uid(&self, uid: &str) -> Result<Option<MailItem>, DatabaseError>;

    /// Persist a classification result on an item.
    async fn update_classification(
        &self,
        id: i64,
        classification: &Classification,
    ) -> Result<(), DatabaseError>;

    /// Mark an item as replied (after a send succeeds).
    async fn mark_replied(&self, id: i64) -> Result<(), DatabaseError>;

    /// List mail, most recent first.
    async fn list_mail(
        &self,
        limit: usize,
        offset: usize,
        analyzed_only: bool,
    ) -> Result<Vec<MailItem>, DatabaseError>;

    // ── Reply suggestions ───────────────────────────────────────────

    /// Insert a new suggestion set, superseding any previous pending set for
    /// the same mail (at most one non-expired set per mail id).
    async fn insert_suggestion(&self, suggestion: &ReplySuggestion) -> Result<(), DatabaseError>;

    /// Get a suggestion by id.
    async fn get_suggestion(&self, id: Uuid) -> Result<Option<ReplySuggestion>, DatabaseError>;

    /// Get the pending suggestion for a mail item, if any.
    async fn get_pending_suggestion_for_mail(
        &self,
        mail_id: i64,
    ) -> Result<Option<ReplySuggestion>, DatabaseError>;

    /// Record an approval-gate decision on a suggestion. The write is
    /// conditional on the row still being pending; a decided row yields
    /// `Constraint`, a missing one `NotFound`.
    async fn update_suggestion_decision(
        &self,
        id: Uuid,
        status: SuggestionStatus,
        selected_tone: Option<Tone>,
        edited: bool,
    ) -> Result<(), DatabaseError>;

    // ── Sent records ────────────────────────────────────────────────

    /// Append an audited send. Returns the record id.
    async fn insert_sent_record(
        &self,
        mail_id: Option<i64>,
        recipient: &str,
        subject: &str,
        body: &str,
        status: SentStatus,
        error: Option<&str>,
    ) -> Result<i64, DatabaseError>;

    /// List sent records, most recent first.
    async fn list_sent_records(&self, limit: usize) -> Result<Vec<SentRecord>, DatabaseError>;

    // ── Daily summaries ─────────────────────────────────────────────

    /// Upsert the digest for one day. Re-running overwrites content and
    /// count for that date.
    async fn upsert_daily_summary(
        &self,
        date: NaiveDate,
        summary: &str,
        item_count: i64,
    ) -> Result<(), DatabaseError>;

    /// Get the digest for a day.
    async fn get_daily_summary(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, DatabaseError>;

    // ── Runs ────────────────────────────────────────────────────────

    /// Upsert a run record (called after every step for resumability/audit).
    async fn save_run(&self, run: &Run) -> Result<(), DatabaseError>;

    /// Get a run by id.
    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, DatabaseError>;
}
