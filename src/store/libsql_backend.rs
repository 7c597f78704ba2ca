//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! RFC 3339 strings; drafts, run context and errors are JSON columns.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::classify::{Classification, EmailType, Sentiment};
use crate::engine::run::{Run, RunStatus, TaskKind};
use crate::error::DatabaseError;
use crate::model::{
    DailySummary, MailItem, NewMailItem, ReplySuggestion, SentRecord, SentStatus,
    SuggestionStatus, Tone,
};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

const MAIL_COLUMNS: &str = "id, original_uid, subject, sender, body, received_at, \
     email_type, importance_score, needs_reply, sentiment, key_points, parse_error, \
     is_replied, created_at, updated_at";

/// Map a libsql row (MAIL_COLUMNS order) to a MailItem.
fn row_to_mail_item(row: &libsql::Row) -> Result<MailItem, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("mail row read failed: {e}"));

    let id: i64 = row.get(0).map_err(get_err)?;
    let original_uid: String = row.get(1).map_err(get_err)?;
    let subject: String = row.get(2).map_err(get_err)?;
    let sender: String = row.get(3).map_err(get_err)?;
    let body: String = row.get(4).map_err(get_err)?;
    let received_str: String = row.get(5).map_err(get_err)?;

    let email_type: Option<String> = row.get(6).ok();
    let importance: Option<i64> = row.get(7).ok();
    let needs_reply: Option<i64> = row.get(8).ok();
    let sentiment: Option<String> = row.get(9).ok();
    let key_points_json: Option<String> = row.get(10).ok();
    let parse_error: i64 = row.get(11).unwrap_or(0);
    let is_replied: i64 = row.get(12).unwrap_or(0);
    let created_str: String = row.get(13).map_err(get_err)?;
    let updated_str: String = row.get(14).map_err(get_err)?;

    // A row is classified iff email_type is set.
    let classification = email_type.map(|type_label| Classification {
        email_type: EmailType::parse_label(&type_label),
        importance_score: importance.unwrap_or(5).clamp(0, 10) as u8,
        needs_reply: needs_reply.unwrap_or(0) != 0,
        sentiment: sentiment
            .map(|s| Sentiment::parse_label(&s))
            .unwrap_or(Sentiment::Neutral),
        key_points: key_points_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
        parse_error: parse_error != 0,
    });

    Ok(MailItem {
        id,
        original_uid,
        subject,
        sender,
        body,
        received_at: parse_datetime(&received_str),
        classification,
        is_replied: is_replied != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const SUGGESTION_COLUMNS: &str =
    "id, mail_id, drafts, status, selected_tone, edited, created_at, expires_at";

/// Map a libsql row (SUGGESTION_COLUMNS order) to a ReplySuggestion.
fn row_to_suggestion(row: &libsql::Row) -> Result<ReplySuggestion, DatabaseError> {
    let get_err =
        |e: libsql::Error| DatabaseError::Query(format!("suggestion row read failed: {e}"));

    let id_str: String = row.get(0).map_err(get_err)?;
    let mail_id: i64 = row.get(1).map_err(get_err)?;
    let drafts_json: String = row.get(2).map_err(get_err)?;
    let status_str: String = row.get(3).map_err(get_err)?;
    let tone_str: Option<String> = row.get(4).ok();
    let edited: i64 = row.get(5).unwrap_or(0);
    let created_str: String = row.get(6).map_err(get_err)?;
    let expires_str: String = row.get(7).map_err(get_err)?;

    let drafts: BTreeMap<Tone, String> = serde_json::from_str(&drafts_json)
        .map_err(|e| DatabaseError::Serialization(format!("drafts column: {e}")))?;

    Ok(ReplySuggestion {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("suggestion id: {e}")))?,
        mail_id,
        drafts,
        status: SuggestionStatus::parse(&status_str),
        selected_tone: tone_str.and_then(|t| t.parse().ok()),
        edited: edited != 0,
        created_at: parse_datetime(&created_str),
        expires_at: parse_datetime(&expires_str),
    })
}

#[async_trait]
impl Store for LibSqlStore {
    // ── Mail items ──────────────────────────────────────────────────

    async fn upsert_mail_item(&self, item: &NewMailItem) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        // Last-write-wins on the natural id.
        self.conn()
            .execute(
                "INSERT INTO mail_items
                    (original_uid, subject, sender, body, received_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(original_uid) DO UPDATE SET
                    subject = excluded.subject,
                    sender = excluded.sender,
                    body = excluded.body,
                    received_at = excluded.received_at,
                    updated_at = excluded.updated_at",
                params![
                    item.original_uid.as_str(),
                    item.subject.as_str(),
                    item.sender.as_str(),
                    item.body.as_str(),
                    item.received_at.to_rfc3339(),
                    now
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert mail item: {e}")))?;

        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM mail_items WHERE original_uid = ?1",
                params![item.original_uid.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("lookup upserted mail item: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read upserted mail item: {e}")))?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "mail_item".into(),
                id: item.original_uid.clone(),
            })?;

        row.get(0)
            .map_err(|e| DatabaseError::Query(format!("mail item id: {e}")))
    }

    async fn get_mail_item(&self, id: i64) -> Result<Option<MailItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MAIL_COLUMNS} FROM mail_items WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get mail item: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read mail item: {e}")))?
        {
            Some(row) => Ok(Some(row_to_mail_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_mail_by_uid(&self, uid: &str) -> Result<Option<MailItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MAIL_COLUMNS} FROM mail_items WHERE original_uid = ?1"),
                params![uid],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get mail by uid: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read mail by uid: {e}")))?
        {
            Some(row) => Ok(Some(row_to_mail_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_classification(
        &self,
        id: i64,
        classification: &Classification,
    ) -> Result<(), DatabaseError> {
        let key_points = serde_json::to_string(&classification.key_points)
            .map_err(|e| DatabaseError::Serialization(format!("key_points: {e}")))?;

        let affected = self
            .conn()
            .execute(
                "UPDATE mail_items SET
                    email_type = ?1,
                    importance_score = ?2,
                    needs_reply = ?3,
                    sentiment = ?4,
                    key_points = ?5,
                    parse_error = ?6,
                    updated_at = ?7
                 WHERE id = ?8",
                params![
                    classification.email_type.as_str(),
                    classification.importance_score as i64,
                    classification.needs_reply as i64,
                    classification.sentiment.as_str(),
                    key_points,
                    classification.parse_error as i64,
                    Utc::now().to_rfc3339(),
                    id
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update classification: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "mail_item".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_replied(&self, id: i64) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE mail_items SET is_replied = 1, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark replied: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "mail_item".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_mail(
        &self,
        limit: usize,
        offset: usize,
        analyzed_only: bool,
    ) -> Result<Vec<MailItem>, DatabaseError> {
        let filter = if analyzed_only {
            "WHERE email_type IS NOT NULL"
        } else {
            ""
        };
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MAIL_COLUMNS} FROM mail_items {filter}
                     ORDER BY received_at DESC LIMIT ?1 OFFSET ?2"
                ),
                params![limit as i64, offset as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list mail: {e}")))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read mail list: {e}")))?
        {
            items.push(row_to_mail_item(&row)?);
        }
        Ok(items)
    }

    // ── Reply suggestions ───────────────────────────────────────────

    async fn insert_suggestion(&self, suggestion: &ReplySuggestion) -> Result<(), DatabaseError> {
        // Enforce at most one non-expired suggestion set per mail.
        self.conn()
            .execute(
                "UPDATE suggestions SET status = 'superseded'
                 WHERE mail_id = ?1 AND status = 'pending'",
                params![suggestion.mail_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("supersede suggestions: {e}")))?;

        let drafts = serde_json::to_string(&suggestion.drafts)
            .map_err(|e| DatabaseError::Serialization(format!("drafts: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO suggestions
                    (id, mail_id, drafts, status, selected_tone, edited, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    suggestion.id.to_string(),
                    suggestion.mail_id,
                    drafts,
                    suggestion.status.as_str(),
                    suggestion.selected_tone.map(|t| t.as_str()),
                    suggestion.edited as i64,
                    suggestion.created_at.to_rfc3339(),
                    suggestion.expires_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert suggestion: {e}")))?;
        Ok(())
    }

    async fn get_suggestion(&self, id: Uuid) -> Result<Option<ReplySuggestion>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get suggestion: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read suggestion: {e}")))?
        {
            Some(row) => Ok(Some(row_to_suggestion(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_pending_suggestion_for_mail(
        &self,
        mail_id: i64,
    ) -> Result<Option<ReplySuggestion>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SUGGESTION_COLUMNS} FROM suggestions
                     WHERE mail_id = ?1 AND status = 'pending'
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![mail_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get pending suggestion: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read pending suggestion: {e}")))?
        {
            Some(row) => Ok(Some(row_to_suggestion(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_suggestion_decision(
        &self,
        id: Uuid,
        status: SuggestionStatus,
        selected_tone: Option<Tone>,
        edited: bool,
    ) -> Result<(), DatabaseError> {
        // Conditional write: only a pending row takes a decision, so two
        // racing decisions cannot both succeed.
        let affected = self
            .conn()
            .execute(
                "UPDATE suggestions SET status = ?1, selected_tone = ?2, edited = ?3
                 WHERE id = ?4 AND status = 'pending'",
                params![
                    status.as_str(),
                    selected_tone.map(|t| t.as_str()),
                    edited as i64,
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update suggestion decision: {e}")))?;

        if affected == 0 {
            let mut rows = self
                .conn()
                .query(
                    "SELECT 1 FROM suggestions WHERE id = ?1",
                    params![id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("check suggestion: {e}")))?;
            return match rows
                .next()
                .await
                .map_err(|e| DatabaseError::Query(format!("check suggestion: {e}")))?
            {
                Some(_) => Err(DatabaseError::Constraint(format!(
                    "suggestion {id} is no longer pending"
                ))),
                None => Err(DatabaseError::NotFound {
                    entity: "suggestion".into(),
                    id: id.to_string(),
                }),
            };
        }
        Ok(())
    }

    // ── Sent records ────────────────────────────────────────────────

    async fn insert_sent_record(
        &self,
        mail_id: Option<i64>,
        recipient: &str,
        subject: &str,
        body: &str,
        status: SentStatus,
        error: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO sent_records
                    (mail_id, recipient, subject, body, status, error, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    mail_id,
                    recipient,
                    subject,
                    body,
                    status.as_str(),
                    error,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert sent record: {e}")))?;

        Ok(self.conn().last_insert_rowid())
    }

    async fn list_sent_records(&self, limit: usize) -> Result<Vec<SentRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, mail_id, recipient, subject, body, status, error, sent_at
                 FROM sent_records ORDER BY sent_at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list sent records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read sent records: {e}")))?
        {
            let get_err =
                |e: libsql::Error| DatabaseError::Query(format!("sent row read failed: {e}"));
            let status_str: String = row.get(5).map_err(get_err)?;
            let sent_str: String = row.get(7).map_err(get_err)?;
            records.push(SentRecord {
                id: row.get(0).map_err(get_err)?,
                mail_id: row.get(1).ok(),
                recipient: row.get(2).map_err(get_err)?,
                subject: row.get(3).map_err(get_err)?,
                body: row.get(4).map_err(get_err)?,
                status: SentStatus::parse(&status_str),
                error: row.get(6).ok(),
                sent_at: parse_datetime(&sent_str),
            });
        }
        Ok(records)
    }

    // ── Daily summaries ─────────────────────────────────────────────

    async fn upsert_daily_summary(
        &self,
        date: NaiveDate,
        summary: &str,
        item_count: i64,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO daily_summaries (summary_date, summary, item_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(summary_date) DO UPDATE SET
                    summary = excluded.summary,
                    item_count = excluded.item_count,
                    updated_at = excluded.updated_at",
                params![
                    date.to_string(),
                    summary,
                    item_count,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert daily summary: {e}")))?;
        Ok(())
    }

    async fn get_daily_summary(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT summary_date, summary, item_count, updated_at
                 FROM daily_summaries WHERE summary_date = ?1",
                params![date.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get daily summary: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read daily summary: {e}")))?
        {
            Some(row) => {
                let get_err =
                    |e: libsql::Error| DatabaseError::Query(format!("summary row: {e}"));
                let date_str: String = row.get(0).map_err(get_err)?;
                let updated_str: String = row.get(3).map_err(get_err)?;
                Ok(Some(DailySummary {
                    date: date_str.parse().map_err(|e| {
                        DatabaseError::Serialization(format!("summary_date: {e}"))
                    })?,
                    summary: row.get(1).map_err(get_err)?,
                    item_count: row.get(2).map_err(get_err)?,
                    updated_at: parse_datetime(&updated_str),
                }))
            }
            None => Ok(None),
        }
    }

    // ── Runs ────────────────────────────────────────────────────────

    async fn save_run(&self, run: &Run) -> Result<(), DatabaseError> {
        let context = serde_json::to_string(&run.context)
            .map_err(|e| DatabaseError::Serialization(format!("run context: {e}")))?;
        let errors = serde_json::to_string(&run.errors)
            .map_err(|e| DatabaseError::Serialization(format!("run errors: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO runs
                    (id, task, current_step, status, context, errors, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    current_step = excluded.current_step,
                    status = excluded.status,
                    context = excluded.context,
                    errors = excluded.errors,
                    updated_at = excluded.updated_at",
                params![
                    run.id.to_string(),
                    run.task.as_str(),
                    run.current_step.as_str(),
                    run.status.as_str(),
                    context,
                    errors,
                    run.created_at.to_rfc3339(),
                    run.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save run: {e}")))?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, task, current_step, status, context, errors, created_at, updated_at
                 FROM runs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get run: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("read run: {e}")))?
        {
            Some(row) => {
                let get_err = |e: libsql::Error| DatabaseError::Query(format!("run row: {e}"));
                let id_str: String = row.get(0).map_err(get_err)?;
                let task_str: String = row.get(1).map_err(get_err)?;
                let status_str: String = row.get(3).map_err(get_err)?;
                let context_json: String = row.get(4).map_err(get_err)?;
                let errors_json: String = row.get(5).map_err(get_err)?;
                let created_str: String = row.get(6).map_err(get_err)?;
                let updated_str: String = row.get(7).map_err(get_err)?;

                Ok(Some(Run {
                    id: Uuid::parse_str(&id_str)
                        .map_err(|e| DatabaseError::Serialization(format!("run id: {e}")))?,
                    task: TaskKind::parse(&task_str).ok_or_else(|| {
                        DatabaseError::Serialization(format!("unknown task kind '{task_str}'"))
                    })?,
                    current_step: row.get(2).map_err(get_err)?,
                    status: RunStatus::parse(&status_str),
                    context: serde_json::from_str(&context_json)
                        .map_err(|e| DatabaseError::Serialization(format!("run context: {e}")))?,
                    errors: serde_json::from_str(&errors_json)
                        .map_err(|e| DatabaseError::Serialization(format!("run errors: {e}")))?,
                    created_at: parse_datetime(&created_str),
                    updated_at: parse_datetime(&updated_str),
                }))
            }
            None => Ok(None),
        }
    }
}
