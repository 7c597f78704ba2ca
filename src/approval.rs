//! Approval gate — the only path from a drafted reply to an actual send.
//!
//! Decisions are one-shot: a suggestion moves from `pending` to exactly one
//! of `approved` or `rejected`, and a second decision fails loudly instead
//! of double-sending. Expiry is soft: pending suggestions past retention
//! flip to expired when read, never by a background timer.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::engine::{Orchestrator, Run};
use crate::error::{ApprovalError, DatabaseError, Error, Result};
use crate::model::{ReplySuggestion, SuggestionStatus, Tone};

pub struct ApprovalGate {
    engine: Arc<Orchestrator>,
}

impl ApprovalGate {
    pub fn new(engine: Arc<Orchestrator>) -> Self {
        Self { engine }
    }

    /// Fetch a suggestion, applying soft expiry.
    ///
    /// A pending suggestion past its retention window is persisted as
    /// expired before being returned.
    pub async fn get(&self, id: Uuid) -> Result<ReplySuggestion> {
        let store = self.engine.store();
        let mut suggestion = store
            .get_suggestion(id)
            .await?
            .ok_or(ApprovalError::NotFound { id })?;

        if suggestion.status == SuggestionStatus::Pending && suggestion.is_expired() {
            match self.decide(id, SuggestionStatus::Expired, None, false).await {
                Ok(()) => {
                    suggestion.status = SuggestionStatus::Expired;
                    info!(suggestion_id = %id, "Suggestion expired");
                }
                // Lost a race against a concurrent decision; return what won.
                Err(Error::Approval(ApprovalError::AlreadyDecided { .. })) => {
                    suggestion = store
                        .get_suggestion(id)
                        .await?
                        .ok_or(ApprovalError::NotFound { id })?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(suggestion)
    }

    /// Write one decision. The store accepts it only while the suggestion is
    /// still pending, so of two racing decisions exactly one lands; the
    /// loser surfaces as `AlreadyDecided`.
    async fn decide(
        &self,
        id: Uuid,
        status: SuggestionStatus,
        selected_tone: Option<Tone>,
        edited: bool,
    ) -> Result<()> {
        match self
            .engine
            .store()
            .update_suggestion_decision(id, status, selected_tone, edited)
            .await
        {
            Ok(()) => Ok(()),
            Err(DatabaseError::Constraint(_)) => {
                let current = self
                    .engine
                    .store()
                    .get_suggestion(id)
                    .await?
                    .map(|s| s.status.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Err(ApprovalError::AlreadyDecided { id, status: current }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Approve one tone of a pending suggestion and trigger the send.
    ///
    /// The decision is recorded before the delivery call, so a concurrent
    /// second approval fails as already-decided rather than double-sending.
    /// `edited_body`, when given, replaces the stored draft text.
    pub async fn approve(
        &self,
        id: Uuid,
        tone: Tone,
        edited_body: Option<String>,
    ) -> Result<Run> {
        let store = self.engine.store();
        let suggestion = store
            .get_suggestion(id)
            .await?
            .ok_or(ApprovalError::NotFound { id })?;

        if suggestion.status != SuggestionStatus::Pending {
            return Err(ApprovalError::AlreadyDecided {
                id,
                status: suggestion.status.as_str().to_string(),
            }
            .into());
        }
        if suggestion.is_expired() {
            self.decide(id, SuggestionStatus::Expired, None, false).await?;
            return Err(ApprovalError::Expired { id }.into());
        }

        let draft = suggestion
            .drafts
            .get(&tone)
            .ok_or_else(|| ApprovalError::MissingTone {
                id,
                tone: tone.as_str().to_string(),
            })?
            .clone();

        let item = store
            .get_mail_item(suggestion.mail_id)
            .await?
            .ok_or_else(|| {
                Error::Database(crate::error::DatabaseError::NotFound {
                    entity: "mail_item".into(),
                    id: suggestion.mail_id.to_string(),
                })
            })?;

        let edited = edited_body.is_some();
        let body = edited_body.unwrap_or(draft);

        self.decide(id, SuggestionStatus::Approved, Some(tone), edited)
            .await?;
        info!(suggestion_id = %id, tone = %tone, edited, "Suggestion approved");

        let subject = reply_subject(&item.subject);
        self.engine
            .send_mail(Some(item.id), &item.sender, &subject, &body)
            .await
    }

    /// Reject a pending suggestion. No send happens; the decision is final.
    pub async fn reject(&self, id: Uuid) -> Result<()> {
        let store = self.engine.store();
        let suggestion = store
            .get_suggestion(id)
            .await?
            .ok_or(ApprovalError::NotFound { id })?;

        if suggestion.status != SuggestionStatus::Pending {
            return Err(ApprovalError::AlreadyDecided {
                id,
                status: suggestion.status.as_str().to_string(),
            }
            .into());
        }

        self.decide(id, SuggestionStatus::Rejected, None, false).await?;
        info!(suggestion_id = %id, "Suggestion rejected");
        Ok(())
    }
}

/// "Re: " prefix, added once.
fn reply_subject(subject: &str) -> String {
    if subject.trim_start().to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}
