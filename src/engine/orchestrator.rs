//! Orchestration engine — drives multi-step tasks over the remote
//! capabilities and the store.
//!
//! Each task executes as an explicit `Run` persisted after every step.
//! Capability calls get a per-call timeout and a bounded retry budget here,
//! in the engine, never in the adapters. Remote failures terminate the run
//! as `Failed` and are returned inside the `Run`; an `Err` from these
//! methods means the engine itself (store, infra) broke.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use crate::capability::{
    CapabilityClient, CapabilityRequest, ClassifyRequest, DraftRequest, FetchRequest,
    SendRequest, SummarizeRequest,
};
use crate::classify::{self, Classification};
use crate::config::EngineConfig;
use crate::engine::retry::call_with_retry;
use crate::engine::run::{Run, TaskKind};
use crate::error::{CapabilityError, Error, Result};
use crate::model::{MailItem, NewMailItem, ReplySuggestion, SentStatus, Tone};
use crate::store::Store;

pub struct Orchestrator {
    store: Arc<dyn Store>,
    client: Arc<dyn CapabilityClient>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn CapabilityClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// One logical capability call: per-call timeout, then the engine's
    /// retry budget on transient failures.
    async fn call(
        &self,
        request: CapabilityRequest,
    ) -> std::result::Result<crate::capability::CapabilityResponse, CapabilityError> {
        let capability = request.capability();
        let timeout = capability.timeout();
        call_with_retry(&self.config.retry, || {
            let request = request.clone();
            async move {
                match tokio::time::timeout(timeout, self.client.invoke(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(CapabilityError::Timeout {
                        capability,
                        timeout,
                    }),
                }
            }
        })
        .await
    }

    // ── Sync: fetch → classify → draft ──────────────────────────────

    /// Full inbound pipeline: fetch new mail since `since_date`, classify
    /// each item, and draft replies for the important ones.
    ///
    /// An empty fetch is a zero-work success. If any reply suggestions were
    /// created the run suspends at the approval gate.
    pub async fn process_new_mail(&self, since_date: NaiveDate) -> Result<Run> {
        let mut run = Run::new(TaskKind::Sync);
        run.start();
        self.store.save_run(&run).await?;
        info!(run_id = %run.id, %since_date, "Processing new mail");

        // Fetch
        let fetched = match self
            .call(CapabilityRequest::Fetch(FetchRequest { since_date }))
            .await
            .and_then(|r| r.into_fetch())
        {
            Ok(response) => response,
            Err(e) => {
                run.fail("fetching", e.to_string());
                self.store.save_run(&run).await?;
                return Ok(run);
            }
        };

        let mut mail_ids = Vec::with_capacity(fetched.items.len());
        for mail in &fetched.items {
            let id = self
                .store
                .upsert_mail_item(&NewMailItem {
                    original_uid: mail.uid.clone(),
                    subject: mail.subject.clone(),
                    sender: mail.sender.clone(),
                    body: mail.body.clone(),
                    received_at: mail.received_at,
                })
                .await?;
            mail_ids.push(id);
        }
        run.record_step(
            "fetched",
            json!({ "new_count": fetched.new_count, "stored": mail_ids.len() }),
        );
        self.store.save_run(&run).await?;

        if mail_ids.is_empty() {
            run.finish("fetched");
            self.store.save_run(&run).await?;
            info!(run_id = %run.id, "No new mail");
            return Ok(run);
        }

        // Classify each item. A failed classification degrades to the safe
        // default instead of aborting the whole run.
        let mut important = Vec::new();
        for &id in &mail_ids {
            let Some(item) = self.store.get_mail_item(id).await? else {
                continue;
            };
            let classification = self.classify_item(&mut run, &item).await;
            self.store.update_classification(id, &classification).await?;
            if classification.importance_score >= self.config.importance_threshold {
                important.push(id);
            }
        }
        run.record_step(
            "classified",
            json!({ "classified_count": mail_ids.len(), "important_count": important.len() }),
        );
        self.store.save_run(&run).await?;

        // Draft replies for important items.
        let mut suggestion_ids = Vec::new();
        for &id in &important {
            let Some(item) = self.store.get_mail_item(id).await? else {
                continue;
            };
            match self.create_suggestion(&mut run, &item).await? {
                Some(suggestion_id) => suggestion_ids.push(suggestion_id),
                None => {}
            }
        }
        run.record_step(
            "drafted",
            json!({ "suggestion_count": suggestion_ids.len(), "suggestion_ids": suggestion_ids }),
        );

        if suggestion_ids.is_empty() {
            run.finish("drafted");
        } else {
            run.await_approval();
        }
        self.store.save_run(&run).await?;
        info!(
            run_id = %run.id,
            status = run.status.as_str(),
            suggestions = suggestion_ids.len(),
            "Sync run complete"
        );
        Ok(run)
    }

    /// Classify one item, degrading to the safe default on remote failure.
    async fn classify_item(&self, run: &mut Run, item: &MailItem) -> Classification {
        let request = CapabilityRequest::Classify(ClassifyRequest {
            item_id: item.id,
            subject: item.subject.clone(),
            sender: item.sender.clone(),
            body: classify::truncate_body(&item.body),
        });
        match self.call(request).await.and_then(|r| r.into_classify()) {
            Ok(raw) => classify::parse_classification(&raw),
            Err(e) => {
                warn!(mail_id = item.id, error = %e, "Classification failed, using default");
                run.record_error(format!("classify mail {}: {e}", item.id));
                Classification::safe_default()
            }
        }
    }

    /// Fan out one draft call per tone concurrently and store the resulting
    /// suggestion set.
    ///
    /// Tones whose draft failed are absent from the set; only when all three
    /// fail is the item skipped (with a recorded error).
    async fn create_suggestion(
        &self,
        run: &mut Run,
        item: &MailItem,
    ) -> Result<Option<uuid::Uuid>> {
        let calls = Tone::ALL.map(|tone| {
            let request = CapabilityRequest::DraftReply(DraftRequest {
                item_id: item.id,
                tone,
                subject: item.subject.clone(),
                sender: item.sender.clone(),
                body: classify::truncate_body(&item.body),
            });
            async move { (tone, self.call(request).await.and_then(|r| r.into_draft())) }
        });
        let results = futures::future::join_all(calls).await;

        let mut drafts = BTreeMap::new();
        for (tone, result) in results {
            match result {
                Ok(draft) => {
                    drafts.insert(tone, draft.text);
                }
                Err(e) => {
                    warn!(mail_id = item.id, tone = %tone, error = %e, "Draft failed");
                    run.record_error(format!("draft {tone} for mail {}: {e}", item.id));
                }
            }
        }

        if drafts.is_empty() {
            return Ok(None);
        }

        let suggestion =
            ReplySuggestion::new(item.id, drafts, self.config.suggestion_retention);
        self.store.insert_suggestion(&suggestion).await?;
        Ok(Some(suggestion.id))
    }

    // ── Daily summary ───────────────────────────────────────────────

    /// Produce (or overwrite) the digest for one day.
    pub async fn daily_summary(&self, date: NaiveDate) -> Result<Run> {
        let mut run = Run::new(TaskKind::DailySummary);
        run.start();
        self.store.save_run(&run).await?;
        info!(run_id = %run.id, %date, "Building daily summary");

        let response = match self
            .call(CapabilityRequest::Summarize(SummarizeRequest {
                summary_date: date,
                item_ids: None,
            }))
            .await
            .and_then(|r| r.into_summarize())
        {
            Ok(response) => response,
            Err(e) => {
                run.fail("summarizing", e.to_string());
                self.store.save_run(&run).await?;
                return Ok(run);
            }
        };

        self.store
            .upsert_daily_summary(date, &response.summary, response.email_count)
            .await?;
        run.record_step(
            "summarized",
            json!({ "date": date, "email_count": response.email_count }),
        );
        run.finish("summarized");
        self.store.save_run(&run).await?;
        Ok(run)
    }

    // ── Analyze one item ────────────────────────────────────────────

    /// Re-classify one already-stored item.
    pub async fn analyze_item(&self, mail_id: i64) -> Result<Run> {
        let item = self
            .store
            .get_mail_item(mail_id)
            .await?
            .ok_or_else(|| {
                Error::Database(crate::error::DatabaseError::NotFound {
                    entity: "mail_item".into(),
                    id: mail_id.to_string(),
                })
            })?;

        let mut run = Run::new(TaskKind::Analyze);
        run.start();
        self.store.save_run(&run).await?;

        let request = CapabilityRequest::Classify(ClassifyRequest {
            item_id: item.id,
            subject: item.subject.clone(),
            sender: item.sender.clone(),
            body: classify::truncate_body(&item.body),
        });
        match self.call(request).await.and_then(|r| r.into_classify()) {
            Ok(raw) => {
                let classification = classify::parse_classification(&raw);
                self.store
                    .update_classification(mail_id, &classification)
                    .await?;
                run.record_step(
                    "classified",
                    json!({
                        "mail_id": mail_id,
                        "email_type": classification.email_type.as_str(),
                        "importance_score": classification.importance_score,
                    }),
                );
                run.finish("classified");
            }
            Err(e) => {
                run.fail("classifying", e.to_string());
            }
        }
        self.store.save_run(&run).await?;
        Ok(run)
    }

    // ── Re-draft replies ────────────────────────────────────────────

    /// Draft a fresh suggestion set for one item, superseding any pending
    /// set, and suspend at the approval gate.
    pub async fn draft_replies(&self, mail_id: i64) -> Result<Run> {
        let item = self
            .store
            .get_mail_item(mail_id)
            .await?
            .ok_or_else(|| {
                Error::Database(crate::error::DatabaseError::NotFound {
                    entity: "mail_item".into(),
                    id: mail_id.to_string(),
                })
            })?;

        let mut run = Run::new(TaskKind::Reply);
        run.start();
        self.store.save_run(&run).await?;

        match self.create_suggestion(&mut run, &item).await? {
            Some(suggestion_id) => {
                run.record_step(
                    "drafted",
                    json!({ "mail_id": mail_id, "suggestion_id": suggestion_id }),
                );
                run.await_approval();
            }
            None => {
                run.fail("drafting", format!("all draft calls failed for mail {mail_id}"));
            }
        }
        self.store.save_run(&run).await?;
        Ok(run)
    }

    // ── Send ────────────────────────────────────────────────────────

    /// Deliver one mail and record the outcome. Exactly one sent record is
    /// written per attempt, success or failure.
    pub async fn send_mail(
        &self,
        mail_id: Option<i64>,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<Run> {
        let mut run = Run::new(TaskKind::Send);
        run.start();
        self.store.save_run(&run).await?;

        let outcome = self
            .call(CapabilityRequest::Send(SendRequest {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            }))
            .await
            .and_then(|r| r.into_send());

        match outcome {
            Ok(response) if response.success => {
                self.store
                    .insert_sent_record(mail_id, to, subject, body, SentStatus::Sent, None)
                    .await?;
                if let Some(id) = mail_id {
                    self.store.mark_replied(id).await?;
                }
                run.record_step(
                    "sent",
                    json!({ "recipient": to, "sent_id": response.sent_id }),
                );
                run.finish("sent");
                info!(run_id = %run.id, recipient = to, "Mail sent");
            }
            Ok(_) => {
                // Delivery reported failure without an error payload.
                self.store
                    .insert_sent_record(
                        mail_id,
                        to,
                        subject,
                        body,
                        SentStatus::Failed,
                        Some("delivery reported failure"),
                    )
                    .await?;
                run.fail("sending", "delivery reported failure");
            }
            Err(e) => {
                self.store
                    .insert_sent_record(
                        mail_id,
                        to,
                        subject,
                        body,
                        SentStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
                run.fail("sending", e.to_string());
            }
        }
        self.store.save_run(&run).await?;
        Ok(run)
    }
}
