//! End-to-end flow tests: fetch → classify → draft → approve → send,
//! against an in-memory store and a scripted capability client.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use mailflow::approval::ApprovalGate;
use mailflow::capability::{
    Capability, CapabilityClient, CapabilityRequest, CapabilityResponse, DraftResponse,
    FetchResponse, FetchedMail, SendResponse, SummarizeResponse,
};
use mailflow::config::EngineConfig;
use mailflow::engine::{Orchestrator, RetryPolicy, RunStatus};
use mailflow::error::{ApprovalError, CapabilityError, Error};
use mailflow::model::{SentStatus, SuggestionStatus, Tone};
use mailflow::store::LibSqlStore;

/// Scripted webhook host: every mail gets the importance score configured
/// for its position, drafts succeed unless their tone is listed as failing.
struct ScriptedHost {
    scores: Vec<i64>,
    failing_tones: HashSet<Tone>,
    send_calls: AtomicU32,
    classify_calls: AtomicU32,
}

impl ScriptedHost {
    fn new(scores: &[i64]) -> Self {
        Self {
            scores: scores.to_vec(),
            failing_tones: HashSet::new(),
            send_calls: AtomicU32::new(0),
            classify_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CapabilityClient for ScriptedHost {
    async fn invoke(
        &self,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse, CapabilityError> {
        match request {
            CapabilityRequest::Fetch(_) => {
                let items: Vec<FetchedMail> = self
                    .scores
                    .iter()
                    .enumerate()
                    .map(|(i, _)| FetchedMail {
                        uid: format!("imap-{i}"),
                        subject: format!("Subject {i}"),
                        sender: format!("person{i}@example.com"),
                        body: format!("Body of mail {i}"),
                        received_at: Utc::now(),
                    })
                    .collect();
                Ok(CapabilityResponse::Fetch(FetchResponse {
                    new_count: items.len(),
                    items,
                }))
            }
            CapabilityRequest::Classify(req) => {
                self.classify_calls.fetch_add(1, Ordering::SeqCst);
                // item_id is 1-based row id in insertion order.
                let score = self
                    .scores
                    .get((req.item_id - 1) as usize)
                    .copied()
                    .unwrap_or(0);
                Ok(CapabilityResponse::Classify(serde_json::json!({
                    "email_type": "personal",
                    "importance_score": score,
                    "needs_reply": true,
                    "sentiment": "neutral",
                    "key_points": ["a point"]
                })))
            }
            CapabilityRequest::Summarize(req) => {
                Ok(CapabilityResponse::Summarize(SummarizeResponse {
                    summary: format!("Digest for {}", req.summary_date),
                    email_count: self.scores.len() as i64,
                }))
            }
            CapabilityRequest::DraftReply(req) => {
                if self.failing_tones.contains(&req.tone) {
                    return Err(CapabilityError::Rejected {
                        capability: Capability::DraftReply,
                        message: "prompt failed".into(),
                    });
                }
                Ok(CapabilityResponse::Draft(DraftResponse {
                    tone: req.tone,
                    text: format!("{} draft for item {}", req.tone, req.item_id),
                }))
            }
            CapabilityRequest::Send(_) => {
                self.send_calls.fetch_add(1, Ordering::SeqCst);
                Ok(CapabilityResponse::Send(SendResponse {
                    success: true,
                    sent_id: Some(format!("out-{}", self.send_calls.load(Ordering::SeqCst))),
                }))
            }
        }
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
        ..EngineConfig::default()
    }
}

async fn setup(host: ScriptedHost, config: EngineConfig) -> (Arc<Orchestrator>, ApprovalGate) {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let engine = Arc::new(Orchestrator::new(store, Arc::new(host), config));
    let gate = ApprovalGate::new(Arc::clone(&engine));
    (engine, gate)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 27).unwrap()
}

#[tokio::test]
async fn full_pipeline_to_approved_send() {
    let (engine, gate) = setup(ScriptedHost::new(&[9, 2, 5, 8, 3]), fast_config()).await;

    let run = engine.process_new_mail(today()).await.unwrap();
    assert_eq!(run.status, RunStatus::WaitingApproval);
    assert_eq!(run.context["classified"]["important_count"], 2);
    assert_eq!(run.context["drafted"]["suggestion_count"], 2);

    // Every item is stored and classified.
    let mail = engine.store().list_mail(10, 0, true).await.unwrap();
    assert_eq!(mail.len(), 5);

    // Approve the suggestion for the score-9 item (row id 1).
    let suggestion = engine
        .store()
        .get_pending_suggestion_for_mail(1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(suggestion.drafts.len(), 3);

    let send_run = gate
        .approve(suggestion.id, Tone::Formal, None)
        .await
        .unwrap();
    assert_eq!(send_run.status, RunStatus::Done);

    // Exactly one sent record, reply goes back to the original sender.
    let records = engine.store().list_sent_records(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, SentStatus::Sent);
    assert_eq!(records[0].recipient, "person0@example.com");
    assert_eq!(records[0].subject, "Re: Subject 0");
    assert_eq!(records[0].body, "formal draft for item 1");

    let item = engine.store().get_mail_item(1).await.unwrap().unwrap();
    assert!(item.is_replied);

    // The suggestion carries the decision.
    let decided = gate.get(suggestion.id).await.unwrap();
    assert_eq!(decided.status, SuggestionStatus::Approved);
    assert_eq!(decided.selected_tone, Some(Tone::Formal));
}

#[tokio::test]
async fn second_approval_is_rejected_without_second_send() {
    let host = ScriptedHost::new(&[8]);
    let (engine, gate) = setup(host, fast_config()).await;
    engine.process_new_mail(today()).await.unwrap();

    let suggestion = engine
        .store()
        .get_pending_suggestion_for_mail(1)
        .await
        .unwrap()
        .unwrap();

    gate.approve(suggestion.id, Tone::Brief, None).await.unwrap();
    let err = gate.approve(suggestion.id, Tone::Brief, None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Approval(ApprovalError::AlreadyDecided { .. })
    ));

    // One decision, one send.
    assert_eq!(engine.store().list_sent_records(10).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_approvals_send_exactly_once() {
    let (engine, gate) = setup(ScriptedHost::new(&[8]), fast_config()).await;
    engine.process_new_mail(today()).await.unwrap();

    let suggestion = engine
        .store()
        .get_pending_suggestion_for_mail(1)
        .await
        .unwrap()
        .unwrap();

    // Release both approvals at the same instant.
    let gate = Arc::new(gate);
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let gate = Arc::clone(&gate);
        let barrier = Arc::clone(&barrier);
        let id = suggestion.id;
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            gate.approve(id, Tone::Brief, None).await
        }));
    }

    let mut approved = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(run) => {
                assert_eq!(run.status, RunStatus::Done);
                approved += 1;
            }
            Err(Error::Approval(ApprovalError::AlreadyDecided { .. })) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(conflicts, 1);

    // One decision, one delivery.
    assert_eq!(engine.store().list_sent_records(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn approve_with_edited_body_sends_the_edit() {
    let (engine, gate) = setup(ScriptedHost::new(&[9]), fast_config()).await;
    engine.process_new_mail(today()).await.unwrap();

    let suggestion = engine
        .store()
        .get_pending_suggestion_for_mail(1)
        .await
        .unwrap()
        .unwrap();

    gate.approve(suggestion.id, Tone::Casual, Some("Actually, Thursday.".into()))
        .await
        .unwrap();

    let records = engine.store().list_sent_records(10).await.unwrap();
    assert_eq!(records[0].body, "Actually, Thursday.");

    let decided = gate.get(suggestion.id).await.unwrap();
    assert!(decided.edited);
}

#[tokio::test]
async fn reject_sends_nothing() {
    let (engine, gate) = setup(ScriptedHost::new(&[9]), fast_config()).await;
    engine.process_new_mail(today()).await.unwrap();

    let suggestion = engine
        .store()
        .get_pending_suggestion_for_mail(1)
        .await
        .unwrap()
        .unwrap();

    gate.reject(suggestion.id).await.unwrap();
    assert!(engine.store().list_sent_records(10).await.unwrap().is_empty());

    let decided = gate.get(suggestion.id).await.unwrap();
    assert_eq!(decided.status, SuggestionStatus::Rejected);

    // Not replied, and no longer pending.
    let item = engine.store().get_mail_item(1).await.unwrap().unwrap();
    assert!(!item.is_replied);
    assert!(
        engine
            .store()
            .get_pending_suggestion_for_mail(1)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn expired_suggestion_cannot_be_approved() {
    let config = EngineConfig {
        suggestion_retention: chrono::Duration::seconds(-1),
        ..fast_config()
    };
    let (engine, gate) = setup(ScriptedHost::new(&[9]), config).await;
    engine.process_new_mail(today()).await.unwrap();

    let suggestion = engine
        .store()
        .get_pending_suggestion_for_mail(1)
        .await
        .unwrap()
        .unwrap();

    let err = gate.approve(suggestion.id, Tone::Formal, None).await.unwrap_err();
    assert!(matches!(err, Error::Approval(ApprovalError::Expired { .. })));
    assert!(engine.store().list_sent_records(10).await.unwrap().is_empty());

    // Expiry was persisted by the read path.
    let decided = gate.get(suggestion.id).await.unwrap();
    assert_eq!(decided.status, SuggestionStatus::Expired);
}

#[tokio::test]
async fn approving_missing_tone_fails() {
    let host = ScriptedHost {
        failing_tones: HashSet::from([Tone::Formal]),
        ..ScriptedHost::new(&[9])
    };
    let (engine, gate) = setup(host, fast_config()).await;
    engine.process_new_mail(today()).await.unwrap();

    let suggestion = engine
        .store()
        .get_pending_suggestion_for_mail(1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(suggestion.drafts.len(), 2);

    let err = gate.approve(suggestion.id, Tone::Formal, None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Approval(ApprovalError::MissingTone { .. })
    ));

    // Still pending: a bad tone choice must not consume the decision.
    let still = gate.get(suggestion.id).await.unwrap();
    assert_eq!(still.status, SuggestionStatus::Pending);
    gate.approve(suggestion.id, Tone::Brief, None).await.unwrap();
}

#[tokio::test]
async fn branch_boundary_is_inclusive_at_threshold() {
    let (engine, _) = setup(ScriptedHost::new(&[0, 4, 6, 7, 9, 10]), fast_config()).await;
    let run = engine.process_new_mail(today()).await.unwrap();

    // Default threshold 7: exactly 7, 9 and 10 cross it.
    assert_eq!(run.context["classified"]["important_count"], 3);
    assert_eq!(run.context["drafted"]["suggestion_count"], 3);

    for (mail_id, expect_suggestion) in
        [(1, false), (2, false), (3, false), (4, true), (5, true), (6, true)]
    {
        let pending = engine
            .store()
            .get_pending_suggestion_for_mail(mail_id)
            .await
            .unwrap();
        assert_eq!(pending.is_some(), expect_suggestion, "mail {mail_id}");
    }
}

#[tokio::test]
async fn refetching_the_same_mailbox_does_not_duplicate() {
    let (engine, _) = setup(ScriptedHost::new(&[2, 3, 4]), fast_config()).await;

    engine.process_new_mail(today()).await.unwrap();
    engine.process_new_mail(today()).await.unwrap();

    let mail = engine.store().list_mail(50, 0, false).await.unwrap();
    assert_eq!(mail.len(), 3);
}

#[tokio::test]
async fn daily_summary_reruns_overwrite_one_row() {
    let (engine, _) = setup(ScriptedHost::new(&[1, 2]), fast_config()).await;

    let first = engine.daily_summary(today()).await.unwrap();
    assert_eq!(first.status, RunStatus::Done);
    let second = engine.daily_summary(today()).await.unwrap();
    assert_eq!(second.status, RunStatus::Done);

    let summary = engine.store().get_daily_summary(today()).await.unwrap().unwrap();
    assert_eq!(summary.summary, "Digest for 2026-08-27");
    assert_eq!(summary.item_count, 2);
}

#[tokio::test]
async fn runs_are_inspectable_after_completion() {
    let (engine, _) = setup(ScriptedHost::new(&[9]), fast_config()).await;
    let run = engine.process_new_mail(today()).await.unwrap();

    let stored = engine.store().get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::WaitingApproval);
    assert_eq!(stored.current_step, "awaiting_approval");
    assert_eq!(stored.context["fetched"]["new_count"], 1);
}
