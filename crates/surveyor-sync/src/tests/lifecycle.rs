//! Answering, finalizing, and amending against in-memory stores.

use std::sync::atomic::Ordering;

use serde_json::json;
use surveyor_core::{
  Collection, Document,
  depends::Comparison,
  response::{AnswerValue, CaseRef, RecordPatch},
  store::{DocumentStore, FieldQuery, WriteStatus},
  survey::Question,
};

use super::{FaultyStore, question, sqlite, view_of};
use crate::{
  Error,
  lifecycle::{LifecycleOptions, ResponseManager},
};

struct Fixture {
  manager:   ResponseManager<FaultyStore>,
  working:   FaultyStore,
  finalized: FaultyStore,
}

async fn fixture(questions: Vec<Question>) -> Fixture {
  let store = sqlite().await;
  let working = FaultyStore::new(store.collection(Collection::Responses));
  let finalized = FaultyStore::new(store.collection(Collection::Finalized));
  let manager = ResponseManager::new(
    working.clone(),
    finalized.clone(),
    view_of(questions),
    LifecycleOptions::default(),
  );
  Fixture { manager, working, finalized }
}

fn survey() -> Vec<Question> {
  let mut required = question("Q3", 3, None);
  required.required = true;
  vec![
    question("Q1", 1, None),
    question("Q2", 2, Some("Q1=3")),
    required,
    question("Q4", 4, None),
  ]
}

fn text(v: &str) -> AnswerValue { AnswerValue::Text(v.into()) }

// ─── Answering ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn answer_writes_draft_with_question_metadata() {
  let f = fixture(survey()).await;
  let response = f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap();
  assert_eq!(response.index, 1);
  assert_eq!(response.organization, "Mercy");

  let doc = f.working.get("c1_Q1").await.unwrap().unwrap();
  assert_eq!(doc.str_field("CaseID"), Some("c1"));
  assert_eq!(doc.str_field("Program"), Some("PT"));
}

#[tokio::test]
async fn reanswering_keeps_response_id() {
  let f = fixture(survey()).await;
  let case = CaseRef::new("c1").with_parent("household-7");
  let first = f.manager.answer(&case, "Q1", text("3")).await.unwrap();
  let second = f.manager.answer(&case, "Q1", text("4")).await.unwrap();

  assert_eq!(first.response_id, second.response_id);
  assert_eq!(second.parent_case_id.as_deref(), Some("household-7"));
  let doc = f.working.get("c1_Q1").await.unwrap().unwrap();
  assert_eq!(doc.rev.unwrap().generation(), 2);
}

#[tokio::test]
async fn empty_required_answer_is_rejected_without_writing() {
  let f = fixture(survey()).await;
  let err = f.manager.answer(&"c1".into(), "Q3", text("")).await.unwrap_err();
  assert!(matches!(err, Error::Validation { ref question_id } if question_id == "Q3"));

  let err = f
    .manager
    .answer(&"c1".into(), "Q3", AnswerValue::MultiChoice(vec![]))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation { .. }));

  assert!(f.working.all_docs().await.unwrap().is_empty());
  assert_eq!(f.working.faults.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_question_is_rejected() {
  let f = fixture(survey()).await;
  let err = f.manager.answer(&"c1".into(), "Q99", text("x")).await.unwrap_err();
  assert!(matches!(err, Error::UnknownQuestion(ref id) if id == "Q99"));
}

#[tokio::test]
async fn conflicts_are_retried_after_rereading() {
  let f = fixture(survey()).await;
  f.working.faults.conflict_puts(3);

  f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap();
  assert_eq!(f.working.faults.puts.load(Ordering::SeqCst), 4);
  assert!(f.working.get("c1_Q1").await.unwrap().is_some());
}

#[tokio::test]
async fn persistent_conflict_becomes_persistence_error() {
  let f = fixture(survey()).await;
  f.working.faults.conflict_puts(4);

  let err = f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap_err();
  assert!(matches!(err, Error::Persistence { attempts: 4, .. }), "{err:?}");
  assert!(f.working.get("c1_Q1").await.unwrap().is_none());
}

#[tokio::test]
async fn rejected_write_is_not_retried() {
  let f = fixture(survey()).await;
  f.working.faults.force_put("c1_Q1", WriteStatus::Failed {
    status: Some(403),
    reason: "forbidden".into(),
  });

  let err = f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap_err();
  assert!(matches!(err, Error::Persistence { attempts: 1, ref reason, .. } if reason == "forbidden"));
  assert_eq!(f.working.faults.puts.load(Ordering::SeqCst), 1);
}

// ─── Navigation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn dependency_decides_next_question() {
  let f = fixture(survey()).await;
  let case: CaseRef = "c1".into();

  f.manager.answer(&case, "Q1", text("3")).await.unwrap();
  let next = f.manager.next_question("c1", Some("Q1")).await.unwrap();
  assert_eq!(next.unwrap().question_id, "Q2");

  f.manager.answer(&case, "Q1", text("4")).await.unwrap();
  let next = f.manager.next_question("c1", Some("Q1")).await.unwrap();
  assert_eq!(next.unwrap().question_id, "Q3");

  let other = f.manager.next_question("c2", Some("Q1")).await.unwrap();
  assert_eq!(other.unwrap().question_id, "Q3", "unanswered dependency fails");
}

#[tokio::test]
async fn numeric_mode_is_opt_in() {
  let store = sqlite().await;
  let questions = vec![question("Q1", 1, None), question("Q2", 2, Some("Q1 > 9"))];
  let build = |comparison| {
    ResponseManager::new(
      FaultyStore::new(store.collection(Collection::Responses)),
      FaultyStore::new(store.collection(Collection::Finalized)),
      view_of(questions.clone()),
      LifecycleOptions { comparison, ..LifecycleOptions::default() },
    )
  };
  let verbatim = build(Comparison::Verbatim);
  let numeric = build(Comparison::NumericAware);

  verbatim.answer(&"c1".into(), "Q1", text("10")).await.unwrap();
  assert!(verbatim.next_question("c1", Some("Q1")).await.unwrap().is_none());
  let next = numeric.next_question("c1", Some("Q1")).await.unwrap();
  assert_eq!(next.unwrap().question_id, "Q2");
}

#[tokio::test]
async fn advance_moves_the_cursor() {
  let f = fixture(survey()).await;
  f.manager.answer(&"c1".into(), "Q1", text("4")).await.unwrap();

  assert_eq!(f.manager.advance("c1").await.unwrap().unwrap().question_id, "Q1");
  assert_eq!(f.manager.advance("c1").await.unwrap().unwrap().question_id, "Q3");
  assert_eq!(f.manager.current_question().await.unwrap().question_id, "Q3");
  assert_eq!(f.manager.advance("c1").await.unwrap().unwrap().question_id, "Q4");
  assert!(f.manager.advance("c1").await.unwrap().is_none());
  assert_eq!(f.manager.current_question().await.unwrap().question_id, "Q4");
}

#[tokio::test]
async fn drafts_of_different_cases_never_share_a_document() {
  let mut questions = survey();
  questions.push(question("b_Q1", 5, None));
  let f = fixture(questions).await;
  f.manager.answer(&"a_b".into(), "Q1", text("first")).await.unwrap();
  f.manager.answer(&"a".into(), "b_Q1", text("second")).await.unwrap();

  for case in ["a_b", "a"] {
    let drafts = f.working.find(&FieldQuery::new().eq("CaseID", case)).await.unwrap();
    assert_eq!(drafts.len(), 1, "{case}");
  }
}

#[tokio::test]
async fn answer_does_not_overwrite_a_foreign_document() {
  let f = fixture(survey()).await;
  let mut foreign = Document::new("c1_Q1");
  foreign.fields.insert("CaseID".into(), json!("c9"));
  foreign.fields.insert("QuestionID".into(), json!("Q1"));
  f.working.put(foreign).await.unwrap();

  let err = f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap_err();
  assert!(matches!(err, Error::DraftMismatch { ref id, ref case_id, .. }
    if id == "c1_Q1" && case_id.as_deref() == Some("c9")));
  let doc = f.working.get("c1_Q1").await.unwrap().unwrap();
  assert_eq!(doc.str_field("CaseID"), Some("c9"));
}

// ─── Finalizing ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn finalize_bundles_drafts_and_removes_them() {
  let f = fixture(survey()).await;
  let c1: CaseRef = "c1".into();
  f.manager.answer(&c1, "Q3", text("yes")).await.unwrap();
  f.manager.answer(&c1, "Q1", text("3")).await.unwrap();
  f.manager
    .answer_file(&c1, "Q4", "photo.jpg", "image/jpeg", b"jpeg bytes")
    .await
    .unwrap();
  f.manager.answer(&"c2".into(), "Q1", text("4")).await.unwrap();

  let report = f.manager.finalize("c1").await.unwrap();
  assert_eq!(report.responses, 3);
  assert_eq!(report.drafts_total, 3);
  assert_eq!(report.drafts_removed, 3);
  assert_eq!(report.revision.as_ref().unwrap().generation(), 1);

  let record = f.manager.record("c1").await.unwrap().unwrap();
  let order: Vec<_> = record.responses.iter().map(|r| r.question_id.as_str()).collect();
  assert_eq!(order, ["Q1", "Q3", "Q4"]);
  assert_eq!(record.organization, "Mercy");

  let doc = f.finalized.get("c1").await.unwrap().unwrap();
  let photo = doc.attachments.get("Q4/photo.jpg").expect("attachment carried over");
  assert_eq!(photo.bytes().unwrap(), b"jpeg bytes");

  let left = f.working.find(&FieldQuery::new().eq("CaseID", "c1")).await.unwrap();
  assert!(left.is_empty());
  assert!(f.working.get("c2_Q1").await.unwrap().is_some());
}

#[tokio::test]
async fn finalize_keeps_drafts_it_cannot_read() {
  let f = fixture(survey()).await;
  f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap();
  let mut legacy = Document::new("c1_legacy");
  legacy.fields.insert("CaseID".into(), json!("c1"));
  legacy.fields.insert("Answer".into(), json!("free-form legacy value"));
  f.working.put(legacy).await.unwrap();

  let report = f.manager.finalize("c1").await.unwrap();
  assert_eq!(report.responses, 1);
  assert_eq!(report.drafts_total, 2);
  assert_eq!(report.drafts_removed, 1);
  assert_eq!(report.unreadable, ["c1_legacy"]);
  assert!(f.working.get("c1_Q1").await.unwrap().is_none());
  assert!(f.working.get("c1_legacy").await.unwrap().is_some());

  let again = f.manager.finalize("c1").await.unwrap();
  assert!(again.is_noop());
  assert_eq!(again.drafts_total, 1);
  assert!(f.working.get("c1_legacy").await.unwrap().is_some());
  let record = f.manager.record("c1").await.unwrap().unwrap();
  assert_eq!(record.responses.len(), 1);
}

#[tokio::test]
async fn finalize_twice_is_a_noop() {
  let f = fixture(survey()).await;
  f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap();
  f.manager.finalize("c1").await.unwrap();

  let again = f.manager.finalize("c1").await.unwrap();
  assert!(again.is_noop());
  assert_eq!(again.drafts_total, 0);
  let doc = f.finalized.get("c1").await.unwrap().unwrap();
  assert_eq!(doc.rev.unwrap().generation(), 1);
}

#[tokio::test]
async fn refinalizing_keeps_notes() {
  let f = fixture(survey()).await;
  let c1: CaseRef = "c1".into();
  f.manager.answer(&c1, "Q1", text("3")).await.unwrap();
  f.manager.finalize("c1").await.unwrap();
  f.manager
    .update("c1", RecordPatch::AppendNote("called back".into()))
    .await
    .unwrap();

  f.manager.answer(&c1, "Q1", text("4")).await.unwrap();
  let report = f.manager.finalize("c1").await.unwrap();
  assert_eq!(report.revision.unwrap().generation(), 3);

  let record = f.manager.record("c1").await.unwrap().unwrap();
  assert_eq!(record.notes.len(), 1);
  assert_eq!(record.notes[0].text, "called back");
  assert_eq!(record.responses[0].answer, text("4"));
}

#[tokio::test]
async fn draft_tombstones_keep_routing_fields() {
  let f = fixture(survey()).await;
  f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap();
  f.manager.finalize("c1").await.unwrap();

  let batch = f
    .working
    .inner
    .changes(&surveyor_core::store::ChangesRequest {
      since:  surveyor_core::store::SEQ_START.into(),
      limit:  10,
      filter: None,
    })
    .await
    .unwrap();
  let tombstone = batch.docs.iter().find(|d| d.id == "c1_Q1").unwrap();
  assert!(tombstone.deleted);
  assert_eq!(tombstone.str_field("Organization"), Some("Mercy"));
  assert_eq!(tombstone.str_field("CaseID"), Some("c1"));
}

// ─── Amending ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_applies_patches() {
  let f = fixture(survey()).await;
  f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap();
  f.manager.finalize("c1").await.unwrap();

  let fix = RecordPatch::CorrectAnswer { question_id: "Q1".into(), value: text("5") };
  f.manager.update("c1", fix).await.unwrap();
  f.manager
    .update("c1", RecordPatch::SetLocation(serde_json::json!({ "type": "Point" })))
    .await
    .unwrap();

  let record = f.manager.record("c1").await.unwrap().unwrap();
  assert_eq!(record.responses[0].answer, text("5"));
  assert!(record.location.is_some());

  let missing = RecordPatch::CorrectAnswer { question_id: "Q9".into(), value: text("x") };
  let err = f.manager.update("c1", missing).await.unwrap_err();
  assert!(matches!(err, Error::UnknownQuestion(ref q) if q == "Q9"));

  let err = f
    .manager
    .update("nope", RecordPatch::AppendNote("x".into()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn update_retries_conflicts() {
  let f = fixture(survey()).await;
  f.manager.answer(&"c1".into(), "Q1", text("3")).await.unwrap();
  f.manager.finalize("c1").await.unwrap();
  f.finalized.faults.conflict_puts(2);

  f.manager
    .update("c1", RecordPatch::AppendNote("late".into()))
    .await
    .unwrap();
  let record = f.manager.record("c1").await.unwrap().unwrap();
  assert_eq!(record.notes.len(), 1);
}
