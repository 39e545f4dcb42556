//! Deterministic Orchestration Tests
//!
//! Real SQLite storage in a temp dir, fake model and knowledge sources, no
//! network.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use avops_common::{
    AvopsError, BundleOrigin, CopilotDb, CopilotRun, KnowledgeIndex, NewCopilotRun,
    NewTelemetrySample, RetrievalHit, RunStatus, TelemetrySample, FALLBACK_NOTE,
};
use avopsd::orchestrator::{
    CopilotEngine, EngineSettings, FakeKnowledgeSource, FakeModelInvoker,
    FakeModelInvokerBuilder, KnowledgeSource, ModelError, ModelInvoker, RunSink,
    TelemetrySource, SYSTEM_PROMPT,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const MODEL_JSON: &str = "```json\n{\"diagnosis\":[\"Fan bearing failing\"],\"next_steps\":[\"Replace fan module\"],\"notes\":\"seen before\"}\n```";

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    db: CopilotDb,
    index: KnowledgeIndex,
    _temp_dir: TempDir,
}

async fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("avops.db");
    let db = CopilotDb::open_with_path(&path).await.unwrap();
    let index = KnowledgeIndex::open_with_path(&path).await.unwrap();
    index.seed_defaults().await.unwrap();
    Fixture {
        db,
        index,
        _temp_dir: temp_dir,
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        top_k: 5,
        model_timeout: Duration::from_secs(5),
    }
}

fn engine_with(fx: &Fixture, model: Arc<dyn ModelInvoker>) -> CopilotEngine {
    CopilotEngine::new(
        Arc::new(fx.db.clone()),
        Arc::new(fx.index.clone()),
        model,
        Arc::new(fx.db.clone()),
        settings(),
    )
}

async fn record_overheating(db: &CopilotDb) -> TelemetrySample {
    db.insert_telemetry(NewTelemetrySample {
        device_id: "device-001".to_string(),
        temperature: 75,
        packet_loss: 2,
        audio_dropouts: 1,
        error_code: None,
    })
    .await
    .unwrap()
}

struct FailingSink;

#[async_trait]
impl RunSink for FailingSink {
    async fn append_run(&self, _run: NewCopilotRun) -> Result<CopilotRun> {
        anyhow::bail!("database is locked")
    }
}

/// Answers normally, but the caller's token fires while it does
struct CancelledWhileAnswering {
    token: CancellationToken,
}

#[async_trait]
impl ModelInvoker for CancelledWhileAnswering {
    async fn invoke(&self, _system_prompt: &str, _user_payload: &str) -> Result<String, ModelError> {
        self.token.cancel();
        Ok(MODEL_JSON.to_string())
    }

    fn model_name(&self) -> &str {
        "late-cancel"
    }
}

struct FailingTelemetry;

#[async_trait]
impl TelemetrySource for FailingTelemetry {
    async fn latest_for_device(&self, _device_id: &str) -> Result<Option<TelemetrySample>> {
        anyhow::bail!("no such table: telemetry_events")
    }
}

// ============================================================================
// Fallback path
// ============================================================================

/// Overheating device, model down: rule-based bundle, still a success
#[tokio::test]
async fn test_model_unreachable_falls_back_to_rules() {
    let fx = fixture().await;
    let sample = record_overheating(&fx.db).await;
    let model = Arc::new(FakeModelInvoker::failing(ModelError::Http(
        "connection refused".to_string(),
    )));
    let engine = engine_with(&fx, model.clone());

    let run = engine.run(1, "diagnose device-001").await.unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.output.origin, BundleOrigin::RuleBased);
    assert_eq!(run.output.bundle.diagnosis, vec!["Device temperature is high."]);
    assert_eq!(
        run.output.bundle.next_steps,
        vec!["Ensure ventilation, check fan status, reduce load."]
    );
    assert_eq!(run.output.bundle.notes, FALLBACK_NOTE);
    assert_eq!(run.input_context.device_id.as_deref(), Some("device-001"));
    assert_eq!(run.input_context.latest_telemetry, Some(sample));
    assert_eq!(model.call_count(), 1);

    let stored = fx.db.get_run(run.id, 1).await.unwrap().unwrap();
    assert_eq!(stored, run);
}

#[tokio::test]
async fn test_invalid_model_output_falls_back() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let engine = engine_with(&fx, Arc::new(FakeModelInvoker::always("not json at all")));

    let run = engine.run(1, "diagnose device-001").await.unwrap();
    assert_eq!(run.output.origin, BundleOrigin::RuleBased);
    assert_eq!(run.output.bundle.notes, FALLBACK_NOTE);
}

#[tokio::test]
async fn test_wrong_shape_falls_back() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let engine = engine_with(
        &fx,
        Arc::new(FakeModelInvoker::always(r#"{"diagnosis": "hot", "next_steps": []}"#)),
    );

    let run = engine.run(1, "diagnose device-001").await.unwrap();
    assert_eq!(run.output.origin, BundleOrigin::RuleBased);
    assert_eq!(run.output.bundle.diagnosis, vec!["Device temperature is high."]);
}

#[tokio::test]
async fn test_unknown_device_uses_no_telemetry_baseline() {
    let fx = fixture().await;
    let engine = engine_with(&fx, Arc::new(FakeModelInvoker::failing(ModelError::Timeout(60))));

    let run = engine.run(1, "check device-404 please").await.unwrap();
    assert_eq!(run.input_context.device_id.as_deref(), Some("device-404"));
    assert!(run.input_context.latest_telemetry.is_none());
    assert_eq!(
        run.output.bundle.diagnosis,
        vec!["No telemetry found for referenced device."]
    );
}

#[tokio::test]
async fn test_telemetry_lookup_error_is_a_miss() {
    let fx = fixture().await;
    let engine = CopilotEngine::new(
        Arc::new(FailingTelemetry),
        Arc::new(fx.index.clone()),
        Arc::new(FakeModelInvoker::failing(ModelError::Http("refused".to_string()))),
        Arc::new(fx.db.clone()),
        settings(),
    );

    let run = engine.run(1, "diagnose device-001").await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.input_context.latest_telemetry.is_none());
    assert_eq!(
        run.output.bundle.next_steps,
        vec!["Ingest telemetry first, then rerun diagnosis."]
    );
}

#[tokio::test]
async fn test_model_timeout_falls_back() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let model = FakeModelInvokerBuilder::new()
        .default_reply(Ok(MODEL_JSON.to_string()))
        .delay(Duration::from_secs(2))
        .build();
    let engine = CopilotEngine::new(
        Arc::new(fx.db.clone()),
        Arc::new(fx.index.clone()),
        Arc::new(model),
        Arc::new(fx.db.clone()),
        EngineSettings {
            top_k: 5,
            model_timeout: Duration::from_millis(50),
        },
    );

    let run = engine.run(1, "diagnose device-001").await.unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.output.origin, BundleOrigin::RuleBased);
}

// ============================================================================
// Model path
// ============================================================================

#[tokio::test]
async fn test_valid_model_output_wins() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let model = Arc::new(FakeModelInvoker::always(MODEL_JSON));
    let engine = engine_with(&fx, model.clone());

    let run = engine.run(1, "diagnose device-001").await.unwrap();
    assert_eq!(run.output.origin, BundleOrigin::Model);
    assert_eq!(run.output.bundle.diagnosis, vec!["Fan bearing failing"]);
    assert_eq!(run.output.bundle.next_steps, vec!["Replace fan module"]);
    assert_eq!(run.output.bundle.notes, "seen before");

    // The model saw the rule baseline and the telemetry
    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].system_prompt, SYSTEM_PROMPT);
    let payload: serde_json::Value = serde_json::from_str(&prompts[0].user_payload).unwrap();
    assert_eq!(payload["task"], "diagnose device-001");
    assert_eq!(payload["telemetry"]["temperature"], 75);
    assert_eq!(payload["rule_based"]["diagnosis"][0], "Device temperature is high.");
}

#[tokio::test]
async fn test_identical_runs_are_distinct_records() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let engine = engine_with(&fx, Arc::new(FakeModelInvoker::always(MODEL_JSON)));

    let a = engine.run(1, "diagnose device-001").await.unwrap();
    let b = engine.run(1, "diagnose device-001").await.unwrap();

    assert_ne!(a.id, b.id);
    assert_ne!(a.created_at, b.created_at);
    assert_eq!(a.output.bundle, b.output.bundle);
    assert_eq!(fx.db.list_runs(1, 10, 0).await.unwrap().len(), 2);
}

// ============================================================================
// Retrieval
// ============================================================================

#[tokio::test]
async fn test_retrieval_hits_are_recorded() {
    let fx = fixture().await;
    let model = Arc::new(FakeModelInvoker::always(MODEL_JSON));
    let engine = engine_with(&fx, model.clone());

    let run = engine.run(1, "audio dropouts Dante").await.unwrap();
    assert!(run.input_context.device_id.is_none());
    assert!(run.output.used_retrieval);
    assert_eq!(run.output.sources.len(), 1);
    assert_eq!(
        run.output.sources[0].title,
        "Audio dropouts on Dante-enabled devices"
    );

    let payload: serde_json::Value =
        serde_json::from_str(&model.prompts()[0].user_payload).unwrap();
    assert_eq!(payload["kb_snippets"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_retrieval_failure_does_not_block_model() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let knowledge = Arc::new(FakeKnowledgeSource::failing());
    let model = Arc::new(FakeModelInvoker::always(MODEL_JSON));
    let engine = CopilotEngine::new(
        Arc::new(fx.db.clone()),
        knowledge.clone(),
        model.clone(),
        Arc::new(fx.db.clone()),
        settings(),
    );

    let run = engine.run(1, "diagnose device-001").await.unwrap();
    assert_eq!(knowledge.call_count(), 1);
    assert_eq!(model.call_count(), 1);
    assert!(!run.output.used_retrieval);
    assert_eq!(run.output.origin, BundleOrigin::Model);
}

#[tokio::test]
async fn test_punctuation_only_task_skips_retrieval() {
    let fx = fixture().await;
    let knowledge = Arc::new(FakeKnowledgeSource::with_hits(vec![RetrievalHit {
        id: 1,
        title: "unused".to_string(),
        source: None,
        snippet: String::new(),
    }]));
    let engine = CopilotEngine::new(
        Arc::new(fx.db.clone()),
        knowledge.clone(),
        Arc::new(FakeModelInvoker::always(MODEL_JSON)),
        Arc::new(fx.db.clone()),
        settings(),
    );

    let run = engine.run(1, "?!").await.unwrap();
    assert_eq!(knowledge.call_count(), 0);
    assert!(run.output.sources.is_empty());
}

#[tokio::test]
async fn test_knowledge_source_is_swappable() {
    let fx = fixture().await;
    let hits = vec![RetrievalHit {
        id: 9,
        title: "Projector lamp hours".to_string(),
        source: Some("Vendor KB".to_string()),
        snippet: "...[lamp]...".to_string(),
    }];
    let knowledge: Arc<dyn KnowledgeSource> = Arc::new(FakeKnowledgeSource::with_hits(hits.clone()));
    let engine = CopilotEngine::new(
        Arc::new(fx.db.clone()),
        knowledge,
        Arc::new(FakeModelInvoker::always("nope")),
        Arc::new(fx.db.clone()),
        settings(),
    );

    let run = engine.run(1, "lamp").await.unwrap();
    assert_eq!(run.output.sources, hits);
    assert!(run.output.used_retrieval);
}

// ============================================================================
// Persistence & cancellation
// ============================================================================

#[tokio::test]
async fn test_persistence_failure_is_surfaced() {
    let fx = fixture().await;
    let engine = CopilotEngine::new(
        Arc::new(fx.db.clone()),
        Arc::new(fx.index.clone()),
        Arc::new(FakeModelInvoker::always(MODEL_JSON)),
        Arc::new(FailingSink),
        settings(),
    );

    let err = engine.run(1, "diagnose device-001").await.unwrap_err();
    assert!(matches!(err, AvopsError::Persistence(ref msg) if msg.contains("database is locked")));
}

#[tokio::test]
async fn test_cancelled_before_model_is_persisted() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let engine = engine_with(&fx, Arc::new(FakeModelInvoker::always(MODEL_JSON)));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let run = engine
        .run_with_cancel(1, "diagnose device-001", cancel)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.output.origin, BundleOrigin::RuleBased);
    let stored = fx.db.get_run(run.id, 1).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_during_model_call() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let model = FakeModelInvokerBuilder::new()
        .default_reply(Ok(MODEL_JSON.to_string()))
        .delay(Duration::from_secs(30))
        .build();
    let engine = Arc::new(engine_with(&fx, Arc::new(model)));

    let cancel = CancellationToken::new();
    let handle = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            engine
                .run_with_cancel(1, "diagnose device-001", cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let run = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run should finish promptly after cancel")
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.output.bundle.diagnosis, vec!["Device temperature is high."]);
}

#[tokio::test]
async fn test_answer_that_beats_cancel_is_a_success() {
    let fx = fixture().await;
    record_overheating(&fx.db).await;
    let cancel = CancellationToken::new();
    let engine = engine_with(
        &fx,
        Arc::new(CancelledWhileAnswering {
            token: cancel.clone(),
        }),
    );

    let run = engine
        .run_with_cancel(1, "diagnose device-001", cancel.clone())
        .await
        .unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.output.origin, BundleOrigin::Model);
    assert_eq!(run.output.bundle.diagnosis, vec!["Fan bearing failing"]);
}
