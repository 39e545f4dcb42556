//! Copilot Engine
//!
//! One invocation = one persisted `CopilotRun`:
//!
//! 1. Extract a device reference from the task
//! 2. Look up the latest telemetry sample for it
//! 3. Rule baseline and knowledge retrieval, concurrently
//! 4. Model call (bounded by timeout and the caller's cancellation token)
//! 5. Validate the model text and merge with the baseline
//! 6. Append the run record
//!
//! Only step 6 can fail the invocation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use avops_common::{
    extract_device_id, finalize, parse_model_output, rule_based_diagnosis, AvopsError,
    CopilotRun, InputContext, NewCopilotRun, RunStatus, TelemetrySample, DEFAULT_TOP_K,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::collaborators::{KnowledgeSource, RunSink, TelemetrySource};
use super::llm_trait::{ModelError, ModelInvoker};
use super::prompts::{build_user_payload, SYSTEM_PROMPT};
use super::retrieval::retrieve;

/// Tunables for one engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Knowledge hits passed to the model
    pub top_k: usize,
    /// Upper bound on a single model call
    pub model_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            model_timeout: Duration::from_secs(60),
        }
    }
}

/// Diagnostic copilot orchestrator
pub struct CopilotEngine {
    telemetry: Arc<dyn TelemetrySource>,
    knowledge: Arc<dyn KnowledgeSource>,
    model: Arc<dyn ModelInvoker>,
    runs: Arc<dyn RunSink>,
    settings: EngineSettings,
}

impl CopilotEngine {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        knowledge: Arc<dyn KnowledgeSource>,
        model: Arc<dyn ModelInvoker>,
        runs: Arc<dyn RunSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            telemetry,
            knowledge,
            model,
            runs,
            settings,
        }
    }

    /// Run the pipeline with no external cancellation
    pub async fn run(&self, user_id: i64, task: &str) -> Result<CopilotRun, AvopsError> {
        self.run_with_cancel(user_id, task, CancellationToken::new()).await
    }

    /// Run the pipeline; cancelling `cancel` abandons the model call but the
    /// run is still persisted, with status `cancelled`.
    pub async fn run_with_cancel(
        &self,
        user_id: i64,
        task: &str,
        cancel: CancellationToken,
    ) -> Result<CopilotRun, AvopsError> {
        let start = Instant::now();

        let device_id = extract_device_id(task);
        debug!("Extracted device reference: {:?}", device_id);

        let latest = match &device_id {
            Some(id) => self.lookup(id).await,
            None => None,
        };

        let kb_query = retrieval_text(task, latest.as_ref());
        let (baseline, hits) = tokio::join!(
            async { rule_based_diagnosis(latest.as_ref()) },
            retrieve(self.knowledge.as_ref(), &kb_query, self.settings.top_k),
        );
        debug!(
            "Baseline has {} statements, retrieval returned {} hits",
            baseline.diagnosis.len(),
            hits.len()
        );

        let payload = build_user_payload(task, latest.as_ref(), &baseline, &hits);
        let mut cancelled = false;
        let model_bundle = match self.invoke_model(&payload, &cancel).await {
            Ok(text) => {
                let parsed = parse_model_output(&text);
                if parsed.is_none() {
                    warn!(
                        "Model {} returned no usable JSON, using rule-based fallback",
                        self.model.model_name()
                    );
                }
                parsed
            }
            Err(ModelError::Cancelled) => {
                warn!("Run cancelled during model call, using rule-based fallback");
                cancelled = true;
                None
            }
            Err(e) => {
                warn!("Model call failed, using rule-based fallback: {}", e);
                None
            }
        };

        // Cancelled only when the model call itself was abandoned
        let status = if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Success
        };

        let output = finalize(model_bundle, baseline, hits);
        let record = NewCopilotRun {
            user_id,
            task: task.to_string(),
            input_context: InputContext {
                device_id,
                latest_telemetry: latest,
            },
            output,
            status,
        };

        let run = self.runs.append_run(record).await.map_err(|e| {
            error!("Failed to persist copilot run: {:#}", e);
            AvopsError::Persistence(format!("{:#}", e))
        })?;

        info!(
            "Copilot run {} for user {} finished in {}ms (origin: {}, status: {})",
            run.id,
            user_id,
            start.elapsed().as_millis(),
            run.output.origin.as_str(),
            run.status.as_str()
        );
        Ok(run)
    }

    /// Latest sample, with storage errors downgraded to a miss
    async fn lookup(&self, device_id: &str) -> Option<TelemetrySample> {
        match self.telemetry.latest_for_device(device_id).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Telemetry lookup for {} failed: {:#}", device_id, e);
                None
            }
        }
    }

    async fn invoke_model(
        &self,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ModelError> {
        let limit = self.settings.model_timeout;
        let call = tokio::time::timeout(limit, self.model.invoke(SYSTEM_PROMPT, payload));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ModelError::Cancelled),
            result = call => match result {
                Ok(reply) => reply,
                Err(_) => Err(ModelError::Timeout(limit.as_secs())),
            },
        }
    }
}

/// Task text plus the sample's error code, when there is one
fn retrieval_text(task: &str, latest: Option<&TelemetrySample>) -> String {
    match latest.and_then(|s| s.error_code.as_deref()) {
        Some(code) => format!("{} {}", task, code).trim().to_string(),
        None => task.trim().to_string(),
    }
}
