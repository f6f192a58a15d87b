//! Deterministic agent double for engine and server tests.
//!
//! [`ScriptedAgent`] produces shape-correct canned payloads for every stage,
//! records every call, and supports failure injection per task key. It lives
//! outside `#[cfg(test)]` so downstream crates can drive it from their own
//! integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hookline_types::{
    AwarenessLevel, BriefUnit, HookOption, HooklineError, ResearchFinding, Result, Scene, Stage,
    StagePayload, UnitKey,
};

use crate::{Agent, AgentRequest, AgentResponse};

/// How an injected failure behaves for one task key.
#[derive(Debug, Clone, Copy)]
enum FailureMode {
    /// Fail with a retryable error for the first `remaining` calls, then
    /// succeed.
    Retryable { remaining: usize },
    /// Fail every call with a non-retryable error.
    Terminal,
}

#[derive(Default)]
struct Script {
    failures: HashMap<String, FailureMode>,
    /// Task keys that block until cancelled instead of completing.
    hangs: Vec<String>,
}

/// Scripted agent: canned payloads, injected failures, full call recording.
pub struct ScriptedAgent {
    script: Mutex<Script>,
    delay: Duration,
    cost_per_call: f64,
    calls: AtomicUsize,
    call_log: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            delay: Duration::ZERO,
            cost_per_call: 0.001,
            calls: AtomicUsize::new(0),
            call_log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add a per-call delay so concurrency is observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cost_per_call(mut self, cost_usd: f64) -> Self {
        self.cost_per_call = cost_usd;
        self
    }

    /// Fail `task_key` with a retryable error for its first `times` calls.
    pub fn fail_retryable(&self, task_key: impl Into<String>, times: usize) {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert(task_key.into(), FailureMode::Retryable { remaining: times });
    }

    /// Fail `task_key` permanently.
    pub fn fail_terminal(&self, task_key: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert(task_key.into(), FailureMode::Terminal);
    }

    /// Make `task_key` hang until the run is cancelled.
    pub fn hang_until_cancelled(&self, task_key: impl Into<String>) {
        self.script.lock().unwrap().hangs.push(task_key.into());
    }

    /// Total calls received, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Task keys in call order.
    pub fn call_log(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn calls_for(&self, task_key: &str) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.as_str() == task_key)
            .count()
    }

    /// Highest number of concurrently executing calls observed.
    pub fn max_observed_parallelism(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check_failure(&self, task_key: &str) -> Option<HooklineError> {
        let mut script = self.script.lock().unwrap();
        match script.failures.get_mut(task_key) {
            Some(FailureMode::Terminal) => Some(HooklineError::AgentFailure {
                unit: task_key.to_string(),
                message: "scripted terminal failure".into(),
                retryable: false,
            }),
            Some(FailureMode::Retryable { remaining }) => {
                if *remaining == 0 {
                    None
                } else {
                    *remaining -= 1;
                    Some(HooklineError::AgentTransport {
                        message: format!("scripted transient failure for {task_key}"),
                        retryable: true,
                    })
                }
            }
            None => None,
        }
    }

    fn canned_payload(request: &AgentRequest) -> StagePayload {
        match request.stage {
            Stage::Foundation => StagePayload::Foundation {
                positioning: "scripted positioning".into(),
                audience: "scripted audience".into(),
                voice: "scripted voice".into(),
                pillars: vec!["pillar".into()],
            },
            Stage::Research => StagePayload::Research {
                findings: vec![ResearchFinding {
                    topic: "scripted topic".into(),
                    summary: "scripted summary".into(),
                    source: None,
                }],
                gaps: vec![],
            },
            Stage::Planning => StagePayload::BriefPlan {
                units: scripted_units(request.params.unit_count),
            },
            Stage::Drafting => StagePayload::Script {
                hook_line: format!("hook for {}", request.path),
                beats: vec!["problem".into(), "turn".into(), "payoff".into()],
            },
            Stage::Hooks => StagePayload::HookSet {
                options: (1..=request.params.hook_options)
                    .map(|id| HookOption {
                        id,
                        text: format!("option {id} for {}", request.path),
                    })
                    .collect(),
            },
            Stage::Scenes => StagePayload::ScenePlan {
                scenes: vec![
                    Scene {
                        shot: "close-up".into(),
                        voiceover: format!("vo for {}", request.path),
                        on_screen_text: None,
                    },
                    Scene {
                        shot: "wide".into(),
                        voiceover: "closing".into(),
                        on_screen_text: Some("cta".into()),
                    },
                ],
            },
        }
    }
}

/// Deterministic unit grid: awareness levels and emotions cycle so keys are
/// unique and reproducible across runs.
pub fn scripted_units(count: usize) -> Vec<BriefUnit> {
    const LEVELS: [AwarenessLevel; 5] = [
        AwarenessLevel::Unaware,
        AwarenessLevel::ProblemAware,
        AwarenessLevel::SolutionAware,
        AwarenessLevel::ProductAware,
        AwarenessLevel::MostAware,
    ];
    const EMOTIONS: [&str; 3] = ["fear", "hope", "pride"];
    (0..count)
        .map(|i| {
            let key = UnitKey::new(
                LEVELS[i % LEVELS.len()],
                EMOTIONS[i % EMOTIONS.len()],
                (i + 1) as u8,
            );
            BriefUnit {
                key,
                angle: format!("angle {}", i + 1),
                promise: format!("promise {}", i + 1),
            }
        })
        .collect()
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn generate(
        &self,
        request: AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let task_key = request.task_key();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_log.lock().unwrap().push(task_key.clone());

        let hangs = self.script.lock().unwrap().hangs.contains(&task_key);
        if hangs {
            cancel.cancelled().await;
            return Err(HooklineError::Aborted);
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = async {
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(HooklineError::Aborted),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            if let Some(error) = self.check_failure(&task_key) {
                return Err(error);
            }
            Ok(AgentResponse {
                payload: Self::canned_payload(&request),
                cost_usd: self.cost_per_call,
                model: Some("scripted".into()),
            })
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
