//! Thread-safe debug recorder. Collects one run's model and tool activity
//! and writes it as a JSON document.

use chrono::Utc;
use reactloop_config::DebugConfig;
use reactloop_core::sanitize::truncate;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::TelemetryError;
use crate::model::*;

/// Records a single engine call.
///
/// Create one per call; the engine never shares a recorder between calls.
pub struct DebugRecorder {
    config: DebugConfig,
    run_id: String,
    state: Mutex<RecorderState>,
}

#[derive(Default)]
struct RecorderState {
    log: Option<DebugLog>,
    started: Option<Instant>,
    current: Option<(DebugIteration, Instant)>,
    path: Option<PathBuf>,
}

impl DebugRecorder {
    pub fn new(config: DebugConfig) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let run_id = format!(
            "debug_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        );
        Self {
            config,
            run_id,
            state: Mutex::new(RecorderState::default()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the trace for `user_query`.
    pub fn start(&self, user_query: &str) {
        let mut state = self.lock();
        state.log = Some(DebugLog::new(&self.run_id, user_query));
        state.started = Some(Instant::now());
        state.current = None;
        state.path = None;
    }

    pub fn start_iteration(&self, iteration: u32) {
        let mut state = self.lock();
        close_iteration(&mut state);
        state.current = Some((
            DebugIteration {
                iteration,
                ..Default::default()
            },
            Instant::now(),
        ));
    }

    pub fn end_iteration(&self) {
        close_iteration(&mut self.lock());
    }

    pub fn record_llm_request(&self, request: LlmRequestRecord) {
        if let Some((iteration, _)) = self.lock().current.as_mut() {
            iteration.llm_request = Some(request);
        }
    }

    /// Record a model response. A bundle re-invocation replaces the earlier
    /// response of the same iteration; the counters keep both.
    pub fn record_llm_response(&self, response: LlmResponseRecord) {
        let mut state = self.lock();
        let RecorderState { log, current, .. } = &mut *state;
        if let Some(log) = log.as_mut() {
            log.summary.total_llm_calls += 1;
            log.summary.total_llm_duration_ms += response.duration_ms;
            if let Some(error) = &response.error {
                log.summary.errors.push(error.clone());
            }
        }
        if let Some((iteration, _)) = current.as_mut() {
            iteration.llm_response = Some(response);
        }
    }

    /// Record a tool execution, applying the inclusion/truncation settings.
    pub fn record_tool_execution(&self, mut execution: ToolExecutionRecord) {
        if !self.config.include_tool_args {
            execution.args.clear();
        }
        if self.config.include_tool_results {
            let (result, truncated) = truncate(&execution.result, self.config.max_result_size);
            execution.result = result;
            execution.result_truncated = truncated;
        } else {
            execution.result.clear();
        }

        let mut state = self.lock();
        let RecorderState { log, current, .. } = &mut *state;
        if let Some(log) = log.as_mut() {
            log.summary.total_tools_executed += 1;
            log.summary.total_tool_duration_ms += execution.duration_ms;
            if let Some(error) = &execution.error {
                log.summary
                    .errors
                    .push(format!("{}: {}", execution.name, error));
            }
            if !log.summary.visited_tools.contains(&execution.name) {
                log.summary.visited_tools.push(execution.name.clone());
            }
        }
        if let Some((iteration, _)) = current.as_mut() {
            iteration.tools_executed.push(execution);
        }
    }

    /// Flag the latest execution of `tool` in this iteration as having
    /// activated the post-prompt at `path`.
    pub fn mark_post_prompt(&self, tool: &str, path: &str) {
        if let Some((iteration, _)) = self.lock().current.as_mut() {
            if let Some(exec) = iteration.tools_executed.iter_mut().rev().find(|e| e.name == tool) {
                exec.post_prompt_activated = Some(path.to_string());
            }
        }
    }

    pub fn add_error(&self, error: &str) {
        if let Some(log) = self.lock().log.as_mut() {
            log.summary.errors.push(error.to_string());
        }
    }

    /// Close the trace with a final answer and write it to disk.
    pub fn finalize(&self, final_result: &str) -> Result<PathBuf, TelemetryError> {
        self.finish(final_result, None)
    }

    /// Close the trace with an error and write the partial trace to disk.
    pub fn finalize_with_error(&self, error: &str) -> Result<PathBuf, TelemetryError> {
        self.finish("", Some(error))
    }

    fn finish(&self, final_result: &str, error: Option<&str>) -> Result<PathBuf, TelemetryError> {
        let mut state = self.lock();
        close_iteration(&mut state);

        let elapsed = state.started.map(|s| s.elapsed()).unwrap_or(Duration::ZERO);
        let log = state.log.as_mut().ok_or(TelemetryError::NotStarted)?;
        log.duration_ms = elapsed.as_millis() as u64;
        log.final_result = final_result.to_string();
        if let Some(error) = error {
            log.summary.errors.push(error.to_string());
            log.error = Some(error.to_string());
        }
        if let Some(last) = log.iterations.last_mut() {
            last.is_final = true;
        }

        let json = serde_json::to_string_pretty(log)?;
        std::fs::create_dir_all(&self.config.logs_dir).map_err(|source| TelemetryError::Io {
            path: self.config.logs_dir.clone(),
            source,
        })?;
        let path = self.config.logs_dir.join(format!("{}.json", self.run_id));
        std::fs::write(&path, json).map_err(|source| TelemetryError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(run_id = %self.run_id, path = %path.display(), "Debug trace written");
        state.path = Some(path.clone());
        Ok(path)
    }

    /// Path of the written trace, once finalized.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    /// A copy of the trace recorded so far.
    pub fn snapshot(&self) -> Option<DebugLog> {
        self.lock().log.clone()
    }
}

fn close_iteration(state: &mut RecorderState) {
    if let Some((mut iteration, started)) = state.current.take() {
        iteration.duration_ms = started.elapsed().as_millis() as u64;
        if let Some(log) = state.log.as_mut() {
            log.iterations.push(iteration);
        }
    }
}
