//! Run persistence: per-tick reports and the end-of-run summary

use crate::EngineResult;
use foreman_evaluation::EvaluationSnapshot;
use foreman_preferences::PreferenceChange;
use foreman_types::{ActionRecord, RunState, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

// ── Tick Report ──────────────────────────────────────────────────────

/// What one tick did, as handed to recorders and callbacks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickReport {
    pub timestep: u64,
    pub run_state: RunState,
    /// The action applied this tick, if the policy was stepped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRecord>,
    /// Human-readable roster change notes applied at the tick boundary
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roster_changes: Vec<String>,
    /// Tasks that reached Completed during this tick
    #[serde(default)]
    pub completed_task_ids: Vec<TaskId>,
    /// Tasks that reached Failed during this tick
    #[serde(default)]
    pub failed_task_ids: Vec<TaskId>,
    /// Evaluation output, when the suite had anything due
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationSnapshot>,
    /// Preference weight changes the stakeholder applied this tick
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preference_changes: Vec<PreferenceChange>,
    pub status_counts: BTreeMap<String, usize>,
    pub total_cost: f64,
    pub total_simulated_hours: f64,
    /// Wall-clock duration of the tick
    pub wall_time_ms: u64,
}

// ── Run Summary ──────────────────────────────────────────────────────

/// Final account of a finished run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub run_state: RunState,
    pub timesteps_executed: u64,
    pub progress: f64,
    pub total_cost: f64,
    pub total_simulated_hours: f64,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Scalar reward per timestep, zero-filled for ticks with no evaluation
    pub reward_series: Vec<f64>,
    pub most_recent_reward: f64,
    /// The completion-cadence evaluation, when a suite was configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_evaluation: Option<EvaluationSnapshot>,
}

// ── Recorder Trait ───────────────────────────────────────────────────

/// Sink for run output. The engine logs and swallows recorder errors so
/// persistence trouble never kills a run.
pub trait RunRecorder: Send {
    fn record_tick(&mut self, report: &TickReport) -> EngineResult<()>;
    fn record_summary(&mut self, summary: &RunSummary) -> EngineResult<()>;
}

/// Discards everything; the default for tests and library use
#[derive(Default)]
pub struct NullRecorder;

impl RunRecorder for NullRecorder {
    fn record_tick(&mut self, _report: &TickReport) -> EngineResult<()> {
        Ok(())
    }

    fn record_summary(&mut self, _summary: &RunSummary) -> EngineResult<()> {
        Ok(())
    }
}

// ── JSONL Recorder ───────────────────────────────────────────────────

/// Writes one JSON line per tick to `ticks.jsonl` and the final summary
/// to `summary.json` in the given directory.
pub struct JsonlRunRecorder {
    dir: PathBuf,
    ticks: BufWriter<File>,
}

impl JsonlRunRecorder {
    pub fn new(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let file = File::options()
            .create(true)
            .append(true)
            .open(dir.join("ticks.jsonl"))?;
        Ok(Self {
            dir,
            ticks: BufWriter::new(file),
        })
    }
}

impl RunRecorder for JsonlRunRecorder {
    fn record_tick(&mut self, report: &TickReport) -> EngineResult<()> {
        let line = serde_json::to_string(report)?;
        writeln!(self.ticks, "{line}")?;
        self.ticks.flush()?;
        Ok(())
    }

    fn record_summary(&mut self, summary: &RunSummary) -> EngineResult<()> {
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(self.dir.join("summary.json"), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_report(timestep: u64) -> TickReport {
        TickReport {
            timestep,
            run_state: RunState::Running,
            action: None,
            roster_changes: Vec::new(),
            completed_task_ids: Vec::new(),
            failed_task_ids: Vec::new(),
            evaluation: None,
            preference_changes: Vec::new(),
            status_counts: BTreeMap::new(),
            total_cost: 12.5,
            total_simulated_hours: 0.5,
            wall_time_ms: 3,
        }
    }

    #[test]
    fn test_jsonl_recorder_writes_ticks_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = JsonlRunRecorder::new(dir.path()).unwrap();

        recorder.record_tick(&make_report(0)).unwrap();
        recorder.record_tick(&make_report(1)).unwrap();
        recorder
            .record_summary(&RunSummary {
                workflow_id: WorkflowId::new("wf"),
                workflow_name: "wf".into(),
                run_state: RunState::Completed,
                timesteps_executed: 2,
                progress: 1.0,
                total_cost: 12.5,
                total_simulated_hours: 0.5,
                completed_tasks: 3,
                failed_tasks: 0,
                reward_series: vec![0.0, 0.4],
                most_recent_reward: 0.4,
                final_evaluation: None,
            })
            .unwrap();

        let ticks = fs::read_to_string(dir.path().join("ticks.jsonl")).unwrap();
        assert_eq!(ticks.lines().count(), 2);
        let first: TickReport = serde_json::from_str(ticks.lines().next().unwrap()).unwrap();
        assert_eq!(first.timestep, 0);

        let summary = fs::read_to_string(dir.path().join("summary.json")).unwrap();
        let parsed: RunSummary = serde_json::from_str(&summary).unwrap();
        assert_eq!(parsed.run_state, RunState::Completed);
        assert_eq!(parsed.reward_series.len(), 2);
    }
}
