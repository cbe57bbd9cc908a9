//! Report generation and formatting
//!
//! **Purpose:** Collect per-scenario outcomes and render them for the CLI, as
//! text or JSON on stdout. Reports are never written to disk.

use crate::error::FailureCategory;
use crate::event_manager::ListenerStats;
use crate::waiter::WaitRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Exactly one of passed, failed or skipped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Passed,
    Failed {
        category: FailureCategory,
        detail: String,
    },
    Skipped {
        reason: String,
    },
}

impl ScenarioOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, ScenarioOutcome::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ScenarioOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ScenarioOutcome::Skipped { .. })
    }

    /// Failure category, if failed
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            ScenarioOutcome::Failed { category, .. } => Some(*category),
            _ => None,
        }
    }
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Process-wide scenario sequence number
    pub sequence: u64,
    pub id: String,
    pub outcome: ScenarioOutcome,
    pub duration_ms: u64,
    /// Every wait request made by the scenario
    pub waits: Vec<WaitRecord>,
    /// Errors observed after the outcome was already decided
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suppressed_errors: Vec<String>,
    /// Listener registrations made and released during the scenario
    pub listeners: ListenerStats,
    pub key_status_changes: usize,
}

impl ScenarioReport {
    /// Report for a scenario that never touched the player
    pub fn skipped(sequence: u64, id: &str, reason: String) -> Self {
        Self {
            sequence,
            id: id.to_string(),
            outcome: ScenarioOutcome::Skipped { reason },
            duration_ms: 0,
            waits: Vec::new(),
            suppressed_errors: Vec::new(),
            listeners: ListenerStats::default(),
            key_status_changes: 0,
        }
    }
}

/// Outcome counts for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Complete run report
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub backend: String,
    pub duration_ms: u64,
    pub scenarios: Vec<ScenarioReport>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(backend: &str, started_at: DateTime<Utc>, duration_ms: u64, scenarios: Vec<ScenarioReport>) -> Self {
        let summary = RunSummary {
            total: scenarios.len(),
            passed: scenarios.iter().filter(|s| s.outcome.is_passed()).count(),
            failed: scenarios.iter().filter(|s| s.outcome.is_failed()).count(),
            skipped: scenarios.iter().filter(|s| s.outcome.is_skipped()).count(),
        };
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            backend: backend.to_string(),
            duration_ms,
            scenarios,
            summary,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    pub fn get(&self, id: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// CLI formatter for run results
pub struct CliFormatter;

impl CliFormatter {
    /// One line per scenario
    ///
    /// Example: `[✓] #1 supports AC-3 if platform supports it (5.2s)`
    pub fn format_scenario(report: &ScenarioReport) -> String {
        let seconds = report.duration_ms as f64 / 1000.0;
        match &report.outcome {
            ScenarioOutcome::Passed => {
                format!("[✓] #{} {} ({:.1}s)", report.sequence, report.id, seconds)
            }
            ScenarioOutcome::Failed { category, detail } => format!(
                "[✗] #{} {} ({:.1}s): {}: {}",
                report.sequence, report.id, seconds, category, detail
            ),
            ScenarioOutcome::Skipped { reason } => {
                format!("[-] #{} {}: skipped ({})", report.sequence, report.id, reason)
            }
        }
    }

    pub fn format_summary(report: &RunReport) -> String {
        format!(
            "{} scenarios: {} passed, {} failed, {} skipped ({:.1}s, backend {})",
            report.summary.total,
            report.summary.passed,
            report.summary.failed,
            report.summary.skipped,
            report.duration_ms as f64 / 1000.0,
            report.backend
        )
    }

    pub fn format_report(report: &RunReport) -> String {
        let mut output = String::new();
        output.push_str(&format!("Run {}\n", report.run_id));
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        for scenario in &report.scenarios {
            output.push_str(&Self::format_scenario(scenario));
            output.push('\n');
            for suppressed in &scenario.suppressed_errors {
                output.push_str(&format!("      also observed: {suppressed}\n"));
            }
        }
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        output.push_str(&Self::format_summary(report));
        output.push('\n');
        output
    }
}
