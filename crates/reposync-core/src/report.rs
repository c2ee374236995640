//! Consolidated sync report.
//!
//! The report carries no timestamps or run ids: two runs over the same
//! repository states render byte-identical output.

use serde::{Deserialize, Serialize};

use crate::locator::DiscoveryWarning;
use crate::model::{SyncResult, SyncStatus};

/// Aggregate outcome of a run, the only signal automation should rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitSignal {
    Success,
    /// Completed, but at least one repository needs manual merge resolution.
    Conflict,
    Error,
}

impl ExitSignal {
    /// ERROR dominates CONFLICT, which dominates SUCCESS.
    pub fn from_results(results: &[SyncResult]) -> Self {
        if results.iter().any(|r| r.status == SyncStatus::Error) {
            ExitSignal::Error
        } else if results.iter().any(|r| r.status == SyncStatus::Conflict) {
            ExitSignal::Conflict
        } else {
            ExitSignal::Success
        }
    }

    /// `0` success, `1` error, `3` conflict.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitSignal::Success => 0,
            ExitSignal::Error => 1,
            ExitSignal::Conflict => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitSignal::Success => "success",
            ExitSignal::Conflict => "conflict",
            ExitSignal::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub conflicted: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// Repository names per status, each list in report order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportGroups {
    pub success: Vec<String>,
    pub conflict: Vec<String>,
    pub skipped: Vec<String>,
    pub error: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub dry_run: bool,
    pub signal: ExitSignal,
    pub summary: Summary,
    pub groups: ReportGroups,
    pub entries: Vec<SyncResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovery_warnings: Vec<DiscoveryWarning>,
}

#[derive(Debug, Default)]
pub struct ReportBuilder {
    dry_run: bool,
    warnings: Vec<DiscoveryWarning>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<DiscoveryWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Consume the run's results. Entries are ordered by name; the sort is
    /// stable so discovery order is kept for equal names.
    pub fn build(self, mut results: Vec<SyncResult>) -> Report {
        results.sort_by(|a, b| a.name.cmp(&b.name));

        let mut summary = Summary {
            total: results.len(),
            ..Summary::default()
        };
        let mut groups = ReportGroups::default();
        for result in &results {
            let (count, names) = match result.status {
                SyncStatus::Success => (&mut summary.succeeded, &mut groups.success),
                SyncStatus::Conflict => (&mut summary.conflicted, &mut groups.conflict),
                SyncStatus::Skipped => (&mut summary.skipped, &mut groups.skipped),
                SyncStatus::Error => (&mut summary.errored, &mut groups.error),
            };
            *count += 1;
            names.push(result.name.clone());
        }

        Report {
            dry_run: self.dry_run,
            signal: ExitSignal::from_results(&results),
            summary,
            groups,
            entries: results,
            discovery_warnings: self.warnings,
        }
    }
}

impl Report {
    pub fn exit_code(&self) -> u8 {
        self.signal.exit_code()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable rendering.
    pub fn render_text(&self) -> String {
        let mut out = String::from("Repository sync report");
        if self.dry_run {
            out.push_str(" (dry run, nothing was changed)");
        }
        out.push('\n');

        let width = self
            .entries
            .iter()
            .map(|e| e.name.len())
            .max()
            .unwrap_or(0);

        if self.entries.is_empty() {
            out.push_str("\nno repositories processed\n");
        } else {
            out.push('\n');
        }
        for entry in &self.entries {
            let action = entry.action.map(|a| a.as_str()).unwrap_or("-");
            let mut line = format!(
                "  {:<width$}  {:<17}  {:<8}",
                entry.name,
                action,
                entry.status.as_str(),
            );
            let mut notes = Vec::new();
            if entry.dry_run {
                notes.push("dry run".to_string());
            }
            if entry.committed {
                notes.push("committed local changes".to_string());
            }
            if let Some(pull) = entry.pull {
                notes.push(pull.as_str().to_string());
            }
            if let Some(message) = &entry.message {
                notes.push(message.clone());
            }
            if !notes.is_empty() {
                line.push_str("  ");
                line.push_str(&notes.join("; "));
            }
            out.push_str(line.trim_end());
            out.push('\n');

            if let Some(conflict) = &entry.conflict {
                for file in &conflict.files {
                    out.push_str(&format!("      {} ({})\n", file.path, file.kind.as_str()));
                }
                if conflict.files.is_empty() {
                    out.push_str(&format!(
                        "      conflicting paths not recognised ({})\n",
                        conflict.kind.as_str()
                    ));
                }
            }
        }

        if !self.discovery_warnings.is_empty() {
            out.push_str("\nExcluded during discovery:\n");
            for warning in &self.discovery_warnings {
                out.push_str(&format!("  {}\n", warning.reason));
            }
        }

        let s = &self.summary;
        out.push_str(&format!(
            "\n{} succeeded, {} conflicted, {} skipped, {} errored\n",
            s.succeeded, s.conflicted, s.skipped, s.errored
        ));
        out.push_str(&format!(
            "Result: {} (exit code {})\n",
            self.signal.as_str(),
            self.exit_code()
        ));
        out
    }
}
