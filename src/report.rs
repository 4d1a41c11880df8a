//! Per-run summary of what was read, dropped and loaded.

use crate::clean::DiscardCounts;
use crate::load::TableLoad;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input: PathBuf,

    pub rows_read: usize,
    pub rows_cleaned: usize,
    pub discarded: DiscardCounts,
    pub referential_errors: usize,

    pub tables: Vec<TableLoad>,
}

impl RunReport {
    pub fn start(input: &Path) -> Self {
        Self {
            started_at: Utc::now(),
            input: input.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Share of `count` in `total` as a percentage, or 0 for an empty total.
    pub fn pct(count: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (count as f64 / total as f64) * 100.0
        }
    }

    pub fn discard_pct(&self) -> f64 {
        Self::pct(self.discarded.total(), self.rows_read)
    }

    /// Rows loaded into the named table, if it was loaded.
    pub fn rows_loaded(&self, table: &str) -> Option<usize> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.rows)
    }

    /// Logs the summary line and the full report as pretty JSON.
    pub fn log(&self) {
        info!(
            rows_read = self.rows_read,
            rows_cleaned = self.rows_cleaned,
            discarded = self.discarded.total(),
            discard_pct = %format!("{:.2}", self.discard_pct()),
            referential_errors = self.referential_errors,
            tables = self.tables.len(),
            "Run finished"
        );
        match serde_json::to_string_pretty(self) {
            Ok(json) => info!("{json}"),
            Err(e) => debug!(error = %e, "Could not render run report"),
        }
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Wrote run report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::warehouse::LoadMode;

    fn report() -> RunReport {
        let mut report = RunReport::start(Path::new("trips.csv"));
        report.rows_read = 4;
        report.rows_cleaned = 3;
        report.discarded.negative_fare = 1;
        report.tables.push(TableLoad {
            table: "fact_trips".into(),
            rows: 3,
            mode: LoadMode::Batch,
        });
        report
    }

    #[test]
    fn test_pct() {
        assert_eq!(RunReport::pct(0, 0), 0.0);
        assert_eq!(RunReport::pct(1, 4), 25.0);
        assert_eq!(report().discard_pct(), 25.0);
    }

    #[test]
    fn test_rows_loaded_by_table() {
        let report = report();
        assert_eq!(report.rows_loaded("fact_trips"), Some(3));
        assert_eq!(report.rows_loaded("dim_vendor"), None);
    }

    #[test]
    fn test_log_does_not_panic() {
        report().log();
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        let mut report = report();
        report.finish();
        report.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["rows_read"], 4);
        assert_eq!(value["discarded"]["negative_fare"], 1);
        assert_eq!(value["tables"][0]["table"], "fact_trips");
        assert_eq!(value["tables"][0]["mode"], "batch");
        assert!(value["finished_at"].is_string());
    }
}
