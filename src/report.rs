//! Model output: daily counter reports, health-record lines, and the
//! end-of-run summary.
//!
//! Reports are tab-delimited csv files, one per report kind, written
//! through serde-serialisable row structs. Writers are created lazily
//! on first use and keyed by short name; when no output directory is
//! configured every send is a cheap no-op, so hot paths can report
//! unconditionally. Health-record lines go to their own plain-text
//! sink. Warning tallies accumulate here and are folded into the run
//! summary that `finish()` serialises as JSON.

use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ContagionError;
use crate::hash::HashMap;
use crate::warn;

type BoxedWriter = csv::Writer<Box<dyn Write>>;

#[derive(Default)]
pub struct ReportWriters {
    output_dir: Option<PathBuf>,
    prefix: String,
    writers: RefCell<HashMap<String, BoxedWriter>>,
    health_sink: Option<RefCell<Box<dyn Write>>>,
    warnings: RefCell<HashMap<String, u32>>,
}

impl std::fmt::Debug for ReportWriters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportWriters")
            .field("output_dir", &self.output_dir)
            .field("prefix", &self.prefix)
            .field("health_records", &self.health_sink.is_some())
            .finish()
    }
}

impl ReportWriters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directs csv reports to `dir`, named `<prefix><short_name>.csv`.
    pub fn enable_output(&mut self, dir: &Path, prefix: &str) -> Result<(), ContagionError> {
        std::fs::create_dir_all(dir)?;
        self.output_dir = Some(dir.to_path_buf());
        self.prefix = prefix.to_string();
        Ok(())
    }

    #[must_use]
    pub fn output_enabled(&self) -> bool {
        self.output_dir.is_some()
    }

    /// Sends health-record lines to an arbitrary sink (a file, or a
    /// buffer in tests).
    pub fn enable_health_records(&mut self, sink: Box<dyn Write>) {
        self.health_sink = Some(RefCell::new(sink));
    }

    pub fn enable_health_records_file(&mut self, path: &Path) -> Result<(), ContagionError> {
        let file = File::create(path)?;
        self.enable_health_records(Box::new(file));
        Ok(())
    }

    #[must_use]
    pub fn health_records_enabled(&self) -> bool {
        self.health_sink.is_some()
    }

    pub fn health_record(&self, line: &str) {
        if let Some(sink) = &self.health_sink {
            if writeln!(sink.borrow_mut(), "{line}").is_err() {
                warn!("failed to write health record line");
            }
        }
    }

    /// Serialises one row into the named report. A no-op without an
    /// output directory.
    pub fn send_report<T: Serialize>(&self, short_name: &str, row: &T) {
        let Some(dir) = &self.output_dir else {
            return;
        };
        let mut writers = self.writers.borrow_mut();
        if !writers.contains_key(short_name) {
            let filename = dir.join(format!("{}{short_name}.csv", self.prefix));
            match File::create(&filename) {
                Ok(file) => {
                    let writer = csv::WriterBuilder::new()
                        .delimiter(b'\t')
                        .from_writer(Box::new(file) as Box<dyn Write>);
                    writers.insert(short_name.to_string(), writer);
                }
                Err(e) => {
                    warn!("cannot create report {}: {e}", filename.display());
                    return;
                }
            }
        }
        let writer = writers.get_mut(short_name).unwrap();
        if let Err(e) = writer.serialize(row) {
            warn!("failed to serialize {short_name} row: {e}");
        }
    }

    /// Counts a warning by category for the end-of-run summary.
    pub fn count_warning(&self, category: &str) {
        *self.warnings.borrow_mut().entry(category.to_string()).or_insert(0) += 1;
    }

    #[must_use]
    pub fn warning_count(&self, category: &str) -> u32 {
        self.warnings.borrow().get(category).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn warning_totals(&self) -> serde_json::Value {
        let warnings = self.warnings.borrow();
        let mut map = serde_json::Map::new();
        let mut categories: Vec<&String> = warnings.keys().collect();
        categories.sort();
        for category in categories {
            map.insert(category.clone(), serde_json::json!(warnings[category]));
        }
        serde_json::Value::Object(map)
    }

    /// Writes the end-of-run summary JSON and flushes every writer.
    pub fn finish(&mut self, summary: &serde_json::Value) -> Result<(), ContagionError> {
        for writer in self.writers.borrow_mut().values_mut() {
            writer.flush()?;
        }
        if let Some(sink) = &self.health_sink {
            sink.borrow_mut().flush()?;
        }
        if let Some(dir) = &self.output_dir {
            let path = dir.join(format!("{}summary.json", self.prefix));
            let file = File::create(path)?;
            serde_json::to_writer_pretty(file, summary)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        day: u32,
        count: u32,
    }

    #[test]
    fn disabled_reporting_is_a_no_op() {
        let reports = ReportWriters::new();
        reports.send_report("infections", &Row { day: 0, count: 1 });
        assert!(!reports.output_enabled());
    }

    #[test]
    fn rows_are_tab_delimited_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut reports = ReportWriters::new();
        reports.enable_output(dir.path(), "run1_").unwrap();
        reports.send_report("infections", &Row { day: 0, count: 3 });
        reports.send_report("infections", &Row { day: 1, count: 5 });
        reports.finish(&serde_json::json!({})).unwrap();

        let text = std::fs::read_to_string(dir.path().join("run1_infections.csv")).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "day\tcount");
        assert_eq!(lines.next().unwrap(), "0\t3");
        assert_eq!(lines.next().unwrap(), "1\t5");
    }

    #[test]
    fn health_records_reach_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.txt");
        let mut reports = ReportWriters::new();
        reports.enable_health_records_file(&path).unwrap();
        reports.health_record("HEALTH RECORD: 2012-01-01 day 0 person 1 age 30 is EXPOSED to INF");
        reports.finish(&serde_json::json!({})).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("person 1 age 30 is EXPOSED to INF"));
    }

    #[test]
    fn warning_totals_accumulate() {
        let reports = ReportWriters::new();
        reports.count_warning("import_shortfall");
        reports.count_warning("import_shortfall");
        reports.count_warning("matching_empty_pool");
        assert_eq!(reports.warning_count("import_shortfall"), 2);
        let totals = reports.warning_totals();
        assert_eq!(totals["import_shortfall"], 2);
        assert_eq!(totals["matching_empty_pool"], 1);
    }

    #[test]
    fn summary_json_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut reports = ReportWriters::new();
        reports.enable_output(dir.path(), "").unwrap();
        reports
            .finish(&serde_json::json!({"days": 10}))
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("summary.json")).unwrap();
        assert!(text.contains("\"days\": 10"));
    }
}
