//! JSON export of finished runs.

use crate::model::{Report, RunPlan};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// What lands on disk: the report plus enough launch context to read
/// it out of band later.
#[derive(Debug, Serialize)]
pub(crate) struct ReportDocument<'a> {
    pub timestamp_utc: String,
    pub feature: &'a str,
    pub scenarios: &'a [String],
    pub headless: bool,
    pub report: &'a Report,
}

impl<'a> ReportDocument<'a> {
    pub(crate) fn new(plan: &'a RunPlan, report: &'a Report) -> Self {
        let timestamp_utc = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            timestamp_utc,
            feature: &plan.feature_name,
            scenarios: &plan.scenario_names,
            headless: plan.headless,
            report,
        }
    }
}

/// Write the document as pretty-printed JSON.
pub(crate) fn export_json(path: &Path, doc: &ReportDocument<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(doc).context("serialize report document")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Default export location in the current directory, named after the
/// export time and the report id.
pub(crate) fn default_export_path(doc: &ReportDocument<'_>) -> Result<PathBuf> {
    let stamp = doc.timestamp_utc.replace(':', "-").replace('T', "_");
    let name = format!("gherkin-run-{}-{}.json", stamp, short_id(&doc.report.id));
    let current_dir = std::env::current_dir().context("get current directory")?;
    Ok(current_dir.join(name))
}

/// First eight characters of the id, cut on a char boundary.
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((byte, _)) => &id[..byte],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout_plan() -> RunPlan {
        RunPlan {
            project_id: "p-1".to_string(),
            feature_id: "f-1".to_string(),
            feature_name: "Checkout".to_string(),
            scenario_names: vec!["Add to cart".to_string(), "Pay by card".to_string()],
            headless: true,
        }
    }

    #[test]
    fn test_export_round_trips_through_json() {
        let plan = checkout_plan();
        let report = Report {
            id: "r-1".to_string(),
            passed: 8,
            failed: 2,
            total_tests: 10,
            ..Default::default()
        };
        let doc = ReportDocument::new(&plan, &report);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        export_json(&path, &doc).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["feature"], "Checkout");
        assert_eq!(value["scenarios"][0], "Add to cart");
        assert_eq!(value["report"]["passed"], 8);
        assert_eq!(value["report"]["total_tests"], 10);
    }

    #[test]
    fn test_default_path_is_stamped_and_short() {
        let plan = checkout_plan();
        let report = Report {
            id: "r-1234567890".to_string(),
            ..Default::default()
        };
        let doc = ReportDocument::new(&plan, &report);

        let path = default_export_path(&doc).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("gherkin-run-"));
        assert!(name.ends_with("-r-123456.json"));
        assert!(!name.contains(':'));
    }

    #[test]
    fn test_short_id_respects_char_boundaries() {
        assert_eq!(short_id("r-1234567890"), "r-123456");
        assert_eq!(short_id("r-12"), "r-12");
        assert_eq!(short_id("report-é123"), "report-é");
    }
}
