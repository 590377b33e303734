//! CSV and JSON rendering of the result table

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::reconciler::ResultTable;

/// Report columns in output order
pub const COLUMNS: [&str; 7] = [
    "File Name",
    "File Path",
    "Detected Language",
    "Transcript",
    "Diarized Transcript",
    "Error",
    "Timestamp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Csv,
    Json,
}

impl ReportFormat {
    /// JSON for `.json` paths, CSV otherwise
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ReportFormat::Json,
            _ => ReportFormat::Csv,
        }
    }
}

pub struct ReportWriter {
    path: PathBuf,
    format: ReportFormat,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>, format: Option<ReportFormat>) -> Self {
        let path = path.into();
        let format = format.unwrap_or_else(|| ReportFormat::from_path(&path));
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ReportFormat {
        self.format
    }

    pub fn render(&self, table: &ResultTable) -> Result<String> {
        match self.format {
            ReportFormat::Csv => Ok(render_csv(table)),
            ReportFormat::Json => {
                serde_json::to_string_pretty(table.rows()).context("Failed to serialize report")
            }
        }
    }

    pub async fn write(&self, table: &ResultTable) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = self.render(table)?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write report to {}", self.path.display()))?;

        info!("💾 Results saved to: {}", self.path.display());
        Ok(())
    }
}

fn render_csv(table: &ResultTable) -> String {
    let mut out = String::new();
    push_record(&mut out, COLUMNS.iter().copied());
    for row in table.iter() {
        let columns = row.columns();
        push_record(&mut out, columns.iter().map(String::as_str));
    }
    out
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    let line: Vec<String> = fields.map(escape_field).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

/// Quote a field when it contains a delimiter, quote or line break
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::AudioFile;
    use crate::reconciler::Reconciler;
    use crate::transcription::FileResult;
    use tempfile::TempDir;

    fn table(dir: &TempDir) -> ResultTable {
        let path = dir.path().join("call.wav");
        std::fs::write(&path, b"audio").unwrap();
        let file = AudioFile::from_path(&path).unwrap();

        let mut reconciler = Reconciler::new(std::slice::from_ref(&file));
        reconciler.record(FileResult::failure(&file, "API Error 400: \"bad\", retry\nlater"));
        reconciler.finish("Not processed")
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ReportFormat::from_path(Path::new("out.JSON")), ReportFormat::Json);
        assert_eq!(ReportFormat::from_path(Path::new("out.csv")), ReportFormat::Csv);
        assert_eq!(ReportFormat::from_path(Path::new("out")), ReportFormat::Csv);
    }

    #[test]
    fn test_empty_table_still_has_header() {
        let writer = ReportWriter::new("report.csv", None);
        let csv = writer.render(&ResultTable::default()).unwrap();
        assert_eq!(
            csv,
            "File Name,File Path,Detected Language,Transcript,Diarized Transcript,Error,Timestamp\r\n"
        );
    }

    #[test]
    fn test_csv_quotes_error_messages() {
        let temp_dir = TempDir::new().unwrap();
        let writer = ReportWriter::new("report.csv", None);
        let csv = writer.render(&table(&temp_dir)).unwrap();

        assert!(csv.contains("\"API Error 400: \"\"bad\"\", retry\nlater\""));
        assert!(csv.contains(",error,"));
    }

    #[tokio::test]
    async fn test_write_json_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("reports").join("run.json");
        let writer = ReportWriter::new(&output, None);

        writer.write(&table(&temp_dir)).await.unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        let rows: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["File Name"], "call.wav");
        assert_eq!(rows[0]["Detected Language"], "error");
    }
}
