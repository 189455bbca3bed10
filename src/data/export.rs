// ============================================================
// Layer 4 — Chat Export Loader
// ============================================================
// Loads a chat export from disk: either one JSON file or a
// directory of per-dialog files (the layout most messenger
// exporters produce — one `dialog_<id>.json` per conversation).
//
// Each dialog file looks like:
//
//   {
//     "dialog_id": 421,
//     "dialog_name": "family",
//     "messages": [
//       {"message_id": 1, "sender": "anna", "date": "2024-03-01T09:15:00Z", "text": "hi"},
//       ...
//     ]
//   }
//
// Parsing is all-or-nothing: one malformed file aborts the whole
// load with `PipelineError::Parse` so no partial corpus can ever
// be built from a broken export.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::errors::PipelineError;
use crate::domain::message::RawMessage;
use crate::domain::traits::ExportSource;

/// Wire format of one dialog file.
#[derive(Debug, Deserialize)]
struct DialogExport {
    dialog_id: i64,
    #[serde(default)]
    #[allow(dead_code)]
    dialog_name: Option<String>,
    messages: Vec<ExportRecord>,
}

/// Wire format of one message record.
#[derive(Debug, Deserialize)]
struct ExportRecord {
    message_id: i64,
    sender: String,
    date: String,
    #[serde(default)]
    text: Option<String>,
}

/// Loads raw messages from a chat-export path.
pub struct JsonExportSource {
    path: PathBuf,
}

impl JsonExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse_error(&self, path: &Path, detail: impl ToString) -> PipelineError {
        PipelineError::Parse {
            path: path.display().to_string(),
            detail: detail.to_string(),
        }
    }

    fn load_file(&self, path: &Path) -> Result<Vec<RawMessage>, PipelineError> {
        let raw = fs::read_to_string(path).map_err(|e| self.parse_error(path, e))?;
        let dialog: DialogExport =
            serde_json::from_str(&raw).map_err(|e| self.parse_error(path, e))?;

        let mut messages = Vec::with_capacity(dialog.messages.len());
        for record in dialog.messages {
            let timestamp = DateTime::parse_from_rfc3339(&record.date)
                .map_err(|e| {
                    self.parse_error(
                        path,
                        format!("message {}: bad timestamp '{}': {}", record.message_id, record.date, e),
                    )
                })?
                .with_timezone(&Utc);

            messages.push(RawMessage {
                message_id: record.message_id,
                sender: record.sender,
                timestamp,
                // Media-only records export with no text field
                text: record.text.unwrap_or_default(),
                thread_id: dialog.dialog_id,
            });
        }
        Ok(messages)
    }
}

impl ExportSource for JsonExportSource {
    fn load_all(&self) -> Result<Vec<RawMessage>, PipelineError> {
        if !self.path.exists() {
            return Err(self.parse_error(&self.path, "export path does not exist"));
        }

        if self.path.is_file() {
            let messages = self.load_file(&self.path)?;
            tracing::info!("Loaded {} messages from '{}'", messages.len(), self.path.display());
            return Ok(messages);
        }

        // Directory of per-dialog files. Sorted by file name so the
        // load order — and everything derived from it — is stable.
        let mut files: Vec<PathBuf> = fs::read_dir(&self.path)
            .map_err(|e| self.parse_error(&self.path, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(self.parse_error(&self.path, "no .json export files in directory"));
        }

        let mut all = Vec::new();
        for file in &files {
            all.extend(self.load_file(file)?);
        }
        tracing::info!(
            "Loaded {} messages from {} dialog files in '{}'",
            all.len(),
            files.len(),
            self.path.display()
        );
        Ok(all)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mimic-export-{}-{}", tag, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const GOOD: &str = r#"{
        "dialog_id": 7,
        "dialog_name": "friends",
        "messages": [
            {"message_id": 1, "sender": "anna", "date": "2024-03-01T09:15:00Z", "text": "hi"},
            {"message_id": 2, "sender": "me", "date": "2024-03-01T09:16:00Z", "text": "hey!"},
            {"message_id": 3, "sender": "me", "date": "2024-03-01T09:16:30Z"}
        ]
    }"#;

    #[test]
    fn test_loads_single_file() {
        let dir = scratch_dir("single");
        let file = dir.join("dialog_7.json");
        fs::write(&file, GOOD).unwrap();

        let messages = JsonExportSource::new(&file).load_all().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].sender, "anna");
        assert_eq!(messages[1].thread_id, 7);
        // Media-only record comes through with empty text
        assert_eq!(messages[2].text, "");
    }

    #[test]
    fn test_malformed_file_fails_whole_load() {
        let dir = scratch_dir("malformed");
        fs::write(dir.join("dialog_1.json"), GOOD).unwrap();
        fs::write(dir.join("dialog_2.json"), "{ not json").unwrap();

        let err = JsonExportSource::new(&dir).load_all().unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn test_bad_timestamp_is_a_parse_error() {
        let dir = scratch_dir("badts");
        let broken = GOOD.replace("2024-03-01T09:15:00Z", "yesterday");
        fs::write(dir.join("dialog_7.json"), broken).unwrap();

        let err = JsonExportSource::new(&dir).load_all().unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn test_missing_path_is_a_parse_error() {
        let err = JsonExportSource::new("/nonexistent/export").load_all().unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }
}
