//! Pipeline diagnostic dump: writes intermediate artifacts to disk.
//!
//! **Activation**: only when a dump directory is configured
//! (`MEDASSIST_DUMP_DIR`, or `AppConfig::dump_dir`).
//!
//! **Output structure**:
//! ```text
//! {dump_dir}/{request_id}/
//!   00-task.json
//!   01-extraction.json
//!   02-report-request.txt
//!   03-report-outcome.json
//! ```
//!
//! The task description is never written; `00-task.json` carries only the
//! file name, size, fingerprint and modality.

use std::path::{Path, PathBuf};

use uuid::Uuid;

pub const TASK_FILE: &str = "00-task.json";
pub const EXTRACTION_FILE: &str = "01-extraction.json";
pub const REPORT_REQUEST_FILE: &str = "02-report-request.txt";
pub const REPORT_OUTCOME_FILE: &str = "03-report-outcome.json";

/// Returns the dump directory for a request, or `None` if diagnostics are disabled.
///
/// Creates the directory tree. Returns `None` (with a warning) if directory
/// creation fails. Never panics, never blocks the pipeline.
pub fn dump_dir_for(base: Option<&Path>, request_id: &Uuid) -> Option<PathBuf> {
    let dir = base?.join(request_id.to_string());

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "Diagnostic dump: failed to create directory"
        );
        return None;
    }

    Some(dir)
}

// ──────────────────────────────────────────────
// Dump writers
// ──────────────────────────────────────────────

/// Pretty-printed JSON of `value` under `dir/filename`.
///
/// Returns whether the file landed on disk. A value that cannot be
/// serialized writes nothing.
pub fn dump_json<T: serde::Serialize>(dir: &Path, filename: &str, value: &T) -> bool {
    match serde_json::to_vec_pretty(value) {
        Ok(bytes) => write_artifact(dir, filename, &bytes),
        Err(e) => {
            tracing::warn!(file = filename, error = %e, "Diagnostic dump: unserializable value skipped");
            false
        }
    }
}

/// Rendered prompt text under `dir/filename`.
pub fn dump_text(dir: &Path, filename: &str, text: &str) -> bool {
    write_artifact(dir, filename, text.as_bytes())
}

fn write_artifact(dir: &Path, filename: &str, bytes: &[u8]) -> bool {
    let path = dir.join(filename);
    let written = std::fs::write(&path, bytes);
    if let Err(e) = &written {
        tracing::warn!(path = %path.display(), error = %e, "Diagnostic dump: write failed");
    } else {
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Diagnostic dump: written");
    }
    written.is_ok()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_dir_for_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let request_id = Uuid::new_v4();
        let dir = dump_dir_for(Some(tmp.path()), &request_id).unwrap();

        assert!(dir.exists());
        assert!(dir.ends_with(request_id.to_string()));
        assert!(dir.starts_with(tmp.path()));
    }

    #[test]
    fn disabled_without_base_dir() {
        assert!(dump_dir_for(None, &Uuid::new_v4()).is_none());
    }

    #[test]
    fn uncreatable_dir_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        // A regular file cannot hold a subdirectory.
        assert!(dump_dir_for(Some(&file), &Uuid::new_v4()).is_none());
    }

    #[test]
    fn dump_json_writes_pretty_json() {
        let tmp = tempfile::tempdir().unwrap();

        #[derive(serde::Serialize)]
        struct Info {
            name: String,
            value: u32,
        }

        let info = Info {
            name: "test".to_string(),
            value: 42,
        };

        assert!(dump_json(tmp.path(), "info.json", &info));

        let content = std::fs::read_to_string(tmp.path().join("info.json")).unwrap();
        assert!(content.contains("\"name\": \"test\""));
        assert!(content.contains("\"value\": 42"));
        assert!(content.contains('\n'));
    }

    #[test]
    fn dump_text_writes_text() {
        let tmp = tempfile::tempdir().unwrap();
        let prompt = "Задача врача:\nОцените ЭКГ";

        assert!(dump_text(tmp.path(), REPORT_REQUEST_FILE, prompt));

        let content = std::fs::read_to_string(tmp.path().join(REPORT_REQUEST_FILE)).unwrap();
        assert_eq!(content, prompt);
    }

    #[test]
    fn write_failures_do_not_panic() {
        let bad_dir = Path::new("/nonexistent/path/that/does/not/exist");
        assert!(!dump_json(bad_dir, "test.json", &"data"));
        assert!(!dump_text(bad_dir, "test.txt", "data"));
    }

    #[test]
    fn unserializable_value_leaves_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        // JSON object keys must be strings.
        let value: std::collections::HashMap<(u8, u8), u8> = [((1, 2), 3)].into_iter().collect();

        assert!(!dump_json(tmp.path(), EXTRACTION_FILE, &value));
        assert!(!tmp.path().join(EXTRACTION_FILE).exists());
    }
}
