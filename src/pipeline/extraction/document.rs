use std::sync::Arc;

use serde::Serialize;

use super::lab::{evaluate_rows, rows_from_text, LabRow};
use super::types::{truncate_chars, Extraction, ModalityHandler, TextRecognizer, TextSource};
use super::ExtractionError;
use crate::pipeline::intent::resolve_extension;
use crate::pipeline::types::{ModalityTag, Payload, Task};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentPayload {
    pub source: &'static str,
    /// Characters recognized, before capping.
    pub char_count: usize,
    pub text: String,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lab_rows: Vec<LabRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lab_flags: Vec<String>,
}

/// Scanned or digital document: recognize text, keep a bounded copy, and pick
/// up any lab rows embedded in it.
pub struct DocumentHandler {
    recognizer: Arc<dyn TextRecognizer>,
    max_chars: usize,
}

impl DocumentHandler {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, max_chars: usize) -> Self {
        Self {
            recognizer,
            max_chars,
        }
    }
}

impl ModalityHandler for DocumentHandler {
    fn modality(&self) -> ModalityTag {
        ModalityTag::Document
    }

    fn extract(&self, task: &Task) -> Result<Extraction, ExtractionError> {
        let artifact = &task.artifact;
        let source = match resolve_extension(&artifact.file_name, Some(&artifact.bytes)).as_deref() {
            Some("pdf") => TextSource::Pdf,
            _ => TextSource::Image,
        };

        let text = self.recognizer.extract_text(&artifact.bytes, source)?;
        let char_count = text.chars().count();

        let mut warnings = Vec::new();
        if char_count == 0 && source == TextSource::Pdf {
            warnings.push("PDF has no text layer; scanned pages were not recognized".to_string());
        }

        let lab_rows = rows_from_text(&text);
        let lab_flags = evaluate_rows(&lab_rows).flags;

        tracing::debug!(
            source = source.as_str(),
            text_len = char_count,
            lab_rows = lab_rows.len(),
            "Document text recognized"
        );

        let mut summary = format!("Извлечено символов: {char_count}");
        if !lab_flags.is_empty() {
            summary.push_str(". ");
            summary.push_str(&lab_flags.join("; "));
        }

        let kept = truncate_chars(&text, self.max_chars);
        let payload = DocumentPayload {
            source: source.as_str(),
            char_count,
            truncated: kept.len() < text.len(),
            text: kept.to_string(),
            lab_rows,
            lab_flags,
        };
        let mut extraction = Extraction::new(summary, Payload::Document(payload));
        extraction.warnings = warnings;
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::pdf::tests::make_test_pdf;
    use crate::pipeline::extraction::pdf::{DocumentTextRecognizer, MockTextRecognizer};
    use crate::pipeline::types::Artifact;

    fn document_payload(extraction: &Extraction) -> &DocumentPayload {
        match &extraction.payload {
            Payload::Document(p) => p,
            other => panic!("expected document payload, got {other:?}"),
        }
    }

    #[test]
    fn summary_reports_character_count() {
        let task = Task::new("выписка", Artifact::new("note.png", b"png".to_vec()));
        let handler = DocumentHandler::new(Arc::new(MockTextRecognizer::new("Диагноз: ИБС")), 4000);
        let extraction = handler.extract(&task).unwrap();
        assert_eq!(extraction.summary, "Извлечено символов: 12");
        let payload = document_payload(&extraction);
        assert_eq!(payload.source, "image");
        assert!(!payload.truncated);
        assert!(payload.lab_rows.is_empty());
    }

    #[test]
    fn text_is_capped() {
        let long = "а".repeat(500);
        let task = Task::new("", Artifact::new("note.png", b"png".to_vec()));
        let handler = DocumentHandler::new(Arc::new(MockTextRecognizer::new(&long)), 100);
        let extraction = handler.extract(&task).unwrap();
        let payload = document_payload(&extraction);
        assert_eq!(payload.char_count, 500);
        assert_eq!(payload.text.chars().count(), 100);
        assert!(payload.truncated);
    }

    #[test]
    fn lab_rows_in_text_are_flagged() {
        let text = "Параметр,Значение,Единица,Норма\nГемоглобин,110,г/л,130-160\nСОЭ,8,мм/ч,2-15\n";
        let task = Task::new("анализ", Artifact::new("scan.jpg", b"jpg".to_vec()));
        let handler = DocumentHandler::new(Arc::new(MockTextRecognizer::new(text)), 4000);
        let extraction = handler.extract(&task).unwrap();
        let payload = document_payload(&extraction);
        assert_eq!(payload.lab_rows.len(), 2);
        assert_eq!(payload.lab_flags, vec!["Гемоглобин: 110 вне нормы (130-160)"]);
        assert!(extraction.summary.ends_with("Гемоглобин: 110 вне нормы (130-160)"));
    }

    #[test]
    fn reads_pdf_text_layer() {
        let task = Task::new(
            "выписка",
            Artifact::new("discharge.pdf", make_test_pdf("Discharge summary")),
        );
        let handler = DocumentHandler::new(Arc::new(DocumentTextRecognizer::pdf_only()), 4000);
        let extraction = handler.extract(&task).unwrap();
        let payload = document_payload(&extraction);
        assert_eq!(payload.source, "pdf");
        assert!(payload.char_count > 0);
    }

    #[test]
    fn image_without_ocr_fails() {
        let task = Task::new("выписка", Artifact::new("scan.png", b"\x89PNG".to_vec()));
        let handler = DocumentHandler::new(Arc::new(DocumentTextRecognizer::pdf_only()), 4000);
        let err = handler.extract(&task).unwrap_err();
        assert!(err.to_string().contains("no OCR engine configured"));
    }

    #[test]
    fn ocr_failure_propagates() {
        let task = Task::new("", Artifact::new("scan.png", b"png".to_vec()));
        let handler = DocumentHandler::new(Arc::new(MockTextRecognizer::failing()), 4000);
        assert!(matches!(
            handler.extract(&task),
            Err(ExtractionError::OcrProcessing(_))
        ));
    }
}
