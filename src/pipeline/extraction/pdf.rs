use std::sync::Arc;

use super::types::{TextRecognizer, TextSource};
use super::ExtractionError;

/// Text recognizer for documents.
///
/// PDFs are read from their embedded text layer with pdf-extract. Scanned
/// images need an OCR engine; without one, image input fails with
/// `OcrUnavailable` instead of returning empty text.
pub struct DocumentTextRecognizer {
    image_ocr: Option<Arc<dyn TextRecognizer>>,
}

impl DocumentTextRecognizer {
    /// PDF text layer only.
    pub fn pdf_only() -> Self {
        Self { image_ocr: None }
    }

    /// PDF text layer plus an OCR engine for image input.
    pub fn with_image_ocr(ocr: Arc<dyn TextRecognizer>) -> Self {
        Self {
            image_ocr: Some(ocr),
        }
    }
}

impl TextRecognizer for DocumentTextRecognizer {
    fn extract_text(&self, bytes: &[u8], source: TextSource) -> Result<String, ExtractionError> {
        match source {
            TextSource::Pdf => {
                let text = pdf_extract::extract_text_from_mem(bytes)
                    .map_err(|e| ExtractionError::PdfParsing(e.to_string()))?;
                Ok(text.trim().to_string())
            }
            TextSource::Image => match &self.image_ocr {
                Some(ocr) => ocr.extract_text(bytes, TextSource::Image),
                None => Err(ExtractionError::OcrUnavailable(source.as_str())),
            },
        }
    }
}

// ──────────────────────────────────────────────
// MockTextRecognizer (testing)
// ──────────────────────────────────────────────

/// Mock recognizer returning fixed text regardless of input.
pub struct MockTextRecognizer {
    text: Option<String>,
}

impl MockTextRecognizer {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

impl TextRecognizer for MockTextRecognizer {
    fn extract_text(&self, _bytes: &[u8], _source: TextSource) -> Result<String, ExtractionError> {
        self.text
            .clone()
            .ok_or_else(|| ExtractionError::OcrProcessing("mock OCR failure".into()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Generate a valid PDF with text using lopdf (the library that pdf-extract uses internally).
    pub(crate) fn make_test_pdf(text: &str) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        // Page content stream: BT /F1 12 Tf (text) Tj ET
        let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
        let content_stream = Stream::new(dictionary! {}, content.into_bytes());
        let content_id = doc.add_object(content_stream);

        let resources = dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        };

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });

        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        });

        if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });

        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn extracts_text_layer_from_digital_pdf() {
        let pdf = make_test_pdf("Discharge summary for cardiology");
        let text = DocumentTextRecognizer::pdf_only()
            .extract_text(&pdf, TextSource::Pdf)
            .unwrap();
        assert!(
            text.contains("Discharge") || text.contains("cardiology"),
            "unexpected text: {text}"
        );
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let result = DocumentTextRecognizer::pdf_only().extract_text(b"not a pdf", TextSource::Pdf);
        assert!(matches!(result, Err(ExtractionError::PdfParsing(_))));
    }

    #[test]
    fn image_without_ocr_engine_is_unavailable() {
        let result = DocumentTextRecognizer::pdf_only().extract_text(b"\x89PNG", TextSource::Image);
        let err = result.unwrap_err();
        assert!(matches!(err, ExtractionError::OcrUnavailable("image")));
        assert!(err.to_string().contains("no OCR engine configured"));
    }

    #[test]
    fn image_is_delegated_to_ocr_engine() {
        let recognizer =
            DocumentTextRecognizer::with_image_ocr(Arc::new(MockTextRecognizer::new("Гемоглобин,120,г/л,130-160")));
        let text = recognizer.extract_text(b"\x89PNG", TextSource::Image).unwrap();
        assert!(text.starts_with("Гемоглобин"));
    }
}
