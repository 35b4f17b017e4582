//! Remote vision capability: image findings and image OCR through the same
//! chat completions endpoint as report generation.

use std::sync::Arc;

use base64::Engine as _;

use super::chat_types::ChatMessage;
use super::client::ReportClient;
use crate::pipeline::extraction::types::{TextRecognizer, TextSource, VisionAnalyzer};
use crate::pipeline::extraction::ExtractionError;
use crate::pipeline::types::ReportOutcome;

const VISION_MAX_TOKENS: u32 = 1000;
const VISION_TEMPERATURE: f32 = 0.1;
const VISION_TOP_P: f32 = 1.0;

const FINDINGS_PROMPT: &str = "\
Проанализируй медицинское изображение (рентген, УЗИ, КТ, МРТ).

Опиши:
1. Видимые анатомические структуры и патологические изменения.
2. Предварительные выводы и возможные диагнозы.
3. Рекомендуемые дополнительные исследования.
4. Применимые клинические стандарты.

Формат: структурированный отчёт.";

const OCR_PROMPT: &str = "\
Извлеки весь видимый текст с изображения медицинского документа без пересказа и \
комментариев. Таблицы выведи построчно, значения в строке разделяй запятыми \
(параметр, значение, единица, норма).";

/// Vision model behind the report service.
pub struct RemoteVision {
    client: Arc<ReportClient>,
    model: String,
}

impl RemoteVision {
    pub fn new(client: Arc<ReportClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn ask(&self, prompt: &str, bytes: &[u8], media_type: &str) -> ReportOutcome {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let message = ChatMessage::user_with_image(prompt, data_url(media_type, &encoded));
        tracing::debug!(model = %self.model, image_bytes = bytes.len(), "Sending image to vision model");
        self.client.chat(
            &self.model,
            &[message],
            VISION_MAX_TOKENS,
            VISION_TEMPERATURE,
            VISION_TOP_P,
        )
    }
}

fn data_url(media_type: &str, encoded: &str) -> String {
    format!("data:{media_type};base64,{encoded}")
}

/// Content of a successful outcome, or the outcome's error mapped by `wrap`.
fn into_text(outcome: ReportOutcome, wrap: fn(String) -> ExtractionError) -> Result<String, ExtractionError> {
    match (outcome.content, outcome.error) {
        (Some(content), None) => Ok(content.trim().to_string()),
        (_, Some(error)) => Err(wrap(error.to_string())),
        (None, None) => Err(wrap("empty response".to_string())),
    }
}

impl VisionAnalyzer for RemoteVision {
    fn analyze_image(&self, bytes: &[u8], media_type: &str) -> Result<String, ExtractionError> {
        into_text(self.ask(FINDINGS_PROMPT, bytes, media_type), ExtractionError::Vision)
    }
}

impl TextRecognizer for RemoteVision {
    fn extract_text(&self, bytes: &[u8], source: TextSource) -> Result<String, ExtractionError> {
        match source {
            TextSource::Image => {
                let media_type = crate::pipeline::extraction::imaging::media_type_for("", bytes);
                into_text(self.ask(OCR_PROMPT, bytes, &media_type), ExtractionError::OcrProcessing)
            }
            TextSource::Pdf => Err(ExtractionError::OcrProcessing(
                "remote OCR accepts images only".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportClientConfig;
    use crate::pipeline::report::client::tests::stub_server;
    use crate::pipeline::types::{ErrorKind, TokenUsage};

    const OK_BODY: &str =
        r#"{"choices":[{"message":{"content":"  Инфильтративных изменений не выявлено.  "}}]}"#;

    fn vision_for(url: &str, api_key: Option<&str>) -> RemoteVision {
        let client = ReportClient::new(ReportClientConfig {
            api_key: api_key.map(str::to_string),
            endpoint: url.to_string(),
            timeout_secs: 10,
            ..Default::default()
        })
        .unwrap();
        RemoteVision::new(Arc::new(client), "meta-llama/llama-3.2-90b-vision-instruct")
    }

    #[test]
    fn data_url_format() {
        assert_eq!(data_url("image/png", "AAAA"), "data:image/png;base64,AAAA");
    }

    #[test]
    fn findings_are_trimmed_content() {
        let (url, handle) = stub_server(Some((200, OK_BODY)));
        let findings = vision_for(&url, Some("sk-test"))
            .analyze_image(b"\x89PNG fake", "image/png")
            .unwrap();
        let captured = handle.join().unwrap();

        assert_eq!(findings, "Инфильтративных изменений не выявлено.");
        let body: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(body["model"], "meta-llama/llama-3.2-90b-vision-instruct");
        assert_eq!(body["max_tokens"], 1000);
        let url = body["messages"][0]["content"][1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn missing_key_is_a_vision_error() {
        let err = vision_for("http://127.0.0.1:9/v1", None)
            .analyze_image(b"img", "image/jpeg")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Vision(_)));
        assert!(err.to_string().contains("No API key"));
    }

    #[test]
    fn pdf_is_not_sent_for_ocr() {
        let err = vision_for("http://127.0.0.1:9/v1", Some("sk-test"))
            .extract_text(b"%PDF", TextSource::Pdf)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::OcrProcessing(_)));
    }

    #[test]
    fn outcome_mapping() {
        let ok = ReportOutcome::succeeded("text".into(), Some(TokenUsage::default()));
        assert_eq!(into_text(ok, ExtractionError::Vision).unwrap(), "text");

        let failed = ReportOutcome::failed(ErrorKind::RateLimited);
        let err = into_text(failed, ExtractionError::OcrProcessing).unwrap_err();
        assert!(matches!(err, ExtractionError::OcrProcessing(m) if m.contains("429")));
    }
}
