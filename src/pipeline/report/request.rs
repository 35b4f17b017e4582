use crate::config::PipelineSettings;
use crate::pipeline::extraction::truncate_chars;
use crate::pipeline::types::{ExtractionResult, ModalityTag, ReportRequest, Task};

/// Persona for every report, whatever the modality.
pub const SYSTEM_PROMPT: &str = "\
Ты опытный врач-консультант, помогающий коллегам интерпретировать результаты \
обследований: ЭКГ, лабораторные анализы, медицинские изображения и медицинские \
документы. Отвечай на русском языке, опирайся на действующие клинические \
рекомендации и доказательную медицину, явно указывай ограничения исходных данных. \
Твой ответ носит вспомогательный характер и не заменяет очную консультацию врача.";

const REPORT_INSTRUCTIONS: &str = "\
Подготовь структурированный отчёт:
1. Описание находок.
2. Предварительные выводы.
3. Рекомендации согласно клиническим стандартам.
4. Рекомендуемые дополнительные исследования.
5. Тактика лечения и наблюдения.";

const NO_DESCRIPTION: &str = "(описание задачи не предоставлено)";
const UNRECOGNIZED_NOTE: &str =
    "Тип файла не распознан, данные не извлечены. Ответь на основании описания задачи.";

/// Composes the bounded prompt for one task.
#[derive(Debug, Clone)]
pub struct ReportRequestBuilder {
    max_context_chars: usize,
    max_prompt_chars: usize,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

impl ReportRequestBuilder {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            max_context_chars: settings.max_context_chars,
            max_prompt_chars: settings.max_prompt_chars,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
        }
    }

    /// Build the request. The user prompt never exceeds `max_prompt_chars`,
    /// however large the description or payload.
    pub fn build(&self, task: &Task, extraction: &ExtractionResult) -> ReportRequest {
        let context = self.context_block(extraction);

        let description = task.description.trim();
        let description = if description.is_empty() { NO_DESCRIPTION } else { description };

        let fixed_chars = compose(&context, "").chars().count();
        let description_budget = self.max_prompt_chars.saturating_sub(fixed_chars);
        let description = truncate_chars(description, description_budget);

        let mut user_prompt = compose(&context, description);
        if user_prompt.chars().count() > self.max_prompt_chars {
            // Only reachable when the fixed blocks alone overflow a tiny cap.
            user_prompt = truncate_chars(&user_prompt, self.max_prompt_chars).to_string();
        }

        ReportRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    /// Everything the model should know about the artifact.
    fn context_block(&self, extraction: &ExtractionResult) -> String {
        let mut block = format!("Тип данных: {}\n", extraction.modality());

        if extraction.modality() == ModalityTag::Unknown {
            block.push_str(UNRECOGNIZED_NOTE);
            block.push('\n');
        } else if extraction.error().is_none() {
            // A failed result's summary is its error text, stated once below.
            block.push_str("Краткая сводка: ");
            block.push_str(truncate_chars(extraction.summary(), self.max_context_chars));
            block.push('\n');
        }

        if let Some(error) = extraction.error() {
            block.push_str(&format!("Ошибка извлечения данных: {error}\n"));
        }
        for warning in extraction.warnings() {
            block.push_str(&format!("Предупреждение: {warning}\n"));
        }

        if let Some(payload) = extraction.payload() {
            let serialized = serde_json::to_string(payload)
                .unwrap_or_else(|e| format!("<payload could not be serialized: {e}>"));
            let capped = truncate_chars(&serialized, self.max_context_chars);
            if capped.len() < serialized.len() {
                block.push_str(&format!(
                    "Извлечённые данные (JSON, усечено до {} символов):\n",
                    self.max_context_chars
                ));
            } else {
                block.push_str("Извлечённые данные (JSON):\n");
            }
            block.push_str(capped);
            block.push('\n');
        }
        block
    }
}

fn compose(context: &str, description: &str) -> String {
    format!("Задача врача:\n{description}\n\n{context}\n{REPORT_INSTRUCTIONS}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::document::DocumentPayload;
    use crate::pipeline::extraction::lab::LabPayload;
    use crate::pipeline::types::{Artifact, ErrorKind, Payload};

    fn builder() -> ReportRequestBuilder {
        ReportRequestBuilder::new(&PipelineSettings::default())
    }

    fn document_result(text: String) -> ExtractionResult {
        let payload = DocumentPayload {
            source: "pdf",
            char_count: text.chars().count(),
            text,
            truncated: false,
            lab_rows: vec![],
            lab_flags: vec![],
        };
        ExtractionResult::extracted(ModalityTag::Document, "Извлечено символов: много", Payload::Document(payload))
    }

    fn lab_result() -> ExtractionResult {
        let payload = LabPayload {
            row_count: 1,
            column_count: 4,
            columns: vec!["Parameter".into(), "Value".into(), "Unit".into(), "ReferenceRange".into()],
            missing_values: Default::default(),
            preview: vec![vec!["Glucose".into(), "7.5".into(), "mmol/L".into(), "3.9-6.1".into()]],
            flags: vec!["Glucose: 7.5 вне нормы (3.9-6.1)".into()],
            unparsed: 0,
        };
        ExtractionResult::extracted(ModalityTag::Lab, "Glucose: 7.5 вне нормы (3.9-6.1)", Payload::Lab(payload))
    }

    fn task(description: &str) -> Task {
        Task::new(description, Artifact::new("file.pdf", b"%PDF".to_vec()))
    }

    #[test]
    fn prompt_contains_description_summary_and_payload() {
        let request = builder().build(&task("Оцените уровень глюкозы"), &lab_result());
        assert!(request.user_prompt.contains("Оцените уровень глюкозы"));
        assert!(request.user_prompt.contains("Тип данных: LAB"));
        assert!(request.user_prompt.contains("Glucose: 7.5 вне нормы (3.9-6.1)"));
        assert!(request.user_prompt.contains("\"row_count\":1"));
        assert!(request.user_prompt.contains("Тактика лечения"));
        assert_eq!(request.system_prompt, SYSTEM_PROMPT);
    }

    #[test]
    fn generation_parameters_come_from_settings() {
        let request = builder().build(&task("x"), &lab_result());
        assert_eq!(request.max_tokens, 1400);
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
        assert!((request.top_p - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn huge_payload_is_truncated_to_cap() {
        let result = document_result("т".repeat(100_000));
        let request = builder().build(&task("выписка"), &result);
        let settings = PipelineSettings::default();
        assert!(request.user_prompt.chars().count() <= settings.max_prompt_chars);
        assert!(request.user_prompt.contains("усечено до 2000 символов"));
        assert!(request.user_prompt.contains("выписка"));
        assert!(request.user_prompt.contains("Тактика лечения"));
    }

    #[test]
    fn huge_description_is_truncated_to_cap() {
        let description = "боль в груди ".repeat(5_000);
        let request = builder().build(&task(&description), &document_result("т".repeat(50_000)));
        assert!(request.user_prompt.chars().count() <= 6000);
        assert!(request.user_prompt.ends_with("Тактика лечения и наблюдения."));
    }

    #[test]
    fn tiny_cap_is_still_honored() {
        let settings = PipelineSettings {
            max_context_chars: 10,
            max_prompt_chars: 50,
            ..Default::default()
        };
        let request = ReportRequestBuilder::new(&settings).build(&task("описание"), &lab_result());
        assert!(request.user_prompt.chars().count() <= 50);
    }

    #[test]
    fn extraction_error_is_included_verbatim() {
        let error = ErrorKind::ExtractionFailed {
            modality: ModalityTag::Ecg,
            cause: "Missing expected columns: signal column".into(),
        };
        let result = ExtractionResult::failed(ModalityTag::Ecg, error.clone());
        let request = builder().build(&task("ЭКГ"), &result);
        assert!(request.user_prompt.contains(&error.to_string()));
        assert!(!request.user_prompt.contains("Извлечённые данные"));
    }

    #[test]
    fn extraction_error_is_stated_once() {
        let error = ErrorKind::ExtractionFailed {
            modality: ModalityTag::Lab,
            cause: "Missing expected columns: Parameter, Value".into(),
        };
        let result = ExtractionResult::failed(ModalityTag::Lab, error.clone());
        let request = builder().build(&task("анализ крови"), &result);

        assert_eq!(request.user_prompt.matches(&error.to_string()).count(), 1);
        assert!(!request.user_prompt.contains("Краткая сводка"));
        assert!(request.user_prompt.contains("Тип данных: LAB"));
    }

    #[test]
    fn unknown_modality_uses_description_only() {
        let request = builder().build(&task("Что означает этот файл?"), &ExtractionResult::unrecognized());
        assert!(request.user_prompt.contains("Тип данных: UNKNOWN"));
        assert!(request.user_prompt.contains(UNRECOGNIZED_NOTE));
        assert!(request.user_prompt.contains("Что означает этот файл?"));
    }

    #[test]
    fn blank_description_is_marked() {
        let request = builder().build(&task("   "), &lab_result());
        assert!(request.user_prompt.contains(NO_DESCRIPTION));
    }

    #[test]
    fn system_prompt_does_not_vary_by_modality() {
        let a = builder().build(&task("a"), &lab_result());
        let b = builder().build(&task("b"), &ExtractionResult::unrecognized());
        assert_eq!(a.system_prompt, b.system_prompt);
    }
}
