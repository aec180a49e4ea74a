use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-generated file identifier (milliseconds since epoch, bumped on collision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One uploaded document and, after OCR, its per-page results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub id: FileId,
    pub file_name: String,
    pub file_type: String,
    /// File content, base64, optionally prefixed with `data:<mime>;base64,`.
    #[serde(default)]
    pub base64_data: String,
    /// Local preview handle. Never persisted or sent to the backend.
    #[serde(skip)]
    pub blob_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_result: Option<Vec<OcrPage>>,
}

impl SourceFile {
    pub fn new(id: FileId, file_name: impl Into<String>, file_type: impl Into<String>, base64_data: impl Into<String>) -> Self {
        Self {
            id,
            file_name: file_name.into(),
            file_type: file_type.into(),
            base64_data: base64_data.into(),
            blob_url: None,
            ocr_result: None,
        }
    }

    /// Shallow merge: fields carried by `other` win; absent optional fields and
    /// empty content keep the current value so late partial updates never wipe results.
    pub fn merge_from(&mut self, other: SourceFile) {
        if !other.file_name.is_empty() {
            self.file_name = other.file_name;
        }
        if !other.file_type.is_empty() {
            self.file_type = other.file_type;
        }
        if !other.base64_data.is_empty() {
            self.base64_data = other.base64_data;
        }
        if other.blob_url.is_some() {
            self.blob_url = other.blob_url;
        }
        if let Some(pages) = other.ocr_result {
            self.ocr_result = Some(normalize_pages(pages));
        }
    }

    pub fn pages(&self) -> &[OcrPage] {
        self.ocr_result.as_deref().unwrap_or(&[])
    }

    pub fn page(&self, page: u32) -> Option<&OcrPage> {
        self.pages().iter().find(|p| p.page == page)
    }

    pub fn page_mut(&mut self, page: u32) -> Option<&mut OcrPage> {
        self.ocr_result.as_mut()?.iter_mut().find(|p| p.page == page)
    }

    /// Name without extension, used for export file names.
    pub fn stem(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(pos) if pos > 0 => &self.file_name[..pos],
            _ => &self.file_name,
        }
    }
}

/// One OCR'd page of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrPage {
    pub page: u32,
    #[serde(default)]
    pub extracted_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translate_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_data: Option<ReportData>,
    #[serde(skip)]
    pub blob_url: Option<String>,
    #[serde(default)]
    pub base64_data: String,
}

/// Sort pages by number; when a number repeats, the later page replaces the earlier one.
pub fn normalize_pages(mut pages: Vec<OcrPage>) -> Vec<OcrPage> {
    pages.sort_by_key(|p| p.page);
    let mut out: Vec<OcrPage> = Vec::with_capacity(pages.len());
    for page in pages {
        match out.last_mut() {
            Some(last) if last.page == page.page => *last = page,
            _ => out.push(page),
        }
    }
    out
}

/// What the extractor has to work with for a page.
#[derive(Debug, Clone, Copy)]
pub enum PageSource<'a> {
    Structured(&'a ReportData),
    Text(&'a str),
    Empty,
}

impl OcrPage {
    pub fn new(page: u32, extracted_text: impl Into<String>) -> Self {
        Self {
            page,
            extracted_text: extracted_text.into(),
            translate_text: None,
            report_data: None,
            blob_url: None,
            base64_data: String::new(),
        }
    }

    /// Decoded OCR envelope; plain text when `extracted_text` is not JSON.
    pub fn envelope(&self) -> TextEnvelope {
        TextEnvelope::parse(&self.extracted_text)
    }

    /// Translation if present, otherwise the OCR text.
    pub fn display_text(&self) -> String {
        match self.translate_text.as_deref() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => self.envelope().text,
        }
    }

    pub fn source(&self) -> PageSource<'_> {
        if let Some(report) = &self.report_data {
            return PageSource::Structured(report);
        }
        if self.extracted_text.trim().is_empty() {
            PageSource::Empty
        } else {
            PageSource::Text(&self.extracted_text)
        }
    }
}

/// Invoice fields as returned by the accounting OCR backend. Values arrive as
/// strings or numbers, so they are kept as raw JSON and coerced on use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportData {
    #[serde(default)]
    pub invoice_date: Option<serde_json::Value>,
    #[serde(default)]
    pub invoice_no: Option<serde_json::Value>,
    #[serde(default)]
    pub seller_name: Option<serde_json::Value>,
    #[serde(default)]
    pub seller_tax_id: Option<serde_json::Value>,
    #[serde(default)]
    pub branch: Option<serde_json::Value>,
    #[serde(default)]
    pub product_value: Option<serde_json::Value>,
    #[serde(default)]
    pub vat: Option<serde_json::Value>,
    #[serde(default)]
    pub total_amount: Option<serde_json::Value>,
}

/// Render a loosely-typed report value as text ("" for null/missing).
pub fn report_value_text(value: &Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// OCR text, possibly delivered wrapped in a JSON object with metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextEnvelope {
    pub text: String,
    pub language: Option<String>,
    pub rotation: Option<f64>,
}

impl TextEnvelope {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(trimmed) {
                let text = ["text", "extractedText", "content"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(|v| v.as_str()));
                if let Some(text) = text {
                    return Self {
                        text: text.to_string(),
                        language: obj
                            .get("language")
                            .or_else(|| obj.get("lang"))
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        rotation: obj
                            .get("rotation")
                            .or_else(|| obj.get("angle"))
                            .and_then(|v| v.as_f64()),
                    };
                }
            }
        }
        Self {
            text: raw.to_string(),
            language: None,
            rotation: None,
        }
    }
}

/// Which extraction tier produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionTier {
    Structured,
    Regex,
    Heuristic,
    Placeholder,
}

/// Accounting view of a single OCR page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingRecord {
    pub id: String,
    pub file_id: FileId,
    pub page: u32,
    pub invoice_date: String,
    pub invoice_no: String,
    pub seller_name: String,
    pub seller_tax_id: String,
    pub branch: String,
    pub product_value: f64,
    pub vat: f64,
    pub total_amount: f64,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub is_temporary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub tier: ExtractionTier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_collapses_repeated_page_numbers() {
        let mut file = SourceFile::new(FileId(1), "a.pdf", "application/pdf", "");
        let mut incoming = SourceFile::new(FileId(1), "", "", "");
        incoming.ocr_result = Some(vec![
            OcrPage::new(2, "two"),
            OcrPage::new(1, "first one"),
            OcrPage::new(1, "second one"),
        ]);
        file.merge_from(incoming);
        let pages: Vec<(u32, &str)> = file
            .pages()
            .iter()
            .map(|p| (p.page, p.extracted_text.as_str()))
            .collect();
        assert_eq!(pages, vec![(1, "second one"), (2, "two")]);
    }

    #[test]
    fn envelope_unwraps_json_text() {
        let env = TextEnvelope::parse(r#"{"text":"hello","language":"th","rotation":90}"#);
        assert_eq!(env.text, "hello");
        assert_eq!(env.language.as_deref(), Some("th"));
        assert_eq!(env.rotation, Some(90.0));
    }

    #[test]
    fn envelope_keeps_plain_text_and_unrelated_json() {
        assert_eq!(TextEnvelope::parse("plain").text, "plain");
        assert_eq!(TextEnvelope::parse(r#"{"other":1}"#).text, r#"{"other":1}"#);
    }

    #[test]
    fn merge_keeps_results_when_update_has_none() {
        let mut file = SourceFile::new(FileId(1), "a.pdf", "application/pdf", "AAA");
        file.ocr_result = Some(vec![OcrPage::new(1, "x")]);
        file.merge_from(SourceFile::new(FileId(1), "renamed.pdf", "", ""));
        assert_eq!(file.file_name, "renamed.pdf");
        assert_eq!(file.file_type, "application/pdf");
        assert_eq!(file.base64_data, "AAA");
        assert_eq!(file.pages().len(), 1);
    }

    #[test]
    fn merge_sorts_incoming_pages() {
        let mut file = SourceFile::new(FileId(1), "a.pdf", "application/pdf", "");
        let mut update = file.clone();
        update.ocr_result = Some(vec![OcrPage::new(2, "b"), OcrPage::new(1, "a")]);
        file.merge_from(update);
        let pages: Vec<u32> = file.pages().iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![1, 2]);
    }

    #[test]
    fn page_source_prefers_report_data() {
        let mut page = OcrPage::new(1, "text");
        assert!(matches!(page.source(), PageSource::Text("text")));
        page.report_data = Some(ReportData::default());
        assert!(matches!(page.source(), PageSource::Structured(_)));
        assert!(matches!(OcrPage::new(1, "  ").source(), PageSource::Empty));
    }

    #[test]
    fn stem_strips_extension() {
        let file = SourceFile::new(FileId(1), "scan.final.pdf", "application/pdf", "");
        assert_eq!(file.stem(), "scan.final");
    }
}
