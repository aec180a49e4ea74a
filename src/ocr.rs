//! HTTP client for the OCR, translation and accounting-save backend.

use crate::config::Config;
use crate::error::{is_out_of_memory, Error, Result};
use crate::types::{OcrPage, SourceFile};
use crate::upload::strip_data_url;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};

/// Which OCR endpoint to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// Plain text recognition (OCR / translate workflows).
    General,
    /// Invoice recognition; pages come back with `reportData`.
    Accounting,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrSubmission {
    pub file_name: String,
    pub file_type: String,
    pub base64_data: String,
}

impl From<&SourceFile> for OcrSubmission {
    fn from(file: &SourceFile) -> Self {
        Self {
            file_name: file.file_name.clone(),
            file_type: file.file_type.clone(),
            base64_data: strip_data_url(&file.base64_data).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrFileResult {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub ocr_result: Vec<OcrPage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateRequest<'a> {
    text: &'a str,
    target_language_code: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePage {
    pub page: u32,
    pub base64_data: String,
}

/// Invoice fields as the save endpoint expects them: every value a string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReportData {
    pub invoice_date: String,
    pub invoice_no: String,
    pub seller_name: String,
    pub seller_tax_id: String,
    pub branch: String,
    pub product_value: String,
    pub vat: String,
    pub total_amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingSavePayload {
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub page_number: u32,
    pub pages: Vec<SavePage>,
    pub report_data: SaveReportData,
}

/// The external backend. Implemented over HTTP by [`HttpBackend`].
pub trait Backend: Send + Sync {
    fn submit_ocr(&self, files: &[OcrSubmission], mode: OcrMode) -> Result<Vec<OcrFileResult>>;
    fn translate(&self, text: &str, target_language: &str) -> Result<String>;
    fn save_accounting_page(&self, payload: &AccountingSavePayload) -> Result<()>;
}

pub struct HttpBackend {
    client: Client,
    config: Config,
}

impl HttpBackend {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        let response = self.client.post(url).json(body).send().map_err(|e| {
            Error::Network(
                if e.is_connect() || e.is_timeout() {
                    "Check your internet connection and try again."
                } else {
                    "Network error."
                }
                .to_string(),
            )
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        if is_out_of_memory(&body) {
            tracing::warn!(%status, "backend reported GPU memory exhaustion");
            return Err(Error::BackendOutOfMemory);
        }
        Err(Error::Backend {
            status: status.as_u16(),
            body: if body.is_empty() {
                "Invalid endpoint?".to_string()
            } else {
                body
            },
        })
    }
}

impl Backend for HttpBackend {
    fn submit_ocr(&self, files: &[OcrSubmission], mode: OcrMode) -> Result<Vec<OcrFileResult>> {
        let url = match mode {
            OcrMode::General => Config::require(&self.config.ocr_url, "TAKUMI_OCR_URL")?,
            OcrMode::Accounting => {
                Config::require(&self.config.accounting_ocr_url, "TAKUMI_ACCOUNTING_OCR_URL")?
            }
        };
        tracing::debug!(files = files.len(), ?mode, "submitting OCR request");
        let response = self.post_json(url, files)?;
        let body = response.text().map_err(|e| Error::Network(e.to_string()))?;
        if is_out_of_memory(&body) && serde_json::from_str::<serde_json::Value>(&body).is_err() {
            return Err(Error::BackendOutOfMemory);
        }
        let results: Vec<OcrFileResult> = serde_json::from_str(&body)?;
        if results.is_empty() {
            return Err(Error::InvalidResponse("OCR returned no files".to_string()));
        }
        Ok(results)
    }

    fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        let url = Config::require(&self.config.translate_url, "TAKUMI_TRANSLATE_URL")?;
        let response = self.post_json(
            url,
            &TranslateRequest {
                text,
                target_language_code: target_language,
            },
        )?;
        let body = response.text().map_err(|e| Error::Network(e.to_string()))?;
        Ok(parse_translation(&body))
    }

    fn save_accounting_page(&self, payload: &AccountingSavePayload) -> Result<()> {
        let url = Config::require(&self.config.accounting_save_url, "TAKUMI_ACCOUNTING_SAVE_URL")?;
        self.post_json(url, payload)?;
        Ok(())
    }
}

/// The translation endpoint answers with the text itself, a JSON string, or
/// an object carrying the text under one of a few keys.
pub fn parse_translation(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Object(obj)) => ["translatedText", "translateText", "translation", "text", "result"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
            .map(String::from)
            .unwrap_or_else(|| body.to_string()),
        _ => body.to_string(),
    }
}
