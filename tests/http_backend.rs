mod common;

use common::{closed_port_url, spawn_stub_server};
use pretty_assertions::assert_eq;
use std::time::Duration;
use takumi_ocr_lib::ocr::{AccountingSavePayload, OcrSubmission, SavePage, SaveReportData};
use takumi_ocr_lib::{Backend, Config, Error, HttpBackend, OcrMode};

fn config_for(base: &str) -> Config {
    Config {
        ocr_url: Some(format!("{}/ocr", base)),
        accounting_ocr_url: Some(format!("{}/ocr-accounting", base)),
        translate_url: Some(format!("{}/translate", base)),
        accounting_save_url: Some(format!("{}/accounting/save", base)),
        user_id: Some("user-1".into()),
        request_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn submission() -> OcrSubmission {
    OcrSubmission {
        file_name: "invoice.pdf".into(),
        file_type: "application/pdf".into(),
        base64_data: "JVBERi0=".into(),
    }
}

#[test]
fn ocr_posts_camel_case_files_and_parses_pages() {
    let (base, log) = spawn_stub_server(|_| {
        (
            200,
            r#"[{"fileName":"invoice.pdf","ocrResult":[
                {"page":1,"base64Data":"AA==","extractedText":"hello"},
                {"page":2,"base64Data":"","extractedText":"","reportData":{"sellerName":"ACME"}}
            ]}]"#
                .to_string(),
        )
    });
    let backend = HttpBackend::new(config_for(&base)).unwrap();

    let results = backend.submit_ocr(&[submission()], OcrMode::Accounting).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].ocr_result.len(), 2);
    assert_eq!(results[0].ocr_result[0].extracted_text, "hello");
    assert!(results[0].ocr_result[1].report_data.is_some());

    let log = log.lock().unwrap();
    assert_eq!(log[0].path, "/ocr-accounting");
    let sent: serde_json::Value = serde_json::from_str(&log[0].body).unwrap();
    assert_eq!(sent[0]["fileName"], "invoice.pdf");
    assert_eq!(sent[0]["base64Data"], "JVBERi0=");
}

#[test]
fn out_of_memory_body_maps_to_hint() {
    let (base, _) = spawn_stub_server(|_| (500, "RuntimeError: CUDA out of memory.".to_string()));
    let backend = HttpBackend::new(config_for(&base)).unwrap();
    let err = backend.submit_ocr(&[submission()], OcrMode::General).unwrap_err();
    assert!(matches!(err, Error::BackendOutOfMemory));
    assert!(err.to_string().contains("GPU memory"));
}

#[test]
fn empty_error_body_reports_status() {
    let (base, _) = spawn_stub_server(|_| (404, String::new()));
    let backend = HttpBackend::new(config_for(&base)).unwrap();
    match backend.translate("hello", "th").unwrap_err() {
        Error::Backend { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "Invalid endpoint?");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn translate_sends_target_language_and_reads_plain_body() {
    let (base, log) = spawn_stub_server(|_| (200, "สวัสดี".to_string()));
    let backend = HttpBackend::new(config_for(&base)).unwrap();
    assert_eq!(backend.translate("hello", "th").unwrap(), "สวัสดี");

    let log = log.lock().unwrap();
    let sent: serde_json::Value = serde_json::from_str(&log[0].body).unwrap();
    assert_eq!(sent["text"], "hello");
    assert_eq!(sent["targetLanguageCode"], "th");
}

#[test]
fn save_posts_payload() {
    let (base, log) = spawn_stub_server(|_| (200, "{}".to_string()));
    let backend = HttpBackend::new(config_for(&base)).unwrap();
    let payload = AccountingSavePayload {
        user_id: "user-1".into(),
        file_name: "invoice.pdf".into(),
        file_type: "application/pdf".into(),
        page_number: 1,
        pages: vec![SavePage {
            page: 1,
            base64_data: "AA==".into(),
        }],
        report_data: SaveReportData {
            invoice_date: "2024-01-15".into(),
            invoice_no: "INV-1".into(),
            seller_name: "ACME".into(),
            seller_tax_id: "0105551234567".into(),
            branch: "00000".into(),
            product_value: "1000".into(),
            vat: "70".into(),
            total_amount: "1070".into(),
        },
    };
    backend.save_accounting_page(&payload).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0].path, "/accounting/save");
    let sent: serde_json::Value = serde_json::from_str(&log[0].body).unwrap();
    assert_eq!(sent["userId"], "user-1");
    assert_eq!(sent["reportData"]["invoiceNo"], "INV-1");
}

#[test]
fn missing_endpoint_is_a_config_error() {
    let backend = HttpBackend::new(Config::default()).unwrap();
    let err = backend.translate("hello", "th").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(err.to_string(), "TAKUMI_TRANSLATE_URL not set in .env");
}

#[test]
fn refused_connection_asks_to_check_network() {
    let backend = HttpBackend::new(config_for(&closed_port_url())).unwrap();
    let err = backend.submit_ocr(&[submission()], OcrMode::General).unwrap_err();
    assert_eq!(err.to_string(), "Check your internet connection and try again.");
}
