//! Derivation of accounting records from OCR pages.
//!
//! Each page goes through three tiers, first hit wins:
//! 1. structured `reportData` from the accounting OCR backend,
//! 2. a table of labelled bilingual (Thai/English) regexes over the page text,
//! 3. a loose heuristic scan (company-looking line near the top, first
//!    date-like and document-number-like substrings).
//!
//! Pages with no text at all produce a placeholder record. Every page yields a
//! record; parse problems never escape this module.

use crate::error::{Error, Result};
use crate::sort::sort_records;
use crate::store::FileRecordStore;
use crate::types::{report_value_text, AccountingRecord, ExtractionTier, OcrPage, PageSource, ReportData, SourceFile};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

pub const NO_DATA_SELLER: &str = "No data extracted";
pub const UNKNOWN_SELLER: &str = "Unknown";

const HEURISTIC_SCAN_LINES: usize = 15;
const COMPANY_MARKERS: &[&str] = &["บริษัท", "company", "ltd", "จำกัด", "corporation"];

/// Inputs shared by every record of one derivation pass.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub today: NaiveDate,
    pub created_by: Option<String>,
}

impl ExtractContext {
    pub fn now(created_by: Option<String>) -> Self {
        Self {
            today: chrono::Local::now().date_naive(),
            created_by,
        }
    }
}

/// Keep digits, `.` and `-`, then take the longest leading part that reads
/// as a number (`1,500.-` is 1500). "0" when nothing numeric is left.
pub fn clean_numeric_value(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    // ASCII only, so every index is a char boundary.
    (1..=cleaned.len())
        .rev()
        .map(|end| &cleaned[..end])
        .find(|prefix| prefix.parse::<f64>().is_ok())
        .map(|prefix| prefix.trim_end_matches('.').to_string())
        .unwrap_or_else(|| "0".to_string())
}

pub fn parse_amount(raw: &str) -> f64 {
    clean_numeric_value(raw).parse().unwrap_or(0.0)
}

fn iso_shape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{1,2}-\d{1,2}$").expect("iso date regex"))
}

fn dmy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("dmy date regex"))
}

fn date_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{4}-\d{1,2}-\d{1,2}|\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4})\b").expect("date-like regex")
    })
}

fn doc_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b((?:INV|TIV|IV|RE|RC|BL|DOC|TAX)[\-/#]?\s?\d[A-Z0-9\-/]*)").expect("doc number regex")
    })
}

const GENERIC_DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d/%m/%y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y%m%d",
];

/// Normalize a date to `YYYY-MM-DD`, falling back to `today` when the input is
/// empty or unparseable. ISO-shaped input is passed through untouched.
pub fn convert_date_format_on(raw: &str, today: NaiveDate) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return today.format("%Y-%m-%d").to_string();
    }
    if iso_shape_re().is_match(s) {
        return s.to_string();
    }
    if let Some(caps) = dmy_re().captures(s) {
        return format!("{}-{:0>2}-{:0>2}", &caps[3], &caps[2], &caps[1]);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return dt.date_naive().format("%Y-%m-%d").to_string();
    }
    for fmt in GENERIC_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.format("%Y-%m-%d").to_string();
        }
    }
    tracing::warn!(input = s, "unparseable invoice date, using today's date");
    today.format("%Y-%m-%d").to_string()
}

pub fn convert_date_format(raw: &str) -> String {
    convert_date_format_on(raw, chrono::Local::now().date_naive())
}

/// Dates inside a labelled value often carry trailing text; prefer the date-like part.
fn normalize_labelled_date(value: &str, today: NaiveDate) -> String {
    let candidate = date_like_re()
        .find(value)
        .map(|m| m.as_str())
        .unwrap_or(value);
    convert_date_format_on(candidate, today)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    InvoiceDate,
    InvoiceNo,
    SellerName,
    SellerTaxId,
    Branch,
    ProductValue,
    Vat,
    TotalAmount,
}

/// Extra acceptance test for a captured value.
type Check = fn(&str) -> bool;

/// A bare `เลขที่` also prefixes street addresses ("เลขที่ 99 ถนน…").
fn looks_like_document_number(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_alphabetic()) || value.chars().filter(char::is_ascii_digit).count() >= 5
}

const FIELD_PATTERNS: &[(Field, &str, Option<Check>)] = &[
    (
        Field::InvoiceDate,
        r"(?i)(?:\b(?:Invoice\s*Date|Date)\b|วันที่ใบกำกับภาษี|วันที่)[:\s]*([^\n\r]+)",
        None,
    ),
    (
        Field::InvoiceNo,
        r"(?i)(?:\b(?:Tax\s*Invoice\s*No|Invoice\s*No|Doc(?:ument)?\s*No)\b\.?|เลขที่ใบกำกับภาษี)[:\s#]*([A-Za-z0-9][A-Za-z0-9\-/]*)",
        None,
    ),
    (
        Field::InvoiceNo,
        r"เลขที่[:\s#]*([A-Za-z0-9][A-Za-z0-9\-/]*)",
        Some(looks_like_document_number),
    ),
    (
        Field::SellerName,
        r"(?i)(?:\b(?:Seller\s*Name|Seller|Vendor|Company\s*Name)\b|ชื่อผู้ขาย|ผู้ขาย)[:\s]*([^\n\r]+)",
        None,
    ),
    (
        Field::SellerTaxId,
        r"(?i)(?:\b(?:Tax\s*Identification\s*No|Tax\s*ID)\b\.?|เลขประจำตัวผู้เสียภาษีอากร|เลขประจำตัวผู้เสียภาษี)[:\s]*(\d[\d\-\s]{8,20}\d)",
        None,
    ),
    (
        Field::Branch,
        r"(?i)(?:\bBranch\b|สาขาที่|สาขา)[:\s]*([^\n\r]+)",
        None,
    ),
    (
        Field::ProductValue,
        r"(?i)(?:\b(?:Sub\s*Total|Product\s*Value)\b|มูลค่าสินค้า|รวมเงิน)[:\s]*([\d,]+(?:\.\d+)?)",
        None,
    ),
    (
        Field::Vat,
        r"(?i)(?:\bVAT\b|ภาษีมูลค่าเพิ่ม)(?:\s*7\s*%)?[:\s]*([\d,]+(?:\.\d+)?)",
        None,
    ),
    (
        Field::TotalAmount,
        r"(?i)(?:\b(?:Grand\s*Total|Total\s*Amount|Total)\b|ยอดรวมทั้งสิ้น|จำนวนเงินรวมทั้งสิ้น|รวมทั้งสิ้น|ยอดรวม)[:\s]*([\d,]+(?:\.\d+)?)",
        None,
    ),
];

fn field_regexes() -> &'static [(Field, Regex, Option<Check>)] {
    static RES: OnceLock<Vec<(Field, Regex, Option<Check>)>> = OnceLock::new();
    RES.get_or_init(|| {
        FIELD_PATTERNS
            .iter()
            .map(|(field, pattern, check)| (*field, Regex::new(pattern).expect("field regex"), *check))
            .collect()
    })
}

/// Raw per-field matches from the labelled regex table.
#[derive(Debug, Default, Clone, PartialEq)]
struct RegexFields {
    invoice_date: String,
    invoice_no: String,
    seller_name: String,
    seller_tax_id: String,
    branch: String,
    product_value: String,
    vat: String,
    total_amount: String,
}

impl RegexFields {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::InvoiceDate => &mut self.invoice_date,
            Field::InvoiceNo => &mut self.invoice_no,
            Field::SellerName => &mut self.seller_name,
            Field::SellerTaxId => &mut self.seller_tax_id,
            Field::Branch => &mut self.branch,
            Field::ProductValue => &mut self.product_value,
            Field::Vat => &mut self.vat,
            Field::TotalAmount => &mut self.total_amount,
        }
    }
}

fn match_fields(text: &str) -> RegexFields {
    let mut out = RegexFields::default();
    for (field, re, check) in field_regexes() {
        let slot = out.slot(*field);
        if !slot.is_empty() {
            continue;
        }
        let mut values = re
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|v| !v.is_empty() && check.map_or(true, |ok| ok(*v)));
        // "Total" also matches inside "Sub Total"; the grand total is normally
        // the last one on the page.
        let value = if *field == Field::TotalAmount {
            values.last()
        } else {
            values.next()
        };
        if let Some(value) = value {
            *slot = value.to_string();
        }
    }
    out.seller_tax_id = out.seller_tax_id.chars().filter(|c| c.is_ascii_digit()).collect();
    out
}

fn guess_company_line(text: &str) -> Option<String> {
    text.lines()
        .take(HEURISTIC_SCAN_LINES)
        .map(str::trim)
        .find(|line| {
            let lower = line.to_lowercase();
            COMPANY_MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(String::from)
}

/// Fields produced by one tier, before the record envelope is added.
struct Extracted {
    tier: ExtractionTier,
    invoice_date: String,
    invoice_no: String,
    seller_name: String,
    seller_tax_id: String,
    branch: String,
    product_value: f64,
    vat: f64,
    total_amount: f64,
}

fn from_report(report: &ReportData, today: NaiveDate) -> Extracted {
    Extracted {
        tier: ExtractionTier::Structured,
        invoice_date: convert_date_format_on(&report_value_text(&report.invoice_date), today),
        invoice_no: report_value_text(&report.invoice_no),
        seller_name: report_value_text(&report.seller_name),
        seller_tax_id: report_value_text(&report.seller_tax_id),
        branch: report_value_text(&report.branch),
        product_value: parse_amount(&report_value_text(&report.product_value)),
        vat: parse_amount(&report_value_text(&report.vat)),
        total_amount: parse_amount(&report_value_text(&report.total_amount)),
    }
}

fn guess_document_number(text: &str) -> Option<String> {
    doc_number_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn or_else_with(value: String, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() {
        fallback()
    } else {
        value
    }
}

fn from_text(text: &str, fallback_no: String, today: NaiveDate) -> Extracted {
    let fields = match_fields(text);
    if !fields.is_empty() {
        tracing::debug!("regex tier matched");
        return Extracted {
            tier: ExtractionTier::Regex,
            invoice_date: normalize_labelled_date(&fields.invoice_date, today),
            invoice_no: or_else_with(fields.invoice_no, || guess_document_number(text).unwrap_or(fallback_no)),
            seller_name: or_else_with(fields.seller_name, || {
                guess_company_line(text).unwrap_or_else(|| UNKNOWN_SELLER.to_string())
            }),
            seller_tax_id: fields.seller_tax_id,
            branch: fields.branch,
            product_value: parse_amount(&fields.product_value),
            vat: parse_amount(&fields.vat),
            total_amount: parse_amount(&fields.total_amount),
        };
    }

    tracing::debug!("no labelled fields, falling back to heuristic scan");
    let date = date_like_re().find(text).map(|m| m.as_str()).unwrap_or("");
    Extracted {
        tier: ExtractionTier::Heuristic,
        invoice_date: convert_date_format_on(date, today),
        invoice_no: guess_document_number(text).unwrap_or(fallback_no),
        seller_name: guess_company_line(text).unwrap_or_else(|| UNKNOWN_SELLER.to_string()),
        seller_tax_id: String::new(),
        branch: String::new(),
        product_value: 0.0,
        vat: 0.0,
        total_amount: 0.0,
    }
}

fn placeholder(fallback_no: String, today: NaiveDate) -> Extracted {
    Extracted {
        tier: ExtractionTier::Placeholder,
        invoice_date: today.format("%Y-%m-%d").to_string(),
        invoice_no: fallback_no,
        seller_name: NO_DATA_SELLER.to_string(),
        seller_tax_id: String::new(),
        branch: String::new(),
        product_value: 0.0,
        vat: 0.0,
        total_amount: 0.0,
    }
}

pub fn record_id(file: &SourceFile, page: &OcrPage) -> String {
    format!("{}-page-{}", file.id, page.page)
}

pub fn record_filename(file: &SourceFile, page: &OcrPage) -> String {
    format!("{} (Page {})", file.file_name, page.page)
}

/// Build the accounting record for one page. Never fails.
pub fn extract_record(file: &SourceFile, page: &OcrPage, ctx: &ExtractContext) -> AccountingRecord {
    let fallback_no = format!("{}-P{}", file.file_name, page.page);
    let extracted = match page.source() {
        PageSource::Structured(report) => from_report(report, ctx.today),
        PageSource::Text(_) => {
            let envelope = page.envelope();
            if envelope.text.trim().is_empty() {
                placeholder(fallback_no, ctx.today)
            } else {
                from_text(&envelope.text, fallback_no, ctx.today)
            }
        }
        PageSource::Empty => placeholder(fallback_no, ctx.today),
    };
    AccountingRecord {
        id: record_id(file, page),
        file_id: file.id,
        page: page.page,
        invoice_date: extracted.invoice_date,
        invoice_no: extracted.invoice_no,
        seller_name: extracted.seller_name,
        seller_tax_id: extracted.seller_tax_id,
        branch: extracted.branch,
        product_value: extracted.product_value,
        vat: extracted.vat,
        total_amount: extracted.total_amount,
        filename: record_filename(file, page),
        image_url: page.blob_url.clone().or_else(|| file.blob_url.clone()),
        is_temporary: true,
        created_by: ctx.created_by.clone(),
        tier: extracted.tier,
    }
}

/// One record per OCR page across `files`, sorted by file name and page.
pub fn derive_records(files: &[SourceFile], ctx: &ExtractContext) -> Vec<AccountingRecord> {
    let mut records: Vec<AccountingRecord> = files
        .iter()
        .flat_map(|file| file.pages().iter().map(move |page| extract_record(file, page, ctx)))
        .collect();
    sort_records(&mut records);
    records
}

/// Cached, sorted records for the current store contents. Recomputed from
/// scratch whenever the store version moves; local edits do not survive a
/// recompute since they are never written back to the OCR results.
#[derive(Debug, Default)]
pub struct AccountingView {
    version: Option<u64>,
    records: Vec<AccountingRecord>,
}

impl AccountingView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the records were re-derived.
    pub fn refresh(&mut self, store: &FileRecordStore, ctx: &ExtractContext) -> bool {
        let version = store.version();
        if self.version == Some(version) {
            return false;
        }
        self.records = derive_records(&store.snapshot(), ctx);
        self.version = Some(version);
        true
    }

    pub fn records(&self) -> &[AccountingRecord] {
        &self.records
    }

    /// Replace the record with the same id (the edit-modal save path).
    pub fn apply_edit(&mut self, edited: AccountingRecord) -> Result<()> {
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.id == edited.id)
            .ok_or_else(|| Error::RecordNotFound(edited.id.clone()))?;
        *slot = edited;
        Ok(())
    }

    pub fn mark_saved(&mut self, id: &str) -> Result<()> {
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        slot.is_temporary = false;
        Ok(())
    }

    /// Records whose id is in `ids`, in display order. An empty `ids` selects all.
    pub fn select(&self, ids: &[String]) -> Vec<AccountingRecord> {
        self.records
            .iter()
            .filter(|r| ids.is_empty() || ids.contains(&r.id))
            .cloned()
            .collect()
    }
}
