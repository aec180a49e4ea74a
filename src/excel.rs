use crate::error::Result;
use crate::export::{file_text, unique_path};
use crate::types::{AccountingRecord, SourceFile};
use regex::Regex;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Formula, Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Remove or replace characters that can corrupt Excel's sheet XML and cause "unreadable content".
/// Drops control chars (except tab, newline, CR).
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

/// Estimate column width from text length (char count × 1.2, clamped 10–50).
fn estimate_text_width(text: &str) -> f64 {
    let w = text.chars().count() as f64 * 1.2;
    w.clamp(10.0, 50.0)
}

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0x2563EB))
        .set_font_color(Color::RGB(0xFFFFFF))
}

// ---------------------------------------------------------------------------
// Markdown text -> worksheet
// ---------------------------------------------------------------------------

/// A markdown cell after the link, bold and math transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellContent {
    pub text: String,
    pub link: Option<String>,
    pub bold: bool,
}

impl CellContent {
    /// `HYPERLINK` formula for linked cells.
    pub fn formula(&self) -> Option<String> {
        self.link.as_ref().map(|url| {
            format!(
                "=HYPERLINK(\"{}\",\"{}\")",
                url.replace('"', "\"\""),
                self.text.replace('"', "\"\"")
            )
        })
    }
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("markdown link regex"))
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold regex"))
}

fn display_math_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\$(.+?)\$\$").expect("display math regex"))
}

fn bracket_math_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\\[(.+?)\\\]").expect("bracket math regex"))
}

fn table_separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^:?-{3,}:?$").expect("table separator regex"))
}

/// Apply, in order: markdown link -> hyperlink, `**bold**` -> bold flag,
/// `$$...$$` / `\[...\]` -> plain content.
pub fn transform_cell(raw: &str) -> CellContent {
    let link = link_re().captures(raw).map(|c| c[2].to_string());
    let text = link_re().replace_all(raw, "$1").into_owned();

    let bold = bold_re().is_match(&text);
    let text = bold_re().replace_all(&text, "$1").into_owned();

    let text = display_math_re().replace_all(&text, "$1").into_owned();
    let text = bracket_math_re().replace_all(&text, "$1").into_owned();

    CellContent {
        text: text.trim().to_string(),
        link,
        bold,
    }
}

/// A blank-line separated chunk of the markdown text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Table { headers: Vec<String>, rows: Vec<Vec<String>> },
    Lines(Vec<String>),
}

fn split_table_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    trimmed.split('|').map(|c| c.trim().to_string()).collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty() && cells.iter().all(|c| table_separator_re().is_match(c))
}

/// Split text into paragraphs; a paragraph with more than one `|` is a table.
pub fn parse_markdown_blocks(text: &str) -> Vec<Block> {
    let normalized = text.replace("\r\n", "\n");
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    for line in normalized.split('\n').chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            paragraph.push(line);
            continue;
        }
        if paragraph.is_empty() {
            continue;
        }
        let joined = paragraph.join("\n");
        if joined.matches('|').count() > 1 {
            let mut rows = paragraph
                .iter()
                .map(|l| split_table_row(l))
                .filter(|cells| !is_separator_row(cells));
            let headers = rows.next().unwrap_or_default();
            blocks.push(Block::Table {
                headers,
                rows: rows.collect(),
            });
        } else {
            blocks.push(Block::Lines(paragraph.iter().map(|l| l.trim_end().to_string()).collect()));
        }
        paragraph.clear();
    }
    blocks
}

fn write_markdown_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    raw: &str,
    base: &Format,
) -> std::result::Result<(), XlsxError> {
    let cell = transform_cell(raw);
    let format = if cell.bold { base.clone().set_bold() } else { base.clone() };
    match cell.formula() {
        Some(formula) => worksheet.write_formula_with_format(row, col, Formula::new(formula), &format)?,
        None => worksheet.write_string_with_format(row, col, sanitize_cell(&cell.text), &format)?,
    };
    Ok(())
}

/// Lay the markdown blocks out on `worksheet`. Returns the number of rows used.
pub fn write_markdown_sheet(worksheet: &mut Worksheet, text: &str) -> Result<u32> {
    let plain = Format::new().set_text_wrap();
    let bordered = Format::new().set_border(FormatBorder::Thin);
    let header = bordered.clone().set_bold();
    let mut widths: Vec<f64> = Vec::new();
    let mut row = 0u32;

    for block in parse_markdown_blocks(text) {
        match block {
            Block::Table { headers, rows } => {
                for (col, cell) in headers.iter().enumerate() {
                    write_markdown_cell(worksheet, row, col as u16, cell, &header)?;
                    track_width(&mut widths, col, cell);
                }
                row += 1;
                for cells in rows {
                    for (col, cell) in cells.iter().enumerate() {
                        write_markdown_cell(worksheet, row, col as u16, cell, &bordered)?;
                        track_width(&mut widths, col, cell);
                    }
                    row += 1;
                }
            }
            Block::Lines(lines) => {
                for line in lines {
                    write_markdown_cell(worksheet, row, 0, &line, &plain)?;
                    row += 1;
                }
            }
        }
        row += 1;
    }

    for (col, w) in widths.iter().enumerate() {
        worksheet.set_column_width(col as u16, *w)?;
    }
    Ok(row.saturating_sub(1))
}

fn track_width(widths: &mut Vec<f64>, col: usize, text: &str) {
    if widths.len() <= col {
        widths.resize(col + 1, 10.0);
    }
    let w = estimate_text_width(&transform_cell(text).text);
    if w > widths[col] {
        widths[col] = w;
    }
}

/// Write markdown-flavoured text to a new workbook at `path`.
pub fn export_markdown_excel(text: &str, sheet_name: &str, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;
    write_markdown_sheet(worksheet, text)?;
    workbook.save(path)?;
    Ok(())
}

/// One workbook per file, built from its page texts.
pub fn export_files_excel(files: &[SourceFile], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = unique_path(dir, file.stem(), "xlsx");
        export_markdown_excel(&file_text(file), "OCR", &path)?;
        tracing::info!(path = %path.display(), "excel exported");
        written.push(path);
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// Accounting records -> worksheet
// ---------------------------------------------------------------------------

/// Headers for the accounting export (English / Thai).
pub const ACCOUNTING_HEADERS: &[&str] = &[
    "Invoice Date / วันที่",
    "Invoice No. / เลขที่",
    "Seller / ผู้ขาย",
    "Tax ID / เลขประจำตัวผู้เสียภาษี",
    "Branch / สาขา",
    "Product Value / มูลค่าสินค้า",
    "VAT / ภาษีมูลค่าเพิ่ม",
    "Total / ยอดรวม",
    "File / ไฟล์",
];

const AMOUNT_COLUMNS: [usize; 3] = [5, 6, 7];

fn record_text_columns(r: &AccountingRecord) -> [&str; 6] {
    [
        r.invoice_date.as_str(),
        r.invoice_no.as_str(),
        r.seller_name.as_str(),
        r.seller_tax_id.as_str(),
        r.branch.as_str(),
        r.filename.as_str(),
    ]
}

/// Per-column widths: max of header and cell widths; amount columns fixed at 14.
fn calculate_accounting_column_widths(records: &[AccountingRecord]) -> Vec<f64> {
    const AMOUNT_WIDTH: f64 = 14.0;
    let mut widths: Vec<f64> = ACCOUNTING_HEADERS.iter().map(|h| estimate_text_width(h)).collect();
    let text_cols = [0usize, 1, 2, 3, 4, 8];
    for r in records {
        for (value, &col) in record_text_columns(r).iter().zip(text_cols.iter()) {
            let w = estimate_text_width(value);
            if w > widths[col] {
                widths[col] = w;
            }
        }
    }
    for idx in AMOUNT_COLUMNS {
        widths[idx] = AMOUNT_WIDTH;
    }
    widths
}

/// Write `records` as a table to a new workbook at `path`.
pub fn export_accounting_excel(records: &[AccountingRecord], path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Accounting")?;

    let header = header_format();
    let text_format = Format::new().set_text_wrap().set_border(FormatBorder::Thin);
    let amount_format = Format::new()
        .set_num_format("#,##0.00")
        .set_align(FormatAlign::Right)
        .set_border(FormatBorder::Thin);

    for (col, w) in calculate_accounting_column_widths(records).iter().enumerate() {
        worksheet.set_column_width(col as u16, *w)?;
    }
    for (col, h) in ACCOUNTING_HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *h, &header)?;
    }

    for (idx, r) in records.iter().enumerate() {
        let row = (idx + 1) as u32;
        let text = record_text_columns(r);
        for (col, value) in text[..5].iter().enumerate() {
            worksheet.write_string_with_format(row, col as u16, sanitize_cell(value), &text_format)?;
        }
        for (col, amount) in AMOUNT_COLUMNS.iter().zip([r.product_value, r.vat, r.total_amount]) {
            worksheet.write_number_with_format(row, *col as u16, amount, &amount_format)?;
        }
        worksheet.write_string_with_format(row, 8, sanitize_cell(&r.filename), &text_format)?;
    }

    worksheet.set_freeze_panes(1, 0)?;
    workbook.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn transforms_apply_in_order() {
        let cell = transform_cell("[**Docs**](https://example.com/a)");
        assert_eq!(cell.text, "Docs");
        assert_eq!(cell.link.as_deref(), Some("https://example.com/a"));
        assert!(cell.bold);
        assert_eq!(
            cell.formula().unwrap(),
            "=HYPERLINK(\"https://example.com/a\",\"Docs\")"
        );

        let math = transform_cell(r"area $$x^2$$ and \[y+1\]");
        assert_eq!(math.text, "area x^2 and y+1");
        assert!(!math.bold);
        assert!(math.link.is_none());
    }

    #[test]
    fn formula_escapes_quotes() {
        let cell = transform_cell(r#"[say "hi"](http://x)"#);
        assert_eq!(cell.formula().unwrap(), r#"=HYPERLINK("http://x","say ""hi""")"#);
    }

    #[test]
    fn parses_tables_and_paragraphs() {
        let text = "Title line\nsecond line\n\n| Item | Qty |\n|---|:---:|\n| Pen | 2 |\n| Ink | 1 |\n\nA | lone pipe";
        let blocks = parse_markdown_blocks(text);
        assert_eq!(
            blocks,
            vec![
                Block::Lines(vec!["Title line".into(), "second line".into()]),
                Block::Table {
                    headers: vec!["Item".into(), "Qty".into()],
                    rows: vec![vec!["Pen".into(), "2".into()], vec!["Ink".into(), "1".into()]],
                },
                Block::Lines(vec!["A | lone pipe".into()]),
            ]
        );
    }

    #[test]
    fn accounting_widths_fix_amount_columns() {
        let widths = calculate_accounting_column_widths(&[]);
        assert_eq!(widths.len(), ACCOUNTING_HEADERS.len());
        assert_eq!(widths[5], 14.0);
        assert_eq!(widths[7], 14.0);
    }

    #[test]
    fn sanitize_drops_control_chars() {
        assert_eq!(sanitize_cell("a\u{1}b\tc"), "ab\tc");
    }
}
