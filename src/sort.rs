use crate::types::AccountingRecord;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

fn page_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(.+?)\s*\(Page\s*(\d+)\)$").expect("page suffix regex"))
}

/// Split `"name.pdf (Page 3)"` into `("name.pdf", 3)`. Names without the
/// suffix are treated as page 1.
pub fn parse_record_filename(filename: &str) -> (&str, u32) {
    if let Some(caps) = page_suffix_re().captures(filename) {
        if let (Some(base), Some(page)) = (caps.get(1), caps.get(2)) {
            if let Ok(n) = page.as_str().parse::<u32>() {
                return (base.as_str(), n);
            }
        }
    }
    (filename, 1)
}

/// Case-insensitive collation with a case-sensitive tie-break, so the order is total.
fn collate(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| a.cmp(b))
}

pub fn compare_filenames(a: &str, b: &str) -> Ordering {
    let (base_a, page_a) = parse_record_filename(a);
    let (base_b, page_b) = parse_record_filename(b);
    collate(base_a, base_b).then(page_a.cmp(&page_b))
}

/// Order records by base file name, then page number. Stable.
pub fn sort_records(records: &mut [AccountingRecord]) {
    records.sort_by(|a, b| compare_filenames(&a.filename, &b.filename));
}
