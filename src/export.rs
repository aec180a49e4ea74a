//! Output locations and plain-text export.

use crate::error::{Error, Result};
use crate::types::SourceFile;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

/// Downloads folder, falling back to the Desktop.
pub fn default_output_dir() -> Result<PathBuf> {
    dirs::download_dir()
        .or_else(dirs::desktop_dir)
        .ok_or_else(|| Error::Config("Could not find Downloads or Desktop folder.".to_string()))
}

/// `dir/stem.ext`, or `dir/stem_2.ext`, `dir/stem_3.ext`, ... if taken.
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let mut path = dir.join(format!("{}.{}", stem, ext));
    let mut counter = 2u32;
    while path.exists() {
        path = dir.join(format!("{}_{}.{}", stem, counter, ext));
        counter += 1;
    }
    path
}

/// Bulk export base name with a date suffix, e.g. `accounting_2024-05-01`.
pub fn dated_name(base: &str, date: NaiveDate) -> String {
    let base = base.trim();
    let base = if base.is_empty() { "export" } else { base };
    format!("{}_{}", base, date.format("%Y-%m-%d"))
}

/// Page texts of one file (translation preferred) separated by a blank line.
pub fn file_text(file: &SourceFile) -> String {
    file.pages()
        .iter()
        .map(|p| p.display_text())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One `.txt` per file. Returns the written paths in input order.
pub fn export_text(files: &[SourceFile], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = unique_path(dir, file.stem(), "txt");
        fs::write(&path, file_text(file))?;
        tracing::info!(path = %path.display(), "text exported");
        written.push(path);
    }
    Ok(written)
}

pub fn open_exported(path: &Path) -> Result<()> {
    opener::open(path).map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileId, OcrPage};

    fn file(pages: Vec<OcrPage>) -> SourceFile {
        let mut f = SourceFile::new(FileId(1), "report.pdf", "application/pdf", "");
        f.ocr_result = Some(pages);
        f
    }

    #[test]
    fn single_page_text_has_no_separator() {
        let dir = tempfile::tempdir().unwrap();
        let mut page = OcrPage::new(1, "original");
        page.translate_text = Some("translated".into());
        let paths = export_text(&[file(vec![page])], dir.path()).unwrap();
        assert_eq!(fs::read_to_string(&paths[0]).unwrap(), "translated");
    }

    #[test]
    fn pages_are_joined_with_blank_line() {
        let f = file(vec![OcrPage::new(1, "one"), OcrPage::new(2, r#"{"text":"two"}"#)]);
        assert_eq!(file_text(&f), "one\n\ntwo");
    }

    #[test]
    fn unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "report", "txt");
        fs::write(&first, "x").unwrap();
        let second = unique_path(dir.path(), "report", "txt");
        assert_eq!(second.file_name().unwrap(), "report_2.txt");
    }

    #[test]
    fn dated_name_has_date_suffix() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(dated_name("accounting", date), "accounting_2024-05-01");
        assert_eq!(dated_name(" ", date), "export_2024-05-01");
    }
}
