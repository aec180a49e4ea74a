use crate::error::{Error, Result};
use crate::types::{FileId, SourceFile};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const ACCEPTED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg"];

/// MIME type for an accepted extension (case-insensitive).
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

fn extension_of(file_name: &str) -> &str {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

/// Check extension and size before anything touches the network.
/// The limit is inclusive: `size / 1024 / 1024 > max_mb` is rejected.
pub fn validate_upload(file_name: &str, size: u64, max_mb: f64) -> Result<()> {
    if mime_for_extension(extension_of(file_name)).is_none() {
        return Err(Error::Rejected {
            file_name: file_name.to_string(),
            reason: format!(
                "Unsupported file type. Allowed: {}.",
                ACCEPTED_EXTENSIONS.join(", ")
            ),
        });
    }
    let size_mb = size as f64 / 1024.0 / 1024.0;
    if size_mb > max_mb {
        return Err(Error::Rejected {
            file_name: file_name.to_string(),
            reason: format!("File too large ({:.2}MB, max {}MB).", size_mb, max_mb),
        });
    }
    Ok(())
}

/// Mints time-based ids; a collision with the previous id is resolved by
/// moving forward one step, so ids stay unique and increasing.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self) -> FileId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = if now > current { now } else { current + 1 };
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return FileId(next),
                Err(actual) => current = actual,
            }
        }
    }
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Strip a `data:<mime>;base64,` prefix if present.
pub fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some(pos) = data.find(";base64,") {
            return &data[pos + ";base64,".len()..];
        }
    }
    data
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(strip_data_url(data).trim())?)
}

/// A file picked by the user, not yet validated.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub accepted: Vec<SourceFile>,
    pub rejected: Vec<Error>,
}

/// Validate each upload independently; rejected files do not stop the batch.
pub fn prepare_uploads(uploads: Vec<PendingUpload>, ids: &IdGenerator, max_mb: f64) -> UploadReport {
    let mut report = UploadReport::default();
    for upload in uploads {
        if let Err(e) = validate_upload(&upload.file_name, upload.bytes.len() as u64, max_mb) {
            tracing::warn!("{}", e);
            report.rejected.push(e);
            continue;
        }
        let mime = mime_for_extension(extension_of(&upload.file_name)).unwrap_or("application/octet-stream");
        report.accepted.push(SourceFile::new(
            ids.mint(),
            upload.file_name,
            mime,
            to_data_url(mime, &upload.bytes),
        ));
    }
    report
}

/// Read files from disk. Size and type are checked from metadata before the
/// content is read.
pub fn read_paths(paths: &[PathBuf], ids: &IdGenerator, max_mb: f64) -> UploadReport {
    let mut report = UploadReport::default();
    for path in paths {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        let checked = fs::metadata(path)
            .map_err(|e| read_error(&file_name, e))
            .and_then(|meta| validate_upload(&file_name, meta.len(), max_mb))
            .and_then(|_| fs::read(path).map_err(|e| read_error(&file_name, e)));
        match checked {
            Ok(bytes) => {
                let mut batch = prepare_uploads(vec![PendingUpload { file_name, bytes }], ids, max_mb);
                report.accepted.append(&mut batch.accepted);
                report.rejected.append(&mut batch.rejected);
            }
            Err(e) => {
                tracing::warn!("{}", e);
                report.rejected.push(e);
            }
        }
    }
    report
}

fn read_error(file_name: &str, e: io::Error) -> Error {
    let reason = if e.kind() == io::ErrorKind::NotFound {
        "File not found.".to_string()
    } else {
        format!("Could not read file: {}", e)
    };
    Error::Rejected {
        file_name: file_name.to_string(),
        reason,
    }
}

fn preview_extension(data: &str, fallback: &str) -> String {
    data.strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .and_then(|mime| mime.split('/').nth(1))
        .map(|sub| if sub == "jpeg" { "jpg".to_string() } else { sub.to_string() })
        .unwrap_or_else(|| fallback.to_string())
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Decode the file and its page images into `dir` and point `blob_url` at them.
pub fn materialize_preview(file: &mut SourceFile, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    if !file.base64_data.is_empty() {
        let ext = extension_of(&file.file_name).to_ascii_lowercase();
        let path = dir.join(format!("{}.{}", file.id, if ext.is_empty() { "bin" } else { ext.as_str() }));
        fs::write(&path, decode_base64(&file.base64_data)?)?;
        file.blob_url = Some(file_url(&path));
    }
    let id = file.id;
    if let Some(pages) = file.ocr_result.as_mut() {
        for page in pages.iter_mut().filter(|p| !p.base64_data.is_empty()) {
            let ext = preview_extension(&page.base64_data, "png");
            let path = dir.join(format!("{}_p{}.{}", id, page.page, ext));
            fs::write(&path, decode_base64(&page.base64_data)?)?;
            page.blob_url = Some(file_url(&path));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OcrPage;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn rejects_unsupported_extensions_only() {
        let uploads = vec![
            PendingUpload { file_name: "a.pdf".into(), bytes: vec![1] },
            PendingUpload { file_name: "b.gif".into(), bytes: vec![1] },
            PendingUpload { file_name: "c.JPEG".into(), bytes: vec![1] },
            PendingUpload { file_name: "noext".into(), bytes: vec![1] },
        ];
        let report = prepare_uploads(uploads, &IdGenerator::new(), 10.0);
        let names: Vec<&str> = report.accepted.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "c.JPEG"]);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.accepted[1].file_type, "image/jpeg");
        assert!(report.accepted[0].base64_data.starts_with("data:application/pdf;base64,"));
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(validate_upload("a.pdf", 10 * MB, 10.0).is_ok());
        let just_over = (10.01 * MB as f64) as u64;
        assert!(matches!(
            validate_upload("a.pdf", just_over, 10.0),
            Err(Error::Rejected { .. })
        ));
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let ids = IdGenerator::new();
        let minted: Vec<FileId> = (0..100).map(|_| ids.mint()).collect();
        for pair in minted.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn data_url_round_trip() {
        let url = to_data_url("image/png", b"abc");
        assert_eq!(strip_data_url(&url), "YWJj");
        assert_eq!(decode_base64(&url).unwrap(), b"abc");
        assert_eq!(strip_data_url("YWJj"), "YWJj");
    }

    #[test]
    fn read_paths_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("scan.png");
        fs::write(&good, b"png").unwrap();
        let report = read_paths(&[good, dir.path().join("missing.pdf")], &IdGenerator::new(), 10.0);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].to_string().contains("File not found."));
    }

    #[test]
    fn preview_writes_file_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = SourceFile::new(FileId(7), "doc.pdf", "application/pdf", to_data_url("application/pdf", b"%PDF-1"));
        let mut page = OcrPage::new(1, "text");
        page.base64_data = to_data_url("image/jpeg", b"jpg");
        file.ocr_result = Some(vec![page]);
        materialize_preview(&mut file, dir.path()).unwrap();
        assert_eq!(fs::read(dir.path().join("7.pdf")).unwrap(), b"%PDF-1");
        assert_eq!(fs::read(dir.path().join("7_p1.jpg")).unwrap(), b"jpg");
        assert!(file.pages()[0].blob_url.as_deref().unwrap().starts_with("file://"));
        assert!(file.blob_url.is_some());
    }
}
