use crate::types::FileId;

/// Shown instead of the raw backend body when the OCR server runs out of GPU memory.
pub const OUT_OF_MEMORY_HINT: &str = "The OCR server ran out of GPU memory. Try fewer pages at a time or retry in a few minutes. \
(เซิร์ฟเวอร์ OCR หน่วยความจำ GPU ไม่เพียงพอ กรุณาลดจำนวนหน้าหรือลองใหม่อีกครั้ง)";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file {0} not found")]
    FileNotFound(FileId),
    #[error("record {0} not found")]
    RecordNotFound(String),
    #[error("store was cleared while the operation was running")]
    Stale,
    #[error("{file_name}: {reason}")]
    Rejected { file_name: String, reason: String },
    #[error("Nothing selected.")]
    EmptySelection,
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Network(String),
    #[error("Backend error ({status}): {body}")]
    Backend { status: u16, body: String },
    #[error("{}", OUT_OF_MEMORY_HINT)]
    BackendOutOfMemory,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Excel export failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("Could not write document: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Could not write document: {0}")]
    Xml(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// True when a backend error body signals GPU memory exhaustion.
pub fn is_out_of_memory(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("out of memory") || lower.contains("outofmemory") || lower.contains("cuda oom")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_out_of_memory_bodies() {
        assert!(is_out_of_memory("RuntimeError: CUDA out of memory. Tried to allocate"));
        assert!(is_out_of_memory("torch.OutOfMemoryError"));
        assert!(!is_out_of_memory("internal server error"));
    }

    #[test]
    fn messages_are_user_facing() {
        let err = Error::Rejected {
            file_name: "a.gif".into(),
            reason: "unsupported file type".into(),
        };
        assert_eq!(err.to_string(), "a.gif: unsupported file type");
        assert_eq!(Error::BackendOutOfMemory.to_string(), OUT_OF_MEMORY_HINT);
    }
}
