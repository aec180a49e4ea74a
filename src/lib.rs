pub mod accounting;
pub mod commands;
pub mod config;
pub mod error;
pub mod excel;
pub mod export;
pub mod ocr;
pub mod sort;
pub mod store;
pub mod types;
pub mod upload;
pub mod word;

pub use commands::{AppState, BatchReport};
pub use config::Config;
pub use error::{Error, Result};
pub use ocr::{Backend, HttpBackend, OcrMode};
pub use store::FileRecordStore;
