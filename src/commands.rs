//! Workflow operations over the shared store: upload, OCR, translate,
//! accounting review/save and export. The CLI is a thin layer over these.

use crate::accounting::{AccountingView, ExtractContext};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::excel;
use crate::export::{self, dated_name, unique_path};
use crate::ocr::{AccountingSavePayload, Backend, OcrMode, OcrSubmission, SavePage, SaveReportData};
use crate::store::FileRecordStore;
use crate::types::{normalize_pages, AccountingRecord, FileId, OcrPage, SourceFile};
use crate::upload::{self, strip_data_url, IdGenerator, PendingUpload, UploadReport};
use crate::word;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

/// How many individual failures a summary lists before collapsing the rest.
const SUMMARY_ERROR_LIMIT: usize = 3;

/// Outcome of a batch where each item can fail on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failures: Vec<String>,
}

impl BatchReport {
    fn fail(&mut self, label: &str, error: &Error) {
        tracing::warn!("{}: {}", label, error);
        self.failures.push(format!("{}: {}", label, error));
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// First few failures, then "+N more".
    pub fn summary(&self) -> Option<String> {
        summarize_errors(&self.failures)
    }
}

pub fn summarize_errors(errors: &[String]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let mut text = errors
        .iter()
        .take(SUMMARY_ERROR_LIMIT)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if errors.len() > SUMMARY_ERROR_LIMIT {
        text.push_str(&format!("\n+{} more", errors.len() - SUMMARY_ERROR_LIMIT));
    }
    Some(text)
}

pub struct AppState {
    pub store: FileRecordStore,
    pub config: Config,
    backend: Arc<dyn Backend>,
    ids: IdGenerator,
    view: Mutex<AccountingView>,
}

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        Self::with_store(FileRecordStore::new(), config, backend)
    }

    pub fn with_store(store: FileRecordStore, config: Config, backend: Arc<dyn Backend>) -> Self {
        Self {
            store,
            config,
            backend,
            ids: IdGenerator::new(),
            view: Mutex::new(AccountingView::new()),
        }
    }

    fn view(&self) -> MutexGuard<'_, AccountingView> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn extract_context(&self) -> ExtractContext {
        ExtractContext::now(self.config.user_id.clone())
    }

    // ---- Upload ----

    /// Read, validate and add files from disk. Rejected files are reported, not fatal.
    pub fn add_files(&self, paths: &[PathBuf]) -> UploadReport {
        let mut report = upload::read_paths(paths, &self.ids, self.config.max_upload_mb);
        self.add_accepted(&mut report);
        report
    }

    pub fn add_uploads(&self, uploads: Vec<PendingUpload>) -> UploadReport {
        let mut report = upload::prepare_uploads(uploads, &self.ids, self.config.max_upload_mb);
        self.add_accepted(&mut report);
        report
    }

    fn add_accepted(&self, report: &mut UploadReport) {
        let outcome = self.store.add(report.accepted.clone());
        if !outcome.duplicates.is_empty() {
            report.accepted.retain(|f| !outcome.duplicates.contains(&f.id));
        }
        tracing::info!(added = outcome.added, rejected = report.rejected.len(), "files added");
    }

    /// Add already-built records (e.g. previously saved OCR output).
    pub fn load_files(&self, files: Vec<SourceFile>) -> usize {
        let files = files
            .into_iter()
            .map(|mut f| {
                f.ocr_result = f.ocr_result.take().map(normalize_pages);
                f
            })
            .collect();
        self.store.add(files).added
    }

    pub fn remove_file(&self, id: FileId) -> Result<()> {
        self.store.remove(id)
    }

    /// Write preview images for every file and record their `file://` URLs.
    pub fn materialize_previews(&self, dir: &Path) -> Result<usize> {
        let generation = self.store.generation();
        let mut files = self.store.snapshot();
        for file in files.iter_mut() {
            upload::materialize_preview(file, dir)?;
        }
        let count = files.len();
        self.store.update_many_if_current(generation, files)?;
        Ok(count)
    }

    // ---- OCR ----

    /// Re-run OCR over the current files. Previous results are dropped first;
    /// files fail independently and chunks of `ocr_concurrency` run in parallel.
    pub fn run_ocr(&self, mode: OcrMode) -> Result<BatchReport> {
        let files: Vec<SourceFile> = self
            .store
            .snapshot()
            .into_iter()
            .map(|mut f| {
                f.ocr_result = None;
                f
            })
            .collect();
        if files.is_empty() {
            return Err(Error::EmptySelection);
        }
        self.store.clear();
        self.store.add(files.clone());
        let generation = self.store.generation();
        let backend: &dyn Backend = self.backend.as_ref();
        let mut report = BatchReport::default();
        tracing::info!(files = files.len(), ?mode, "OCR started");

        for chunk in files.chunks(self.config.ocr_concurrency.max(1)) {
            let outcomes: Vec<(&SourceFile, Result<Vec<OcrPage>>)> = thread::scope(|s| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|file| (file, s.spawn(move || ocr_one(backend, file, mode))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(file, h)| {
                        let outcome = h
                            .join()
                            .unwrap_or_else(|_| Err(Error::InvalidResponse("OCR task panicked".to_string())));
                        (file, outcome)
                    })
                    .collect()
            });

            let mut merged = Vec::new();
            for (file, outcome) in outcomes {
                match outcome {
                    Ok(pages) => {
                        tracing::debug!(file = %file.file_name, pages = pages.len(), "OCR file done");
                        let mut update = SourceFile::new(file.id, "", "", "");
                        update.ocr_result = Some(pages);
                        merged.push(update);
                        report.succeeded += 1;
                    }
                    Err(e) => report.fail(&file.file_name, &e),
                }
            }
            self.store.update_many_if_current(generation, merged)?;
        }
        tracing::info!(succeeded = report.succeeded, failed = report.failures.len(), "OCR finished");
        Ok(report)
    }

    // ---- Translation ----

    /// Translate every OCR page with text into `target_language`. Pages are
    /// handed out to a pool of `translate_concurrency` workers and merged by
    /// file id and page number as they finish.
    pub fn translate(&self, target_language: &str) -> Result<BatchReport> {
        let generation = self.store.generation();
        let jobs: Vec<TranslateJob> = self
            .store
            .snapshot()
            .iter()
            .flat_map(|file| {
                file.pages().iter().filter_map(move |page| {
                    let text = page.envelope().text;
                    (!text.trim().is_empty()).then(|| TranslateJob {
                        file_id: file.id,
                        label: format!("{} (Page {})", file.file_name, page.page),
                        page: page.page,
                        text,
                    })
                })
            })
            .collect();
        if jobs.is_empty() {
            return Err(Error::EmptySelection);
        }

        let workers = self.config.translate_concurrency.clamp(1, jobs.len());
        let next = AtomicUsize::new(0);
        let backend: &dyn Backend = self.backend.as_ref();
        let store = &self.store;
        tracing::info!(pages = jobs.len(), workers, target_language, "translation started");

        let partials: Vec<BatchReport> = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let (jobs, next) = (&jobs, &next);
                    s.spawn(move || {
                        let mut report = BatchReport::default();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(job) = jobs.get(i) else { break };
                            let outcome = backend.translate(&job.text, target_language).and_then(|translated| {
                                store.patch_if_current(generation, job.file_id, |file| {
                                    if let Some(page) = file.page_mut(job.page) {
                                        page.translate_text = Some(translated);
                                    }
                                })
                            });
                            match outcome {
                                Ok(()) => report.succeeded += 1,
                                Err(e) => report.fail(&job.label, &e),
                            }
                        }
                        report
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| BatchReport {
                        succeeded: 0,
                        failures: vec!["translation worker panicked".to_string()],
                    })
                })
                .collect()
        });

        let mut report = BatchReport::default();
        for part in partials {
            report.succeeded += part.succeeded;
            report.failures.extend(part.failures);
        }
        if store.generation() != generation {
            return Err(Error::Stale);
        }
        tracing::info!(succeeded = report.succeeded, failed = report.failures.len(), "translation finished");
        Ok(report)
    }

    // ---- Accounting ----

    /// Current records, re-derived if the store changed since the last call.
    pub fn records(&self) -> Vec<AccountingRecord> {
        let ctx = self.extract_context();
        let mut view = self.view();
        if view.refresh(&self.store, &ctx) {
            tracing::debug!(records = view.records().len(), "accounting records derived");
        }
        view.records().to_vec()
    }

    pub fn edit_record(&self, edited: AccountingRecord) -> Result<()> {
        let ctx = self.extract_context();
        let mut view = self.view();
        view.refresh(&self.store, &ctx);
        view.apply_edit(edited)
    }

    fn selected_records(&self, ids: &[String]) -> Result<Vec<AccountingRecord>> {
        let ctx = self.extract_context();
        let mut view = self.view();
        view.refresh(&self.store, &ctx);
        let selected = view.select(ids);
        if selected.is_empty() {
            return Err(Error::EmptySelection);
        }
        Ok(selected)
    }

    /// Save the selected records page by page. Every page is attempted;
    /// failures are collected into the report.
    pub fn save_accounting(&self, ids: &[String]) -> Result<BatchReport> {
        let selected = self.selected_records(ids)?;
        let user_id = Config::require(&self.config.user_id, "TAKUMI_USER_ID")?.to_string();
        let mut report = BatchReport::default();

        for (i, record) in selected.iter().enumerate() {
            if i > 0 && !self.config.save_delay.is_zero() {
                thread::sleep(self.config.save_delay);
            }
            let outcome = self
                .save_payload(record, &user_id)
                .and_then(|payload| self.backend.save_accounting_page(&payload));
            match outcome {
                Ok(()) => {
                    report.succeeded += 1;
                    if let Err(e) = self.view().mark_saved(&record.id) {
                        tracing::debug!("{}", e);
                    }
                }
                Err(e) => report.fail(&record.filename, &e),
            }
        }
        tracing::info!(saved = report.succeeded, failed = report.failures.len(), "accounting save finished");
        Ok(report)
    }

    fn save_payload(&self, record: &AccountingRecord, user_id: &str) -> Result<AccountingSavePayload> {
        let file = self.store.get(record.file_id).ok_or(Error::FileNotFound(record.file_id))?;
        let page_image = file
            .page(record.page)
            .map(|p| strip_data_url(&p.base64_data).to_string())
            .unwrap_or_default();
        Ok(AccountingSavePayload {
            user_id: user_id.to_string(),
            file_name: file.file_name.clone(),
            file_type: file.file_type.clone(),
            page_number: record.page,
            pages: vec![SavePage {
                page: record.page,
                base64_data: page_image,
            }],
            report_data: SaveReportData {
                invoice_date: record.invoice_date.clone(),
                invoice_no: record.invoice_no.clone(),
                seller_name: record.seller_name.clone(),
                seller_tax_id: record.seller_tax_id.clone(),
                branch: record.branch.clone(),
                product_value: record.product_value.to_string(),
                vat: record.vat.to_string(),
                total_amount: record.total_amount.to_string(),
            },
        })
    }

    // ---- Export ----

    /// Files by id in store order. An empty `ids` selects everything.
    pub fn select_files(&self, ids: &[FileId]) -> Result<Vec<SourceFile>> {
        let files = self.store.snapshot();
        if let Some(missing) = ids.iter().find(|id| !files.iter().any(|f| f.id == **id)) {
            return Err(Error::FileNotFound(*missing));
        }
        let selected: Vec<SourceFile> = files
            .into_iter()
            .filter(|f| ids.is_empty() || ids.contains(&f.id))
            .collect();
        if selected.is_empty() {
            return Err(Error::EmptySelection);
        }
        Ok(selected)
    }

    pub fn export_text(&self, ids: &[FileId], dir: &Path) -> Result<Vec<PathBuf>> {
        export::export_text(&self.select_files(ids)?, dir)
    }

    pub fn export_excel(&self, ids: &[FileId], dir: &Path) -> Result<Vec<PathBuf>> {
        excel::export_files_excel(&self.select_files(ids)?, dir)
    }

    pub fn export_word(&self, ids: &[FileId], dir: &Path) -> Result<Vec<PathBuf>> {
        word::export_word(&self.select_files(ids)?, dir)
    }

    /// Selected records to `<base>_<YYYY-MM-DD>.xlsx` in `dir`.
    pub fn export_accounting(&self, ids: &[String], dir: &Path, base_name: &str) -> Result<PathBuf> {
        let records = self.selected_records(ids)?;
        std::fs::create_dir_all(dir)?;
        let today = self.extract_context().today;
        let path = unique_path(dir, &dated_name(base_name, today), "xlsx");
        excel::export_accounting_excel(&records, &path)?;
        tracing::info!(path = %path.display(), records = records.len(), "accounting exported");
        Ok(path)
    }
}

struct TranslateJob {
    file_id: FileId,
    label: String,
    page: u32,
    text: String,
}

fn ocr_one(backend: &dyn Backend, file: &SourceFile, mode: OcrMode) -> Result<Vec<OcrPage>> {
    let mut results = backend.submit_ocr(&[OcrSubmission::from(file)], mode)?;
    if results.is_empty() {
        return Err(Error::InvalidResponse("OCR returned no files".to_string()));
    }
    // Prefer the entry echoing our file name; unnamed or mismatched replies fall back to the first.
    let index = results
        .iter()
        .position(|r| r.file_name.as_deref() == Some(file.file_name.as_str()))
        .unwrap_or(0);
    let pages = results.swap_remove(index).ocr_result;
    if pages.is_empty() {
        return Err(Error::InvalidResponse("OCR returned no pages".to_string()));
    }
    Ok(pages)
}
