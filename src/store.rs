//! In-memory working set of uploaded files and their OCR results.
//!
//! The store is a cheap, cloneable handle; every clone sees the same data.
//! Each mutation bumps `version` (derived views compare it to decide whether to
//! recompute). `clear()` also bumps `generation`, which background work captures
//! up front so that results landing after a clear are dropped.

use crate::error::{Error, Result};
use crate::types::{FileId, SourceFile};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Inner {
    files: Vec<SourceFile>,
    version: u64,
    generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FileRecordStore {
    inner: Arc<RwLock<Inner>>,
}

/// Result of [`FileRecordStore::add`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: usize,
    pub duplicates: Vec<FileId>,
}

impl FileRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves plain data behind; keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Append files. Ids already present (or repeated within `files`) are skipped.
    pub fn add(&self, files: Vec<SourceFile>) -> AddOutcome {
        let mut guard = self.write();
        let mut outcome = AddOutcome::default();
        for file in files {
            if guard.files.iter().any(|f| f.id == file.id) {
                tracing::warn!(id = %file.id, file = %file.file_name, "duplicate file id, skipped");
                outcome.duplicates.push(file.id);
                continue;
            }
            guard.files.push(file);
            outcome.added += 1;
        }
        if outcome.added > 0 {
            guard.version += 1;
        }
        outcome
    }

    pub fn remove(&self, id: FileId) -> Result<()> {
        let mut guard = self.write();
        let before = guard.files.len();
        guard.files.retain(|f| f.id != id);
        if guard.files.len() == before {
            return Err(Error::FileNotFound(id));
        }
        guard.version += 1;
        Ok(())
    }

    /// Merge `file` into the entry with the same id.
    pub fn update(&self, file: SourceFile) -> Result<()> {
        let mut guard = self.write();
        let id = file.id;
        let existing = guard
            .files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(Error::FileNotFound(id))?;
        let before = existing.clone();
        existing.merge_from(file);
        if *existing != before {
            guard.version += 1;
        }
        Ok(())
    }

    /// Upsert by id: merge into existing entries, append the rest.
    pub fn update_many(&self, files: Vec<SourceFile>) {
        let mut guard = self.write();
        Self::upsert_locked(&mut guard, files);
    }

    /// Like [`update_many`](Self::update_many), but only if the store has not
    /// been cleared since `generation` was read.
    pub fn update_many_if_current(&self, generation: u64, files: Vec<SourceFile>) -> Result<()> {
        let mut guard = self.write();
        if guard.generation != generation {
            return Err(Error::Stale);
        }
        Self::upsert_locked(&mut guard, files);
        Ok(())
    }

    /// Mutate one file in place, guarded by `generation`.
    pub fn patch_if_current<F>(&self, generation: u64, id: FileId, patch: F) -> Result<()>
    where
        F: FnOnce(&mut SourceFile),
    {
        let mut guard = self.write();
        if guard.generation != generation {
            return Err(Error::Stale);
        }
        let file = guard
            .files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(Error::FileNotFound(id))?;
        let before = file.clone();
        patch(file);
        if *file != before {
            guard.version += 1;
        }
        Ok(())
    }

    fn upsert_locked(inner: &mut Inner, files: Vec<SourceFile>) {
        let mut changed = false;
        for file in files {
            match inner.files.iter_mut().find(|f| f.id == file.id) {
                Some(existing) => {
                    let before = existing.clone();
                    existing.merge_from(file);
                    changed |= *existing != before;
                }
                None => {
                    inner.files.push(file);
                    changed = true;
                }
            }
        }
        if changed {
            inner.version += 1;
        }
    }

    pub fn clear(&self) {
        let mut guard = self.write();
        guard.files.clear();
        guard.version += 1;
        guard.generation += 1;
    }

    pub fn snapshot(&self) -> Vec<SourceFile> {
        self.read().files.clone()
    }

    pub fn get(&self, id: FileId) -> Option<SourceFile> {
        self.read().files.iter().find(|f| f.id == id).cloned()
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.read().files.iter().any(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.read().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OcrPage;

    fn file(id: u64, name: &str) -> SourceFile {
        SourceFile::new(FileId(id), name, "application/pdf", "QUJD")
    }

    #[test]
    fn add_skips_duplicate_ids() {
        let store = FileRecordStore::new();
        let outcome = store.add(vec![file(1, "a.pdf"), file(2, "b.pdf"), file(1, "c.pdf")]);
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.duplicates, vec![FileId(1)]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(FileId(1)).unwrap().file_name, "a.pdf");
    }

    #[test]
    fn remove_reports_missing_id() {
        let store = FileRecordStore::new();
        store.add(vec![file(1, "a.pdf")]);
        assert!(matches!(store.remove(FileId(9)), Err(Error::FileNotFound(FileId(9)))));
        store.remove(FileId(1)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn update_merges_and_reports_missing() {
        let store = FileRecordStore::new();
        store.add(vec![file(1, "a.pdf")]);
        let mut changed = file(1, "a.pdf");
        changed.ocr_result = Some(vec![OcrPage::new(1, "hello")]);
        store.update(changed).unwrap();
        assert_eq!(store.get(FileId(1)).unwrap().pages()[0].extracted_text, "hello");
        assert!(matches!(store.update(file(5, "x.pdf")), Err(Error::FileNotFound(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_many_upserts() {
        let store = FileRecordStore::new();
        store.add(vec![file(1, "a.pdf")]);
        store.update_many(vec![file(1, "renamed.pdf"), file(2, "b.pdf")]);
        let names: Vec<String> = store.snapshot().into_iter().map(|f| f.file_name).collect();
        assert_eq!(names, vec!["renamed.pdf", "b.pdf"]);
    }

    #[test]
    fn update_many_is_idempotent() {
        let store = FileRecordStore::new();
        let mut f = file(1, "a.pdf");
        f.ocr_result = Some(vec![OcrPage::new(1, "x"), OcrPage::new(2, "y")]);
        store.update_many(vec![f.clone()]);
        let first = store.snapshot();
        let version = store.version();
        store.update_many(vec![f]);
        assert_eq!(store.snapshot(), first);
        assert_eq!(store.version(), version);
    }

    #[test]
    fn clear_invalidates_pending_merges() {
        let store = FileRecordStore::new();
        store.add(vec![file(1, "a.pdf")]);
        let generation = store.generation();
        store.clear();
        assert!(store.is_empty());
        assert!(matches!(
            store.update_many_if_current(generation, vec![file(1, "a.pdf")]),
            Err(Error::Stale)
        ));
        assert!(matches!(
            store.patch_if_current(generation, FileId(1), |_| {}),
            Err(Error::Stale)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let store = FileRecordStore::new();
        let handle = store.clone();
        handle.add(vec![file(1, "a.pdf")]);
        assert!(store.contains(FileId(1)));
    }
}
