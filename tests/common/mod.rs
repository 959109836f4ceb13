//! Shared fixtures for the integration scenarios.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use kb_indexer::core::config::IndexingConfig;
use kb_indexer::core::errors::{KbError, Result};
use kb_indexer::indexer::Indexer;
use kb_indexer::summarizer::{
    DirectorySummaryRequest, FileAnalysisRequest, OutlineSummarizer, Summarizer,
    SummarizerResponse,
};

/// Write a source file and back-date its mtime so artifacts produced later
/// in the test are unambiguously newer.
pub fn write_source(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    set_mtime_back(&path, 100);
    path
}

/// Shift a path's mtime `secs` into the past.
pub fn set_mtime_back(path: &Path, secs: i64) {
    let mtime = filetime::FileTime::from_unix_time(
        filetime::FileTime::now().unix_seconds() - secs,
        0,
    );
    filetime::set_file_mtime(path, mtime).unwrap();
}

/// An indexer with default configuration and the offline summarizer.
pub fn default_indexer() -> Indexer {
    Indexer::new(IndexingConfig::default()).unwrap()
}

/// An indexer over a custom configuration.
pub fn indexer_with(config: IndexingConfig) -> Indexer {
    Indexer::new(config).unwrap()
}

/// Summarizer that fails file analyses whose name contains a marker, and
/// counts every call. Directory summaries delegate to the offline
/// implementation.
pub struct FailingSummarizer {
    marker: &'static str,
    inner: OutlineSummarizer,
    calls: AtomicUsize,
}

impl FailingSummarizer {
    pub fn new(marker: &'static str) -> Self {
        Self {
            marker,
            inner: OutlineSummarizer,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Summarizer for FailingSummarizer {
    fn analyze_file(&self, request: &FileAnalysisRequest<'_>) -> Result<SummarizerResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = request
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains(self.marker) {
            return Err(KbError::Summarizer {
                details: format!("injected failure for {name}"),
            });
        }
        self.inner.analyze_file(request)
    }

    fn summarize_directory(
        &self,
        request: &DirectorySummaryRequest<'_>,
    ) -> Result<SummarizerResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.summarize_directory(request)
    }
}

/// An indexer wired to a shared `FailingSummarizer`.
pub fn failing_indexer(
    config: IndexingConfig,
    marker: &'static str,
) -> (Indexer, Arc<FailingSummarizer>) {
    let summarizer = Arc::new(FailingSummarizer::new(marker));
    let indexer = Indexer::with_summarizer(config, Arc::clone(&summarizer) as Arc<dyn Summarizer>)
        .unwrap();
    (indexer, summarizer)
}
