//! The LLM summarizer boundary.
//!
//! The engine treats analysis as "given a source file, produce a text blob"
//! and KB generation as "given child analyses and child KBs, produce a text
//! blob". Everything behind that — prompt building, transport, retries —
//! lives on the other side of this trait. Errors and reported truncation
//! surface as task failures; a truncated response never reaches the cache.

use std::path::Path;

use crate::core::errors::{KbError, Result};

/// Request to analyze a single source file.
#[derive(Debug, Clone)]
pub struct FileAnalysisRequest<'a> {
    /// Absolute path of the file (for context, not for re-reading).
    pub file_path: &'a Path,
    /// File content, already read by the engine.
    pub content: &'a str,
    /// Caller-supplied identifier for request tracing.
    pub conversation_id: &'a str,
}

/// Request to summarize a directory from its children's artifacts.
#[derive(Debug, Clone)]
pub struct DirectorySummaryRequest<'a> {
    /// Absolute path of the directory.
    pub dir_path: &'a Path,
    /// (file name, stripped analysis body) for each child file.
    pub child_analyses: &'a [(String, String)],
    /// (directory name, knowledge file body) for each child subdirectory
    /// whose KB exists.
    pub child_summaries: &'a [(String, String)],
    /// Caller-supplied identifier for request tracing.
    pub conversation_id: &'a str,
}

/// A summarizer response. `truncated` means the backend reported a cut-off
/// response; the engine fails the task rather than persisting it.
#[derive(Debug, Clone)]
pub struct SummarizerResponse {
    /// The produced artifact text.
    pub text: String,
    /// Whether the backend reported truncation.
    pub truncated: bool,
}

impl SummarizerResponse {
    /// A complete (untruncated) response.
    #[must_use]
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
        }
    }

    /// Reject truncated responses, mapping them to an error.
    pub fn into_complete_text(self, conversation_id: &str) -> Result<String> {
        if self.truncated {
            return Err(KbError::SummarizerTruncated {
                conversation_id: conversation_id.to_string(),
            });
        }
        Ok(self.text)
    }
}

/// Request/response abstraction over the external LLM summarizer.
pub trait Summarizer: Send + Sync {
    /// Produce an analysis for one source file.
    fn analyze_file(&self, request: &FileAnalysisRequest<'_>) -> Result<SummarizerResponse>;

    /// Produce a knowledge-base summary for one directory.
    fn summarize_directory(
        &self,
        request: &DirectorySummaryRequest<'_>,
    ) -> Result<SummarizerResponse>;
}

/// Deterministic offline summarizer.
///
/// Produces structural markdown from the inputs without any external call.
/// Used by tests and by dry/offline CLI runs; a real deployment injects an
/// LLM-backed implementation instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineSummarizer;

impl Summarizer for OutlineSummarizer {
    fn analyze_file(&self, request: &FileAnalysisRequest<'_>) -> Result<SummarizerResponse> {
        let name = request
            .file_path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        let line_count = request.content.lines().count();
        let text = format!(
            "## {name}\n\n{line_count} lines, {} bytes.\n",
            request.content.len()
        );
        Ok(SummarizerResponse::complete(text))
    }

    fn summarize_directory(
        &self,
        request: &DirectorySummaryRequest<'_>,
    ) -> Result<SummarizerResponse> {
        let name = request
            .dir_path
            .file_name()
            .map_or_else(|| "/".to_string(), |n| n.to_string_lossy().into_owned());
        let mut text = format!("# {name}\n\n");
        if !request.child_analyses.is_empty() {
            text.push_str("## Files\n\n");
            for (file_name, body) in request.child_analyses {
                let first_line = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                text.push_str(&format!("- `{file_name}` — {}\n", first_line.trim_start_matches('#').trim()));
            }
            text.push('\n');
        }
        if !request.child_summaries.is_empty() {
            text.push_str("## Subdirectories\n\n");
            for (dir_name, _) in request.child_summaries {
                text.push_str(&format!("- `{dir_name}/`\n"));
            }
            text.push('\n');
        }
        Ok(SummarizerResponse::complete(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn outline_analysis_mentions_file_name() {
        let path = PathBuf::from("/p/a.py");
        let req = FileAnalysisRequest {
            file_path: &path,
            content: "print('x')\nprint('y')\n",
            conversation_id: "run-1/a",
        };
        let response = OutlineSummarizer.analyze_file(&req).unwrap();
        assert!(!response.truncated);
        assert!(response.text.contains("a.py"));
        assert!(response.text.contains("2 lines"));
    }

    #[test]
    fn outline_directory_lists_children() {
        let path = PathBuf::from("/p/sub");
        let analyses = vec![("b.py".to_string(), "## b.py\n\nstuff".to_string())];
        let summaries = vec![("deep".to_string(), "# deep".to_string())];
        let req = DirectorySummaryRequest {
            dir_path: &path,
            child_analyses: &analyses,
            child_summaries: &summaries,
            conversation_id: "run-1/sub",
        };
        let response = OutlineSummarizer.summarize_directory(&req).unwrap();
        assert!(response.text.contains("`b.py`"));
        assert!(response.text.contains("`deep/`"));
    }

    #[test]
    fn truncated_response_maps_to_error() {
        let response = SummarizerResponse {
            text: "partial".to_string(),
            truncated: true,
        };
        let err = response.into_complete_text("run-1/x").unwrap_err();
        assert_eq!(err.code(), "KBI-5002");
    }

    #[test]
    fn complete_response_passes_through() {
        let response = SummarizerResponse::complete("done");
        assert_eq!(response.into_complete_text("run-1/x").unwrap(), "done");
    }
}
