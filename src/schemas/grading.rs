use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Separates the student identifier from the rest of a submission file name.
pub(crate) const STUDENT_ID_DELIMITER: char = '_';

/// One student's source file, read once and never modified.
#[derive(Debug, Clone)]
pub(crate) struct Submission {
    pub(crate) student_id: String,
    pub(crate) path: PathBuf,
    pub(crate) content: String,
}

/// Outcome of grading one submission.
///
/// A successful record carries a rubric-approved score and a non-empty comment;
/// a failed one carries `score == 0` and the failure cause in `comment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct GradingRecord {
    pub(crate) student_id: String,
    pub(crate) score: u32,
    pub(crate) comment: String,
    pub(crate) success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) from_cache: bool,
}

impl GradingRecord {
    pub(crate) fn graded(
        student_id: impl Into<String>,
        score: u32,
        comment: impl Into<String>,
        raw_response: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            score,
            comment: comment.into(),
            success: true,
            raw_response: Some(raw_response.into()),
            from_cache: false,
        }
    }

    pub(crate) fn failed(student_id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            score: 0,
            comment: cause.into(),
            success: false,
            raw_response: None,
            from_cache: false,
        }
    }

    pub(crate) fn with_raw_response(mut self, raw_response: impl Into<String>) -> Self {
        self.raw_response = Some(raw_response.into());
        self
    }

    /// Copy of a cached record re-attributed to another student.
    pub(crate) fn served_from_cache(&self, student_id: &str) -> Self {
        Self { student_id: student_id.to_string(), from_cache: true, ..self.clone() }
    }
}

/// `S001_hw3.py` -> `S001`, `S001.py` -> `S001`.
pub(crate) fn student_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let id = match name.split_once(STUDENT_ID_DELIMITER) {
        Some((prefix, _)) => prefix,
        None => path.file_stem()?.to_str()?,
    };
    (!id.is_empty()).then(|| id.to_string())
}
