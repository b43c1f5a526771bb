use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schemas::grading::{student_id_from_path, Submission};

const SUBMISSIONS_DIR: &str = "submissions";

/// Problems that stop a batch before any grading starts.
#[derive(Debug, Error)]
pub(crate) enum SubmissionError {
    #[error("submissions directory not found: {0}")]
    MissingDirectory(PathBuf),
    #[error("reference solution not found: {0}")]
    MissingReference(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
}

/// Lists `<base>/submissions/*.<extension>` in file-name order, skipping empty files.
pub(crate) async fn discover(
    base_path: &Path,
    extension: &str,
) -> Result<Vec<Submission>, SubmissionError> {
    let dir = base_path.join(SUBMISSIONS_DIR);
    if !tokio::fs::metadata(&dir).await.map(|meta| meta.is_dir()).unwrap_or(false) {
        return Err(SubmissionError::MissingDirectory(dir));
    }

    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SubmissionError::Read { path, source }
    };

    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(&dir).await.map_err(read_err(&dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(read_err(&dir))? {
        let path = entry.path();
        let matches_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches_extension && entry.file_type().await.map_err(read_err(&path))?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut submissions = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(student_id) = student_id_from_path(&path) else {
            tracing::warn!(path = %path.display(), "Cannot derive a student id; skipping");
            continue;
        };

        let bytes = tokio::fs::read(&path).await.map_err(read_err(&path))?;
        if bytes.is_empty() {
            tracing::warn!(path = %path.display(), "Empty submission; skipping");
            continue;
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();
        submissions.push(Submission { student_id, path, content });
    }

    tracing::info!(dir = %dir.display(), count = submissions.len(), "Submissions discovered");
    Ok(submissions)
}

pub(crate) async fn load_reference(
    base_path: &Path,
    reference_file: &str,
) -> Result<String, SubmissionError> {
    let path = base_path.join(reference_file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(SubmissionError::MissingReference(path))
        }
        Err(source) => Err(SubmissionError::Read { path, source }),
    }
}
