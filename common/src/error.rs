use thiserror::Error;

/// User-facing failures of the GitHub import pipeline.
///
/// Every variant carries a message that is safe to show to the caller as-is;
/// `code()` gives a stable identifier for clients that branch on the kind.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid GitHub URL: {0}")]
    InvalidUrl(String),

    #[error("unexpected redirect host: {0}")]
    UnexpectedRedirectHost(String),

    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    #[error("commit changed since preview (expected {expected}, found {actual}); preview again")]
    CommitMismatch { expected: String, actual: String },

    #[error("GitHub responded with status {status} ({context})")]
    UpstreamStatus { status: u16, context: String },

    #[error("archive too large: {0}")]
    ArchiveTooLarge(String),

    #[error("archive has too many files ({count} > {max})")]
    TooManyFiles { count: usize, max: usize },

    #[error("invalid zip archive: {0}")]
    InvalidZip(String),

    #[error("no skill found (expected SKILL.md or skills.md)")]
    NoSkillFound,

    #[error("candidate not found: {0}")]
    CandidateNotFound(String),

    #[error("path is outside the selected skill folder: {0}")]
    OutsideScope(String),

    #[error("file not found in archive: {0}")]
    FileNotFound(String),

    #[error("no files selected")]
    NoFilesSelected,

    #[error("the skill marker file must be selected: {0}")]
    MarkerNotSelected(String),

    #[error("selected files are too large ({total} > {max} bytes)")]
    SelectionTooLarge { total: u64, max: u64 },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("could not find a free slug for {0}")]
    SlugUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("publish failed: {0}")]
    Publish(String),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::InvalidUrl(_) => "invalid_url",
            ImportError::UnexpectedRedirectHost(_) => "unexpected_redirect_host",
            ImportError::InvalidCommit(_) => "invalid_commit",
            ImportError::CommitMismatch { .. } => "commit_mismatch",
            ImportError::UpstreamStatus { .. } => "upstream_status",
            ImportError::ArchiveTooLarge(_) => "archive_too_large",
            ImportError::TooManyFiles { .. } => "too_many_files",
            ImportError::InvalidZip(_) => "invalid_zip",
            ImportError::NoSkillFound => "no_skill_found",
            ImportError::CandidateNotFound(_) => "candidate_not_found",
            ImportError::OutsideScope(_) => "outside_scope",
            ImportError::FileNotFound(_) => "file_not_found",
            ImportError::NoFilesSelected => "no_files_selected",
            ImportError::MarkerNotSelected(_) => "marker_not_selected",
            ImportError::SelectionTooLarge { .. } => "selection_too_large",
            ImportError::InvalidPath(_) => "invalid_path",
            ImportError::SlugUnavailable(_) => "slug_unavailable",
            ImportError::Transport(_) => "transport",
            ImportError::Publish(_) => "publish_failed",
        }
    }

    /// HTTP status the api answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ImportError::ArchiveTooLarge(_)
            | ImportError::TooManyFiles { .. }
            | ImportError::SelectionTooLarge { .. } => 413,
            ImportError::NoSkillFound
            | ImportError::CandidateNotFound(_)
            | ImportError::FileNotFound(_) => 404,
            ImportError::CommitMismatch { .. } | ImportError::SlugUnavailable(_) => 409,
            ImportError::UpstreamStatus { .. } | ImportError::Transport(_) => 502,
            ImportError::Publish(_) => 422,
            _ => 400,
        }
    }
}

impl From<anyhow::Error> for ImportError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ImportError>() {
            Ok(import) => import,
            Err(other) => ImportError::Transport(other.to_string()),
        }
    }
}
