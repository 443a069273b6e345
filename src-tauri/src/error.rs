use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrgListError {
    #[error("Loading org list failed. {0}")]
    LoadFailed(String),

    #[error("Failed to parse org list response. {0}")]
    ParseFailed(String),

    #[error("No org with username \"{0}\" is listed.")]
    OrgNotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{message} {detail}")]
    ActionFailed { message: String, detail: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("Failed to {action} {path}: {source}")]
    Storage {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Shared(String),

    #[error("Failed to acquire {0} lock.")]
    Poisoned(&'static str),
}

impl OrgListError {
    pub(crate) fn storage(action: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Storage {
            action,
            path: path.display().to_string(),
            source,
        }
    }
}

pub type OrgListResult<T> = Result<T, OrgListError>;
