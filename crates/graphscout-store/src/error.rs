use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid registry key: {0}")]
    InvalidKey(String),

    #[error("registry document at {path} has no parent directory")]
    NoParent { path: std::path::PathBuf },
}
