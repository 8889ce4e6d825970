use std::path::PathBuf;

use ratrace_room::PersistError;

/// Errors from the JSON file store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("corrupt record in {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

impl From<StoreError> for PersistError {
    fn from(err: StoreError) -> Self {
        PersistError::Backend(Box::new(err))
    }
}
