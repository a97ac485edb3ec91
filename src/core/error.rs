use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Behavior '{identity}' failed on property '{property}': {source}")]
    Behavior {
        identity: String,
        property: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Invalid operation key: {0}")]
    InvalidOperationKey(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Record '{0}' not found in '{1}'")]
    NotFound(String, String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, HookError>;


impl<T> From<std::sync::PoisonError<T>> for HookError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
