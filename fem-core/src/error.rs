use fem_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FemError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[cfg(feature = "database")]
    #[error("Database error ({context}): {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FemError {
    #[cfg(feature = "database")]
    pub(crate) fn database(
        context: &'static str,
    ) -> impl FnOnce(sqlx::Error) -> FemError {
        move |source| FemError::Database { context, source }
    }
}

pub type Result<T> = std::result::Result<T, FemError>;
