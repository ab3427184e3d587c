use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No ruleset configured for theme \"{0}\"")]
    MissingRuleset(String),

    #[error("Theme \"{0}\" not found in payload")]
    ThemeNotFound(String),

    #[error("No run history available for theme \"{0}\"")]
    NoData(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Last refresh for theme \"{theme}\" failed: {message}")]
    RefreshFailed { theme: String, message: String },

    #[error("Refresh task dropped before delivering a result")]
    TaskDropped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Recoverable conditions the user can act on; everything else aborts the pass.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::MissingRuleset(_) | AppError::ThemeNotFound(_) | AppError::NoData(_)
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::ThemeNotFound(_) | AppError::NoData(_) | AppError::RefreshFailed { .. } => {
                StatusCode::NOT_FOUND
            }
            AppError::MissingRuleset(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Fetch(_) | AppError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
