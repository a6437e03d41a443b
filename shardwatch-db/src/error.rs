use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid player id")]
    InvalidPlayerId,

    #[error("player not found")]
    PlayerNotFound,
}

pub type Result<T> = std::result::Result<T, DbError>;
