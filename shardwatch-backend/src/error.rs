use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use shardwatch_db::DbError;
use thiserror::Error;

use crate::validation::ValidationError;

/// JSON body of every error response
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
  error: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  details: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
  #[error(transparent)]
  Storage(#[from] DbError),
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error("missing or invalid bearer token")]
  Unauthorized,
  #[error("{0}")]
  NotFound(&'static str),
}

impl AppError {
  fn status(&self) -> StatusCode {
    match self {
      AppError::Storage(DbError::InvalidPlayerId) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::Storage(DbError::PlayerNotFound) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
      AppError::Unauthorized => StatusCode::UNAUTHORIZED,
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    let body = match &self {
      AppError::Storage(DbError::InvalidPlayerId) => ErrorBody {
        error: "Player id is not well-formed",
        details: None,
      },
      AppError::Storage(DbError::PlayerNotFound) => ErrorBody {
        error: "Player not found",
        details: None,
      },
      AppError::Storage(err) => {
        // storage details stay in the log
        tracing::error!(error = %err, "Internal storage error");
        ErrorBody {
          error: "An internal error occurred. Please try again later.",
          details: None,
        }
      }
      AppError::Validation(err) => {
        tracing::warn!(validation_error = %err, "Validation failed");
        ErrorBody {
          error: "Invalid request",
          details: Some(err.to_string()),
        }
      }
      AppError::Unauthorized => ErrorBody {
        error: "Missing or invalid bearer token",
        details: None,
      },
      AppError::NotFound(what) => ErrorBody {
        error: *what,
        details: None,
      },
    };
    (status, Json(body)).into_response()
  }
}
