use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::application::render::ConversionError;
use crate::application::sweeper::SweepError;
use crate::infra::{error::InfraError, storage::StoreError};

/// Diagnostic chain attached to error responses and logged by the response
/// middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Why a submission did not produce an artifact set.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),
    #[error("markmap conversion failed")]
    Conversion(#[source] ConversionError),
    #[error("artifact storage failed")]
    Storage(#[from] StoreError),
    /// A concurrent submission of the same content was rendering and failed.
    #[error("markmap conversion failed: {0}")]
    InFlightFailed(String),
}

impl SubmitError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Client-facing detail: the converter's stderr for conversion failures.
    pub fn diagnostic(&self) -> String {
        match self {
            SubmitError::Conversion(err) => err.diagnostic(),
            SubmitError::InFlightFailed(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<ConversionError> for SubmitError {
    fn from(error: ConversionError) -> Self {
        Self::Conversion(error)
    }
}

/// Process-level failure that stops a command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Sweep(#[from] SweepError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
