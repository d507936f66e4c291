// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error codes shared by WebSocket `error` frames and HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidHello,
    NotAuthenticated,
    Unauthorized,
    InvalidEvent,
    BadRequest,
    LoginFailed,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidHello => 400,
            Self::NotAuthenticated => 401,
            Self::Unauthorized => 403,
            Self::InvalidEvent => 400,
            Self::BadRequest => 400,
            Self::LoginFailed => 401,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidHello => "INVALID_HELLO",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidEvent => "INVALID_EVENT",
            Self::BadRequest => "BAD_REQUEST",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Why an event failed validation at the store boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    MissingField(&'static str),
    BadVersion,
    BadTimestamp,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing or empty field: {field}"),
            Self::BadVersion => f.write_str("version must be a positive integer"),
            Self::BadTimestamp => f.write_str("at must be a nonzero epoch-millis timestamp"),
        }
    }
}

impl std::error::Error for EventError {}
