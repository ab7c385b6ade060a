// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User-visible error kinds for the dispatch API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    BadRequest,
    BookingNotFound,
    OrderActiveExists,
    BookingCannotCancel,
    RequestAlreadyTaken,
    VehicleTypeMismatch,
    VehicleInsufficient,
    StoreUnavailable,
    Conflict,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::BadRequest => 400,
            Self::BookingNotFound => 404,
            Self::OrderActiveExists => 409,
            Self::BookingCannotCancel => 409,
            Self::RequestAlreadyTaken => 409,
            Self::VehicleTypeMismatch => 400,
            Self::VehicleInsufficient => 403,
            Self::StoreUnavailable => 503,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::BadRequest => "BAD_REQUEST",
            Self::BookingNotFound => "BOOKING_NOT_FOUND",
            Self::OrderActiveExists => "ORDER_ACTIVE_EXISTS",
            Self::BookingCannotCancel => "BOOKING_CANNOT_CANCEL",
            Self::RequestAlreadyTaken => "REQUEST_ALREADY_TAKEN",
            Self::VehicleTypeMismatch => "VEHICLE_TYPE_MISMATCH",
            Self::VehicleInsufficient => "VEHICLE_INSUFFICIENT",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::Conflict => "CONFLICT",
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

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ApiError {}

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
