use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::ApiResponse;

/// Successful creation: 201 with the usual envelope.
pub type Created<T> = (StatusCode, Json<ApiResponse<T>>);

pub fn created<T: Serialize>(data: T) -> Created<T> {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}
