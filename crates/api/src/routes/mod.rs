//! HTTP route handlers.

use serde::Serialize;

pub mod exports;
pub mod health;

/// Success envelope: `{"data": …}`.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}
