use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde::Serialize;

use crate::{Error, Result};

/// Data returned by read operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Value(String),
    List(Vec<String>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Value(String::new())
    }
}

/// The JSON body written for every request: `{"error": "...", "data": ...}`.
///
/// `error` is empty on success. `data` is only present for read operations and is
/// always the empty string when the operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

impl Envelope {
    /// Envelope for operations that only report success or failure.
    pub fn status(result: Result<()>) -> Self {
        Self {
            error: result.err().map(|e| e.to_string()).unwrap_or_default(),
            data: None,
        }
    }

    /// Envelope for read operations.
    pub fn data(result: Result<Payload>) -> Self {
        match result {
            Ok(payload) => Self {
                error: String::new(),
                data: Some(payload),
            },
            Err(e) => Self {
                error: e.to_string(),
                data: Some(Payload::default()),
            },
        }
    }

    /// Generic envelope for a fault caught outside of any operation.
    pub fn fault() -> Self {
        Self::status(Err(Error::Internal))
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Runs `work`, converting a panic into [`Error::Internal`].
///
/// The panic payload is logged together with the operation and bucket; it never reaches
/// the client.
pub fn guard<T, F>(op: &str, bucket: &str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(res) => res,
        Err(payload) => {
            error!("{} on bucket {:?} panicked: {}", op, bucket, panic_message(&*payload));
            Err(Error::Internal)
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}
