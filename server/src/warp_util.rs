#![deny(warnings)]

use {
    anyhow::Error,
    hyper::StatusCode,
    serde_derive::Serialize,
    std::{borrow::Cow, convert::Infallible},
    warp::{
        body::BodyDeserializeError,
        reject::{InvalidQuery, MethodNotAllowed, Reject},
        reply, Rejection, Reply,
    },
};

#[derive(Serialize)]
#[serde(remote = "StatusCode")]
struct StatusCodeU16(#[serde(getter = "StatusCode::as_u16")] u16);

/// An error with a specific HTTP status, raised by handlers and converted to a JSON reply centrally
///
/// Anything which is not an `HttpError` (or does not have one as its root cause) is reported as a plain
/// 500; see [HttpError::from].
#[derive(Clone, Serialize, Debug, thiserror::Error)]
#[error("HTTP {}: {}", status, message)]
pub struct HttpError {
    pub message: Cow<'static, str>,
    #[serde(with = "StatusCodeU16")]
    pub status: StatusCode,
}

impl HttpError {
    pub fn from_slice(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message: Cow::Borrowed(message),
        }
    }

    pub fn bad_request(message: &'static str) -> Self {
        Self::from_slice(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: &'static str) -> Self {
        Self::from_slice(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::from_slice(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_server_error() -> Self {
        Self::from_slice(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    pub fn from(error: Error) -> Self {
        if let Some(e) = error.root_cause().downcast_ref::<HttpError>() {
            e.clone()
        } else {
            Self::internal_server_error()
        }
    }

    pub fn as_reply(&self) -> impl Reply {
        reply::with_status(reply::json(&self), self.status)
    }
}

impl Reject for HttpError {}

pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let error = if rejection.is_not_found() {
        HttpError::from_slice(StatusCode::NOT_FOUND, "not found")
    } else if let Some(error) = rejection.find::<HttpError>() {
        error.clone()
    } else if rejection.find::<BodyDeserializeError>().is_some() {
        HttpError::from_slice(StatusCode::BAD_REQUEST, "invalid request body")
    } else if rejection.find::<InvalidQuery>().is_some() {
        HttpError::from_slice(StatusCode::BAD_REQUEST, "invalid query string")
    } else if rejection.find::<MethodNotAllowed>().is_some() {
        HttpError::from_slice(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        HttpError::internal_server_error()
    };

    Ok(error.as_reply())
}
