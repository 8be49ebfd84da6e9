//! Panic recovery.
//!
//! No panic escapes to the transport: an uncaught panic becomes a 500 with
//! the fixed `INTERNAL_ERROR` problem document, and the stack is logged.

use std::any::Any;
use std::backtrace::Backtrace;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use tracing::error;

use crate::problem::Problem;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

pub async fn recover_panics(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    match std::panic::AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(res) => res,
        Err(payload) => {
            error!(
                method = %method,
                path = %path,
                panic = panic_message(payload.as_ref()),
                stack = %Backtrace::force_capture(),
                "handler panicked"
            );
            Problem::internal().into_response()
        }
    }
}
