//! Route modules, one per resource family. Each exports a `router()`
//! merged into the application router in `lib.rs`.

pub mod catalog;
pub mod clients;
pub mod keys;
pub mod licfiles;
pub mod licsets;

use axum::http::header;
use axum::response::{IntoResponse, Response};

/// A license file response: raw XML, not JSON.
pub(crate) fn xml_response(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        body,
    )
        .into_response()
}
