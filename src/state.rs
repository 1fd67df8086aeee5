//! Shared state handed to every handler.

use crate::services::file_service::FileService;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::sync::CancellationToken;

/// Everything but RFC 3986 unreserved characters is escaped inside a segment.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Clone)]
pub struct AppState {
    pub files: FileService,

    /// Public origin used to build download URLs, without a trailing slash.
    pub base_url: String,

    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,

    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Token for one request; cancelled together with the server.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Public URL of the object at `key`, one escaped path segment per key segment.
    pub fn download_url(&self, key: &str) -> String {
        let path = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/objects/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.files.bucket(),
            path
        )
    }
}
