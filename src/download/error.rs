use thiserror::Error;

/// Reasons a single photo download produced no data.
///
/// These only travel through the completion callback; the sync controller
/// logs them and moves on to the next photo.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error downloading {url} (bytes_so_far={bytes_received}): {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_received: u64,
    },

    #[error("Download of {url} exceeded {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("Download of {0} was cancelled")]
    Cancelled(String),
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled(_))
    }
}
