//! Photo download collaborators.
//!
//! A [`Downloader`] hands back a [`DownloadTask`] that does nothing until
//! started. The result is delivered exactly once through the
//! [`DownloadCompletion`] callback, possibly on another thread, possibly
//! before `download()` or `start()` returns. Cancellation is best-effort:
//! a cancelled task may still report its real result.

pub mod error;
pub mod http;

use reqwest::Url;

pub use error::DownloadError;
pub use http::HttpDownloader;

/// Result callback for one download: the requested URL and either the body
/// or the failure.
pub type DownloadCompletion = Box<dyn FnOnce(Url, Result<Vec<u8>, DownloadError>) + Send>;

/// Handle to one in-flight (or not yet started) download.
pub trait DownloadTask: Send + Sync {
    fn start(&self);
    fn cancel(&self);
}

pub trait Downloader: Send + Sync {
    fn download(&self, url: Url, completion: DownloadCompletion) -> Box<dyn DownloadTask>;
}
