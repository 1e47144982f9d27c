//! reqwest-backed [`Downloader`].
//!
//! Each started task runs on the tokio runtime captured at construction and
//! races the request against its [`CancellationToken`]. Completions are
//! handed to the blocking pool.

use std::sync::Mutex;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Url};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{DownloadCompletion, DownloadError, DownloadTask, Downloader};

pub const DEFAULT_MAX_PHOTO_BYTES: u64 = 64 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    runtime: Handle,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(runtime: Handle, max_bytes: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            runtime,
            max_bytes,
        })
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: Url, completion: DownloadCompletion) -> Box<dyn DownloadTask> {
        Box::new(HttpTask {
            url,
            client: self.client.clone(),
            runtime: self.runtime.clone(),
            max_bytes: self.max_bytes,
            token: CancellationToken::new(),
            completion: Mutex::new(Some(completion)),
        })
    }
}

struct HttpTask {
    url: Url,
    client: Client,
    runtime: Handle,
    max_bytes: u64,
    token: CancellationToken,
    /// Taken by the first `start()`; later calls are no-ops.
    completion: Mutex<Option<DownloadCompletion>>,
}

impl DownloadTask for HttpTask {
    fn start(&self) {
        let completion = match self.completion.lock() {
            Ok(mut slot) => slot.take(),
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Download task state poisoned");
                return;
            }
        };
        let Some(completion) = completion else {
            tracing::debug!(url = %self.url, "Download task already started");
            return;
        };

        let url = self.url.clone();
        let client = self.client.clone();
        let token = self.token.clone();
        let max_bytes = self.max_bytes;

        self.runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(DownloadError::Cancelled(url.to_string())),
                result = fetch(&client, &url, max_bytes) => result,
            };
            // The completion decodes, compresses and writes to SQLite.
            let completed = tokio::task::spawn_blocking(move || completion(url, result)).await;
            if let Err(e) = completed {
                tracing::error!(error = %e, "Download completion panicked");
            }
        });
    }

    fn cancel(&self) {
        tracing::debug!(url = %self.url, "Cancelling download");
        self.token.cancel();
    }
}

/// Fetch the full body of `url` into memory.
async fn fetch(client: &Client, url: &Url, max_bytes: u64) -> Result<Vec<u8>, DownloadError> {
    let url_str = url.to_string();
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| DownloadError::Http {
            source: e,
            url: url_str.clone(),
            bytes_received: 0,
        })?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            url: url_str,
        });
    }

    let content_length = response.content_length();
    if content_length.is_some_and(|len| len > max_bytes) {
        return Err(DownloadError::TooLarge {
            url: url_str,
            limit: max_bytes,
        });
    }

    let mut body = Vec::with_capacity(content_length.unwrap_or(0) as usize);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            tracing::warn!(
                "Body decode error for {} (content_length={:?}, bytes_so_far={}): {}",
                url_str,
                content_length,
                body.len(),
                e
            );
            DownloadError::Http {
                source: e,
                url: url_str.clone(),
                bytes_received: body.len() as u64,
            }
        })?;
        if (body.len() + chunk.len()) as u64 > max_bytes {
            return Err(DownloadError::TooLarge {
                url: url_str,
                limit: max_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }

    tracing::debug!(url = %url_str, bytes = body.len(), "Download finished");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve `response` verbatim to the first connection and return its URL.
    async fn serve_once(response: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        Url::parse(&format!("http://{addr}/photo.jpg")).unwrap()
    }

    fn start_download(
        downloader: &HttpDownloader,
        url: Url,
    ) -> (
        Box<dyn DownloadTask>,
        oneshot::Receiver<(Url, Result<Vec<u8>, DownloadError>)>,
    ) {
        let (tx, rx) = oneshot::channel();
        let task = downloader.download(
            url,
            Box::new(move |url, result| {
                let _ = tx.send((url, result));
            }),
        );
        (task, rx)
    }

    #[tokio::test]
    async fn test_successful_download_delivers_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let downloader = HttpDownloader::new(Handle::current(), 1024).unwrap();
        let (task, rx) = start_download(&downloader, url.clone());
        task.start();

        let (got_url, result) = rx.await.unwrap();
        assert_eq!(got_url, url);
        assert_eq!(result.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let downloader = HttpDownloader::new(Handle::current(), 1024).unwrap();
        let (task, rx) = start_download(&downloader, url);
        task.start();

        let (_, result) = rx.await.unwrap();
        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let downloader = HttpDownloader::new(Handle::current(), 4).unwrap();
        let (task, rx) = start_download(&downloader, url);
        task.start();

        let (_, result) = rx.await.unwrap();
        assert!(matches!(result, Err(DownloadError::TooLarge { limit: 4, .. })));
    }

    #[tokio::test]
    async fn test_cancel_before_start_reports_cancelled() {
        let url = Url::parse("http://127.0.0.1:1/never.jpg").unwrap();
        let downloader = HttpDownloader::new(Handle::current(), 1024).unwrap();
        let (task, rx) = start_download(&downloader, url);
        task.cancel();
        task.start();

        let (_, result) = rx.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        )
        .await;
        let downloader = HttpDownloader::new(Handle::current(), 1024).unwrap();
        let (task, rx) = start_download(&downloader, url);
        task.start();
        task.start();

        let (_, result) = rx.await.unwrap();
        assert_eq!(result.unwrap(), b"ok".to_vec());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_completion_runs_on_blocking_pool() {
        let url = Url::parse("http://127.0.0.1:1/never.jpg").unwrap();
        let downloader = HttpDownloader::new(Handle::current(), 1024).unwrap();
        let (tx, rx) = oneshot::channel();
        let task = downloader.download(
            url,
            Box::new(move |_, result| {
                // block_on panics on an async worker thread.
                Handle::current().block_on(tokio::task::yield_now());
                let _ = tx.send(result);
            }),
        );
        task.cancel();
        task.start();

        let result = rx.await.expect("completion ran off the async workers");
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_unstarted_task_never_completes() {
        let url = Url::parse("http://127.0.0.1:1/never.jpg").unwrap();
        let downloader = HttpDownloader::new(Handle::current(), 1024).unwrap();
        let (task, rx) = start_download(&downloader, url);
        drop(task);
        // Dropping the task drops the completion, closing the channel.
        assert!(rx.await.is_err());
    }
}
