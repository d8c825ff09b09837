//! One-click downloads that never navigate away from the current view.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use reqwest::Client as HttpClient;

use crate::error::ChatError;
use crate::notice::{Notice, Notifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub file_name: String,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: file_name.into(),
        }
    }
}

/// Fire-and-forget download trigger. Returns immediately.
pub trait Downloader: Send + Sync {
    fn trigger(&self, request: DownloadRequest);
}

/// Keeps only the final path component so a crafted name cannot escape the target dir.
pub fn safe_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last.is_empty() || last == "." || last == ".." {
        "download".to_string()
    } else {
        last.to_string()
    }
}

/// Fetches the asset in the background and saves it into a directory.
/// Failures reach the user through `notifier`.
#[derive(Clone)]
pub struct FileDownloader {
    http: HttpClient,
    dir: PathBuf,
    notifier: Arc<dyn Notifier>,
}

impl FileDownloader {
    pub fn new(dir: impl Into<PathBuf>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            http: HttpClient::new(),
            dir: dir.into(),
            notifier,
        }
    }

    pub fn target_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(safe_file_name(file_name))
    }

    /// Download now and return where the file was written.
    pub async fn fetch(&self, request: &DownloadRequest) -> Result<PathBuf, ChatError> {
        let path = self.target_path(&request.file_name);
        let size = Self::fetch_to(&self.http, &request.url, &path).await?;
        info!("saved {} ({} bytes) to {}", request.url, size, path.display());
        Ok(path)
    }

    async fn fetch_to(http: &HttpClient, url: &str, path: &Path) -> Result<u64, ChatError> {
        let resp = http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ChatError::Status(resp.status().as_u16()));
        }
        let bytes = resp.bytes().await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

impl Downloader for FileDownloader {
    fn trigger(&self, request: DownloadRequest) {
        let this = self.clone();
        crate::utils::spawn_async(async move {
            if let Err(e) = this.fetch(&request).await {
                error!("download of {} failed: {e}", request.url);
                this.notifier
                    .notify(Notice::error(format!("Could not download {}: {e}", request.file_name)));
            }
        });
    }
}
