//! Streams remote assets (source audio, cover art) to disk.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;

use super::ProviderError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Downloads `http(s)://` URLs and copies `file://` URLs (local mirrors).
///
/// No overall request timeout: source files are large and a slow but live
/// transfer must be allowed to finish.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Writes `url` to `dest`, calling `on_progress(downloaded, total)` as
    /// bytes arrive. Returns the number of bytes written.
    pub async fn fetch_to_file<F>(
        &self,
        url: &str,
        dest: &Path,
        mut on_progress: F,
    ) -> Result<u64, ProviderError>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let parsed = Url::parse(url).map_err(|_| ProviderError::UnsupportedUrl(url.to_string()))?;
        match parsed.scheme() {
            "file" => {
                let src = parsed
                    .to_file_path()
                    .map_err(|_| ProviderError::UnsupportedUrl(url.to_string()))?;
                let copied = tokio::fs::copy(&src, dest).await.map_err(|e| ProviderError::Io {
                    path: dest.to_path_buf(),
                    source: e,
                })?;
                on_progress(copied, Some(copied));
                Ok(copied)
            }
            "http" | "https" => self.stream(parsed, dest, &mut on_progress).await,
            _ => Err(ProviderError::UnsupportedUrl(url.to_string())),
        }
    }

    async fn stream<F>(&self, url: Url, dest: &Path, on_progress: &mut F) -> Result<u64, ProviderError>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let mut response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status {
                endpoint: url.path().to_string(),
                status: response.status(),
            });
        }
        let total = response.content_length();

        let io_err = |e| ProviderError::Io {
            path: dest.to_path_buf(),
            source: e,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut downloaded = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(io_err)?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total);
        }
        file.flush().await.map_err(io_err)?;

        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fetch_file_url_reports_progress() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("source.aaxc");
        std::fs::write(&src, vec![7u8; 4096]).unwrap();
        let dest = tmp.path().join("copy.aaxc");
        let url = Url::from_file_path(&src).unwrap();

        let mut seen = Vec::new();
        let bytes = Fetcher::new()
            .unwrap()
            .fetch_to_file(url.as_str(), &dest, |done, total| seen.push((done, total)))
            .await
            .unwrap();

        assert_eq!(bytes, 4096);
        assert_eq!(seen, vec![(4096, Some(4096))]);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_fetch_error_omits_signed_url() {
        let tmp = TempDir::new().unwrap();
        let err = Fetcher::new()
            .unwrap()
            .fetch_to_file(
                "http://127.0.0.1:1/book.aaxc?Signature=s3cr3t&Key-Pair-Id=K1",
                &tmp.path().join("book.aaxc"),
                |_, _| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Http(_)));
        let message = err.to_string();
        assert!(!message.contains("s3cr3t"), "{}", message);
        assert!(!message.contains("127.0.0.1"), "{}", message);
    }

    #[tokio::test]
    async fn test_fetch_rejects_unknown_scheme() {
        let tmp = TempDir::new().unwrap();
        let err = Fetcher::new()
            .unwrap()
            .fetch_to_file("ftp://example.com/a", &tmp.path().join("a"), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedUrl(_)));
    }
}
