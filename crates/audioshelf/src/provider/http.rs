//! [`ContentProvider`] backed by the provider gateway's JSON API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{
    CatalogItem, ContentProvider, CredentialBundle, DecryptionMode, DownloadDescriptor,
    ProviderError,
};
use crate::chapters::ChapterDocument;
use crate::storage::VoucherDocument;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct GatewayRequest<'a> {
    credentials: &'a CredentialBundle,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'a str>,
}

#[derive(Deserialize)]
struct LibraryResponse {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

#[derive(Deserialize)]
struct LicenseResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    iv: Option<String>,
}

/// Talks to the gateway that wraps the provider's vendor protocol.
pub struct HttpContentProvider {
    client: Client,
    base: Url,
}

impl HttpContentProvider {
    pub fn new(gateway_url: &str, request_timeout: Duration) -> Result<Self, ProviderError> {
        // A trailing slash makes `Url::join` append instead of replacing the
        // last path segment.
        let normalized = if gateway_url.ends_with('/') {
            gateway_url.to_string()
        } else {
            format!("{}/", gateway_url)
        };
        let base = Url::parse(&normalized)
            .map_err(|_| ProviderError::UnsupportedUrl(gateway_url.to_string()))?;

        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base
            .join(path)
            .map_err(|_| ProviderError::UnsupportedUrl(path.to_string()))
    }

    async fn post(
        &self,
        path: &str,
        body: &GatewayRequest<'_>,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = self.endpoint(path)?;
        log::debug!("POST {}", url);
        Ok(self.client.post(url).json(body).send().await?)
    }

    async fn license(
        &self,
        credentials: &CredentialBundle,
        content_id: &str,
        mode: DecryptionMode,
    ) -> Result<LicenseResponse, ProviderError> {
        let path = format!("items/{}/license", content_id);
        let response = self
            .post(
                &path,
                &GatewayRequest {
                    credentials,
                    mode: Some(mode.as_str()),
                },
            )
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status {
                endpoint: path,
                status: response.status(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn library(&self, credentials: &CredentialBundle) -> Result<Vec<CatalogItem>, ProviderError> {
        let response = self
            .post(
                "library",
                &GatewayRequest {
                    credentials,
                    mode: None,
                },
            )
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Status {
                endpoint: "library".to_string(),
                status: response.status(),
            });
        }
        let library: LibraryResponse = response.json().await?;
        Ok(library.items)
    }

    async fn voucher_license(
        &self,
        credentials: &CredentialBundle,
        content_id: &str,
    ) -> Result<DownloadDescriptor, ProviderError> {
        let license = self
            .license(credentials, content_id, DecryptionMode::Voucher)
            .await?;
        let url = license.url.ok_or(ProviderError::MissingField("url"))?;
        let key = license.key.ok_or(ProviderError::MissingField("key"))?;
        let iv = license.iv.ok_or(ProviderError::MissingField("iv"))?;

        Ok(DownloadDescriptor {
            url,
            mode: DecryptionMode::Voucher,
            voucher: Some(VoucherDocument { key, iv }),
        })
    }

    async fn legacy_license(
        &self,
        credentials: &CredentialBundle,
        content_id: &str,
    ) -> Result<DownloadDescriptor, ProviderError> {
        let license = self
            .license(credentials, content_id, DecryptionMode::Legacy)
            .await?;

        Ok(DownloadDescriptor {
            url: license.url.ok_or(ProviderError::MissingField("url"))?,
            mode: DecryptionMode::Legacy,
            voucher: None,
        })
    }

    async fn chapters(
        &self,
        credentials: &CredentialBundle,
        content_id: &str,
    ) -> Result<Option<ChapterDocument>, ProviderError> {
        let path = format!("items/{}/chapters", content_id);
        let response = self
            .post(
                &path,
                &GatewayRequest {
                    credentials,
                    mode: None,
                },
            )
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(ProviderError::Status {
                endpoint: path,
                status,
            }),
        }
    }
}
