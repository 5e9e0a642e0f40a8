//! The content provider seam: catalog, download licenses, chapter metadata,
//! and credential resolution.

pub mod credentials;
pub mod error;
pub mod fetch;
pub mod http;
pub mod library;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chapters::ChapterDocument;
use crate::storage::VoucherDocument;

pub use credentials::{BundleCredentialResolver, CredentialBundle, CredentialResolver};
pub use error::{CredentialError, ProviderError};
pub use fetch::Fetcher;
pub use http::HttpContentProvider;
pub use library::LibraryCatalog;

/// How the downloaded source must be decrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecryptionMode {
    /// Per-download key and IV issued with the license.
    Voucher,
    /// Per-account activation token.
    Legacy,
}

impl DecryptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecryptionMode::Voucher => "voucher",
            DecryptionMode::Legacy => "legacy",
        }
    }
}

/// One owned item in a user's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub content_id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

/// Where to fetch an item from and how to decrypt it.
#[derive(Debug, Clone)]
pub struct DownloadDescriptor {
    pub url: String,
    pub mode: DecryptionMode,
    /// Present in voucher mode only.
    pub voucher: Option<VoucherDocument>,
}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Every item the account owns.
    async fn library(&self, credentials: &CredentialBundle) -> Result<Vec<CatalogItem>, ProviderError>;

    /// License in the preferred (voucher) mode.
    async fn voucher_license(
        &self,
        credentials: &CredentialBundle,
        content_id: &str,
    ) -> Result<DownloadDescriptor, ProviderError>;

    /// License in the legacy (activation token) mode.
    async fn legacy_license(
        &self,
        credentials: &CredentialBundle,
        content_id: &str,
    ) -> Result<DownloadDescriptor, ProviderError>;

    /// Nested chapter metadata, `None` when the item has none.
    async fn chapters(
        &self,
        credentials: &CredentialBundle,
        content_id: &str,
    ) -> Result<Option<ChapterDocument>, ProviderError>;
}

/// Asks for a voucher-mode license and falls back to legacy mode when that
/// fails or comes back without usable key material.
pub async fn resolve_download(
    provider: &dyn ContentProvider,
    credentials: &CredentialBundle,
    content_id: &str,
) -> Result<DownloadDescriptor, ProviderError> {
    match provider.voucher_license(credentials, content_id).await {
        Ok(descriptor)
            if descriptor.mode == DecryptionMode::Voucher
                && descriptor.voucher.as_ref().is_some_and(VoucherDocument::is_complete) =>
        {
            return Ok(descriptor);
        }
        Ok(_) => log::warn!(
            "Voucher license for {} has no key material, falling back to legacy mode",
            content_id
        ),
        Err(e) => log::warn!(
            "Voucher license for {} failed ({}), falling back to legacy mode",
            content_id,
            e
        ),
    }

    let descriptor = provider.legacy_license(credentials, content_id).await?;
    Ok(DownloadDescriptor {
        mode: DecryptionMode::Legacy,
        voucher: None,
        ..descriptor
    })
}
