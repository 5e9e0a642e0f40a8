//! Read-through cache of each user's catalog.

use std::sync::Arc;

use super::{CatalogItem, ContentProvider};
use crate::error::Result;
use crate::jobs::{JobStore, User};

/// Serves a user's catalog from the store's snapshot, fetching it from the
/// provider only when no snapshot exists or on an explicit refresh.
#[derive(Clone)]
pub struct LibraryCatalog {
    store: JobStore,
    provider: Arc<dyn ContentProvider>,
}

impl LibraryCatalog {
    pub fn new(store: JobStore, provider: Arc<dyn ContentProvider>) -> Self {
        Self { store, provider }
    }

    pub async fn items(&self, user: &User) -> Result<Vec<CatalogItem>> {
        match self.cached(user)? {
            Some(items) => Ok(items),
            None => self.refresh(user).await,
        }
    }

    /// Fetches the catalog and overwrites the snapshot.
    pub async fn refresh(&self, user: &User) -> Result<Vec<CatalogItem>> {
        let items = self.provider.library(&user.credentials).await?;
        let json = serde_json::to_string(&items).map_err(crate::provider::ProviderError::from)?;
        self.store.save_library_cache(user.id, &json)?;
        log::info!("Library refreshed for user {}: {} item(s)", user.id, items.len());
        Ok(items)
    }

    /// Looks `content_id` up in the snapshot. A miss refreshes the snapshot
    /// once, so items bought after it was taken are still found.
    pub async fn find(&self, user: &User, content_id: &str) -> Result<Option<CatalogItem>> {
        if let Some(item) = self.cached(user)?.and_then(|items| pick(items, content_id)) {
            return Ok(Some(item));
        }
        log::debug!("{} not in library snapshot of user {}, refreshing", content_id, user.id);
        Ok(pick(self.refresh(user).await?, content_id))
    }

    fn cached(&self, user: &User) -> Result<Option<Vec<CatalogItem>>> {
        let Some(json) = self.store.library_cache(user.id)? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(items) => Ok(Some(items)),
            Err(e) => {
                log::warn!("Discarding unreadable library snapshot for user {}: {}", user.id, e);
                Ok(None)
            }
        }
    }
}

fn pick(items: Vec<CatalogItem>, content_id: &str) -> Option<CatalogItem> {
    items.into_iter().find(|item| item.content_id == content_id)
}
