use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::warn;

use crate::models::WatchedItem;
use crate::utils::error::{AppError, Result};

/// Durable registry of watched items.
///
/// Items are kept in insertion order. Every mutation rewrites a full snapshot
/// to a temporary file and renames it over the previous one, so the on-disk
/// registry is always either the old complete state or the new complete
/// state. If the write fails, the in-memory mutation is rolled back and the
/// error surfaces as fatal, so memory and disk never diverge.
pub struct ItemStore {
    path: PathBuf,
    items: Mutex<Vec<WatchedItem>>,
}

impl ItemStore {
    /// Loads the registry snapshot, treating a missing or unparseable file
    /// as an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<WatchedItem>>(&contents) {
                Ok(items) => items,
                Err(e) => {
                    warn!(path = %path.display(), error = %e,
                          "Registry snapshot is corrupt, starting with an empty registry");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e,
                      "Registry snapshot is unreadable, starting with an empty registry");
                Vec::new()
            }
        };

        Self {
            path,
            items: Mutex::new(items),
        }
    }

    /// Registers a new item. Fails if an item with the same normalized URL
    /// or the same id is already watched. The id check matters on its own:
    /// regional storefront paths produce distinct URLs for one product id,
    /// and every lookup in the registry is keyed by id.
    pub async fn add(&self, item: WatchedItem) -> Result<WatchedItem> {
        let mut items = self.items.lock().await;

        if items.iter().any(|existing| existing.url == item.url) {
            return Err(AppError::DuplicateUrl { url: item.url });
        }
        if items.iter().any(|existing| existing.id == item.id) {
            return Err(AppError::DuplicateId { id: item.id });
        }

        items.push(item.clone());
        if let Err(e) = write_snapshot(&self.path, &items) {
            items.pop();
            return Err(e);
        }

        Ok(item)
    }

    /// Removes an item by id. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut items = self.items.lock().await;

        let Some(index) = items.iter().position(|item| item.id == id) else {
            return Ok(false);
        };

        let removed = items.remove(index);
        if let Err(e) = write_snapshot(&self.path, &items) {
            items.insert(index, removed);
            return Err(e);
        }

        Ok(true)
    }

    /// All watched items, in insertion order.
    pub async fn list(&self) -> Vec<WatchedItem> {
        self.items.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Result<WatchedItem> {
        let items = self.items.lock().await;
        items
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound { id: id.to_string() })
    }

    /// Replaces an item with its post-check state and persists the registry.
    ///
    /// A result timestamped older than the stored `last_checked_at` is stale
    /// (e.g. a slow check finishing after a newer one) and is discarded: the
    /// stored item is returned unchanged.
    pub async fn apply_check_result(&self, id: &str, updated: WatchedItem) -> Result<WatchedItem> {
        let mut items = self.items.lock().await;

        let Some(index) = items.iter().position(|item| item.id == id) else {
            return Err(AppError::NotFound { id: id.to_string() });
        };

        let current = &items[index];
        if let (Some(current_checked), Some(new_checked)) =
            (current.last_checked_at, updated.last_checked_at)
        {
            if new_checked < current_checked {
                warn!(item_id = %id, "Discarding stale check result");
                return Ok(current.clone());
            }
        }

        let previous = std::mem::replace(&mut items[index], updated.clone());
        if let Err(e) = write_snapshot(&self.path, &items) {
            items[index] = previous;
            return Err(e);
        }

        Ok(updated)
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

fn write_snapshot(path: &Path, items: &[WatchedItem]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::Persistence(format!("creating {}: {}", parent.display(), e)))?;
    }

    let dir = parent.unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| AppError::Persistence(format!("creating temp snapshot: {}", e)))?;

    serde_json::to_writer_pretty(&mut tmp, items)
        .map_err(|e| AppError::Persistence(format!("serializing snapshot: {}", e)))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| AppError::Persistence(format!("syncing snapshot: {}", e)))?;

    tmp.persist(path)
        .map_err(|e| AppError::Persistence(format!("replacing {}: {}", path.display(), e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StockState, WatchedItem};
    use chrono::Utc;
    use url::Url;

    fn item(product_id: u32) -> WatchedItem {
        let url = Url::parse(&format!(
            "https://www.popmart.com/us/products/{product_id}/test-figure-{product_id}"
        ))
        .unwrap();
        WatchedItem::from_url(&url)
    }

    fn store_in(dir: &tempfile::TempDir) -> ItemStore {
        ItemStore::load(dir.path().join("items.json"))
    }

    #[tokio::test]
    async fn test_add_get_list_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add(item(1)).await.unwrap();
        store.add(item(2)).await.unwrap();
        store.add(item(3)).await.unwrap();

        let listed = store.list().await;
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, "1");
        assert_eq!(listed[1].id, "2");
        assert_eq!(listed[2].id, "3");

        assert_eq!(store.get("2").await.unwrap().id, "2");
        assert!(matches!(
            store.get("99").await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add(item(1)).await.unwrap();
        let result = store.add(item(1)).await;
        assert!(matches!(result, Err(AppError::DuplicateUrl { .. })));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_product_id_under_different_storefronts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        // Two regional paths for the same product: distinct URLs, one id.
        let us = WatchedItem::from_url(
            &Url::parse("https://www.popmart.com/us/products/675/test-figure").unwrap(),
        );
        let sg = WatchedItem::from_url(
            &Url::parse("https://www.popmart.com/sg/products/675/test-figure").unwrap(),
        );
        assert_eq!(us.id, sg.id);

        store.add(us).await.unwrap();
        let result = store.add(sg).await;
        assert!(matches!(result, Err(AppError::DuplicateId { .. })));

        // Every id still resolves to exactly one record.
        assert_eq!(store.len().await, 1);
        assert!(store.remove("675").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add(item(1)).await.unwrap();
        assert!(store.remove("1").await.unwrap());
        assert!(!store.remove("1").await.unwrap());
        assert!(!store.remove("never-existed").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_remove_algebra() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add(item(1)).await.unwrap();
        store.add(item(2)).await.unwrap();
        store.remove("1").await.unwrap();
        store.add(item(3)).await.unwrap();
        store.remove("1").await.unwrap(); // already gone
        store.remove("2").await.unwrap();

        let remaining: Vec<String> = store.list().await.into_iter().map(|i| i.id).collect();
        assert_eq!(remaining, vec!["3".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");

        {
            let store = ItemStore::load(&path);
            store.add(item(1)).await.unwrap();
            let mut updated = store.get("1").await.unwrap();
            updated.last_state = StockState::InStock;
            updated.last_checked_at = Some(Utc::now());
            store.apply_check_result("1", updated).await.unwrap();
        }

        let reloaded = ItemStore::load(&path);
        let items = reloaded.list().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].last_state, StockState::InStock);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_yields_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, "{not valid json").unwrap();

        let store = ItemStore::load(&path);
        assert!(store.is_empty().await);

        // The store stays usable afterwards.
        store.add(item(1)).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_atomic_replace_keeps_committed_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");

        {
            let store = ItemStore::load(&path);
            store.add(item(1)).await.unwrap();
            store.add(item(2)).await.unwrap();
        }

        // Simulate a crash mid-write: a half-written temp file next to the
        // snapshot must not affect what load() sees.
        std::fs::write(dir.path().join(".tmp-partial"), "[{\"id\":").unwrap();

        let reloaded = ItemStore::load(&path);
        assert_eq!(reloaded.len().await, 2);
    }

    #[tokio::test]
    async fn test_stale_check_result_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.add(item(1)).await.unwrap();

        let now = Utc::now();
        let mut fresh = store.get("1").await.unwrap();
        fresh.last_state = StockState::InStock;
        fresh.last_checked_at = Some(now);
        store.apply_check_result("1", fresh).await.unwrap();

        let mut stale = store.get("1").await.unwrap();
        stale.last_state = StockState::OutOfStock;
        stale.last_checked_at = Some(now - chrono::Duration::seconds(30));
        let applied = store.apply_check_result("1", stale).await.unwrap();

        assert_eq!(applied.last_state, StockState::InStock);
        assert_eq!(store.get("1").await.unwrap().last_state, StockState::InStock);
    }

    #[tokio::test]
    async fn test_apply_check_result_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let result = store.apply_check_result("missing", item(1)).await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
    }
}
