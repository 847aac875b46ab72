//! Gateway for the `menu_items` table and its images.

use std::sync::Arc;

use log::info;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

use brigade_gateway::{SortOrder, TableClient};
use brigade_identity::IdentityClient;
use brigade_storage::{Bytes, FileOptions, StorageClient};

use crate::error::Result;
use crate::models::{MenuItem, NewMenuItem};
use crate::sync::{RowFetcher, TableSync};

#[derive(Clone)]
pub struct MenuTable {
    base_url: String,
    anon_key: String,
    http_client: Client,
    identity: Arc<IdentityClient>,
    storage: StorageClient,
    image_bucket: String,
    refresh_debounce: std::time::Duration,
}

impl MenuTable {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        http_client: Client,
        identity: Arc<IdentityClient>,
        storage: StorageClient,
        image_bucket: &str,
        refresh_debounce: std::time::Duration,
    ) -> Self {
        Self {
            base_url: base_url.to_string(),
            anon_key: anon_key.to_string(),
            http_client,
            identity,
            storage,
            image_bucket: image_bucket.to_string(),
            refresh_debounce,
        }
    }

    fn client(&self) -> Result<TableClient> {
        super::table_client(
            &self.base_url,
            &self.anon_key,
            "menu_items",
            self.http_client.clone(),
            &self.identity,
        )
    }

    /// Full menu, grouped by category then name. This is also the fetch
    /// behind the live menu screen.
    pub async fn list(&self) -> Result<Vec<MenuItem>> {
        let rows = self
            .client()?
            .select("*")
            .order("category", SortOrder::Ascending)
            .order("name", SortOrder::Ascending)
            .execute::<MenuItem>()
            .await?;
        Ok(rows)
    }

    pub async fn create(&self, item: NewMenuItem) -> Result<MenuItem> {
        item.validate()?;
        let value = self.client()?.insert(&item).await?;
        let created: MenuItem = super::single_row(value)?;
        created.validate()?;
        Ok(created)
    }

    pub async fn update(&self, id: Uuid, item: NewMenuItem) -> Result<MenuItem> {
        item.validate()?;
        let value = self
            .client()?
            .eq("id", &id.to_string())
            .update(&item)
            .await?;
        let updated: MenuItem = super::single_row(value)?;
        updated.validate()?;
        Ok(updated)
    }

    /// Toggle an item without touching the rest of the row.
    pub async fn set_availability(&self, id: Uuid, available: bool) -> Result<MenuItem> {
        let value = self
            .client()?
            .eq("id", &id.to_string())
            .update(json!({ "available": available }))
            .await?;
        super::single_row(value)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.client()?.eq("id", &id.to_string()).delete().await?;
        Ok(())
    }

    /// Upload an image for an item and point its `image_url` at the
    /// public URL. Re-uploads overwrite the previous image at the same
    /// path; a one-hour cache window keeps stale copies short-lived.
    pub async fn upload_image(
        &self,
        id: Uuid,
        file_name: &str,
        contents: Bytes,
        content_type: &str,
    ) -> Result<String> {
        let path = format!("{}/{}", id, file_name);
        let options = FileOptions::new()
            .with_content_type(content_type)
            .with_cache_control("3600")
            .with_upsert(true);

        let url = self
            .storage
            .upload(&self.image_bucket, &path, contents, Some(options))
            .await?;
        info!("uploaded menu image {}", path);

        self.client()?
            .eq("id", &id.to_string())
            .update(json!({ "image_url": url }))
            .await?;

        Ok(url)
    }

    /// Live sync for a menu screen. Mount it with the change client to
    /// start receiving row merges.
    pub fn sync(&self) -> TableSync<MenuItem> {
        let table = self.clone();
        let fetcher: RowFetcher<MenuItem> = Arc::new(move || {
            let table = table.clone();
            Box::pin(async move { table.list().await })
        });
        TableSync::new(fetcher, self.refresh_debounce)
    }
}
