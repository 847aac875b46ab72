//! Gateway for the `orders` table.

use std::sync::Arc;

use log::info;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

use brigade_gateway::{SortOrder, TableClient};
use brigade_identity::IdentityClient;

use crate::error::Result;
use crate::models::{NewOrder, Order, OrderStatus};
use crate::sync::{RowFetcher, TableSync};

#[derive(Clone)]
pub struct OrdersTable {
    base_url: String,
    anon_key: String,
    http_client: Client,
    identity: Arc<IdentityClient>,
    refresh_debounce: std::time::Duration,
}

impl OrdersTable {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        http_client: Client,
        identity: Arc<IdentityClient>,
        refresh_debounce: std::time::Duration,
    ) -> Self {
        Self {
            base_url: base_url.to_string(),
            anon_key: anon_key.to_string(),
            http_client,
            identity,
            refresh_debounce,
        }
    }

    fn client(&self) -> Result<TableClient> {
        super::table_client(
            &self.base_url,
            &self.anon_key,
            "orders",
            self.http_client.clone(),
            &self.identity,
        )
    }

    /// All orders, newest first. Row policies restrict reads to admins;
    /// the public storefront only inserts.
    pub async fn list(&self) -> Result<Vec<Order>> {
        let rows = self
            .client()?
            .select("*")
            .order("created_at", SortOrder::Descending)
            .execute::<Order>()
            .await?;
        Ok(rows)
    }

    /// Place a new order. Works for anonymous callers too; the insert
    /// policy is open so walk-in customers can order without an account.
    pub async fn place(&self, order: NewOrder) -> Result<Order> {
        order.validate()?;

        let payload = json!({
            "customer_name": order.customer_name,
            "customer_email": order.customer_email,
            "items": order.items,
            "total_amount": order.total_amount(),
            "status": OrderStatus::Pending,
            "is_read": false,
        });

        let value = self.client()?.insert(&payload).await?;
        let placed: Order = super::single_row(value)?;
        placed.validate()?;
        info!("order {} placed, total {}", placed.id, placed.total_amount);
        Ok(placed)
    }

    /// Move an order to `status`. Any transition is allowed, so staff can
    /// undo mistakes (a completed order back to preparing, say); touching
    /// an order this way also marks it read for the unread badge.
    pub async fn set_status(&self, id: Uuid, status: OrderStatus) -> Result<Order> {
        let value = self
            .client()?
            .eq("id", &id.to_string())
            .update(json!({ "status": status, "is_read": true }))
            .await?;
        super::single_row(value)
    }

    /// Mark an order read without changing its status.
    pub async fn mark_read(&self, id: Uuid) -> Result<Order> {
        let value = self
            .client()?
            .eq("id", &id.to_string())
            .update(json!({ "is_read": true }))
            .await?;
        super::single_row(value)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.client()?.eq("id", &id.to_string()).delete().await?;
        Ok(())
    }

    /// Live sync for the kitchen screen.
    pub fn sync(&self) -> TableSync<Order> {
        let table = self.clone();
        let fetcher: RowFetcher<Order> = Arc::new(move || {
            let table = table.clone();
            Box::pin(async move { table.list().await })
        });
        TableSync::new(fetcher, self.refresh_debounce)
    }
}
