//! Row types for the back-office tables.
//!
//! Column names match the backing store exactly; serde does the mapping
//! between Rust casing and the lowercase enum values stored in text
//! columns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Access level of a profile. Ordering is part of the contract:
/// `Customer < Admin < Superadmin`, and a higher role passes every
/// check a lower one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

/// Application-level profile row, keyed by the identity store's user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::validation("profile id must not be empty"));
        }
        if !self.email.contains('@') {
            return Err(Error::validation(format!(
                "'{}' is not a valid email address",
                self.email
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuCategory {
    Appetizer,
    Main,
    Dessert,
    Beverage,
}

impl MenuCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MenuCategory::Appetizer => "appetizer",
            MenuCategory::Main => "main",
            MenuCategory::Dessert => "dessert",
            MenuCategory::Beverage => "beverage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    pub category: MenuCategory,
    #[serde(default)]
    pub image_url: Option<String>,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MenuItem {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("menu item name must not be empty"));
        }
        validate_price(self.price)?;
        Ok(())
    }
}

/// Insert/update payload for a menu item. Server-assigned columns
/// (`id`, timestamps) are absent.
#[derive(Debug, Clone, Serialize)]
pub struct NewMenuItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: Decimal,
    pub category: MenuCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub available: bool,
}

impl NewMenuItem {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("menu item name must not be empty"));
        }
        validate_price(self.price)?;
        Ok(())
    }
}

/// One line of an order. Price is captured at order time so later menu
/// edits do not rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("order item name must not be empty"));
        }
        if self.quantity == 0 {
            return Err(Error::validation("order item quantity must be at least 1"));
        }
        validate_price(self.price)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled orders are done; the kitchen screens only
    /// dim them, nothing here forbids an admin moving one back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_name: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn validate(&self) -> Result<()> {
        if self.customer_name.trim().is_empty() {
            return Err(Error::validation("customer name must not be empty"));
        }
        if self.total_amount.is_sign_negative() {
            return Err(Error::validation("order total must not be negative"));
        }
        for item in &self.items {
            item.validate()?;
        }
        Ok(())
    }
}

/// Insert payload for a new order. Status, read flag and total are set
/// by the placing code, not the caller.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub items: Vec<OrderItem>,
}

impl NewOrder {
    pub fn total_amount(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.customer_name.trim().is_empty() {
            return Err(Error::validation("customer name must not be empty"));
        }
        if let Some(email) = &self.customer_email {
            if !email.contains('@') {
                return Err(Error::validation(format!(
                    "'{}' is not a valid email address",
                    email
                )));
            }
        }
        if self.items.is_empty() {
            return Err(Error::validation("an order needs at least one item"));
        }
        for item in &self.items {
            item.validate()?;
        }
        Ok(())
    }
}

fn validate_price(price: Decimal) -> Result<()> {
    if price.is_sign_negative() {
        return Err(Error::validation("price must not be negative"));
    }
    if price.round_dp(2) != price {
        return Err(Error::validation(
            "price must have at most two decimal places",
        ));
    }
    Ok(())
}
