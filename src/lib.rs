//! Back-office core for a restaurant storefront and kitchen.
//!
//! One [`Backoffice`] instance wires the four backing-store services
//! together: the identity store for sign-in, the REST gateway for rows,
//! the change feed for live screens and object storage for menu images.
//!
//! ```no_run
//! use brigade::prelude::*;
//!
//! # async fn run() -> brigade::Result<()> {
//! let office = Backoffice::from_env()?;
//!
//! let resolver = office.session_resolver();
//! resolver.start();
//! let profile = resolver.resolve().await;
//!
//! if can_access(profile.as_ref(), Role::Admin) {
//!     let orders = office.orders().list().await?;
//!     println!("{} orders", orders.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod sync;
pub mod tables;

pub use brigade_gateway::{SortOrder, TableClient};
pub use brigade_identity::{IdentityClient, Session, SessionChange};
pub use brigade_realtime::{ChangeClient, ChangeEvent, ChangeOp, ConnectionState};
pub use brigade_storage::{Bytes, StorageClient};

pub use access::can_access;
pub use config::{ClientOptions, Config};
pub use error::{Error, Result};
pub use models::{
    MenuCategory, MenuItem, NewMenuItem, NewOrder, Order, OrderItem, OrderStatus, Profile, Role,
};
pub use session::SessionResolver;
pub use sync::{ChangeSource, SyncState, TableSync};
pub use tables::{MenuTable, OrdersTable, ProfilesTable};

use std::sync::{Arc, OnceLock};

use reqwest::Client;

/// Entry point holding the connection settings and the shared identity
/// client. Cheap accessors hand out service clients wired to the same
/// project.
pub struct Backoffice {
    url: String,
    anon_key: String,
    http_client: Client,
    identity: Arc<IdentityClient>,
    options: ClientOptions,
    resolver: OnceLock<Arc<SessionResolver>>,
}

impl Backoffice {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self::new_with_options(url, anon_key, ClientOptions::default())
    }

    pub fn new_with_options(url: &str, anon_key: &str, options: ClientOptions) -> Self {
        let http_client = match options.request_timeout {
            Some(timeout) => Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            None => Client::new(),
        };
        let identity = Arc::new(IdentityClient::new(url, anon_key, http_client.clone()));

        Self {
            url: url.to_string(),
            anon_key: anon_key.to_string(),
            http_client,
            identity,
            options,
            resolver: OnceLock::new(),
        }
    }

    /// Build from `BRIGADE_URL` and `BRIGADE_ANON_KEY`.
    pub fn from_env() -> Result<Self> {
        let config = Config::from_env()?;
        Ok(Self::new(&config.url, &config.anon_key))
    }

    pub fn identity(&self) -> Arc<IdentityClient> {
        Arc::clone(&self.identity)
    }

    /// Raw gateway for a table, carrying the current access token. The
    /// typed gateways below cover the known tables; this is the escape
    /// hatch.
    pub fn table(&self, name: &str) -> Result<TableClient> {
        tables::table_client(
            &self.url,
            &self.anon_key,
            name,
            self.http_client.clone(),
            &self.identity,
        )
    }

    pub fn profiles(&self) -> ProfilesTable {
        ProfilesTable::new(
            &self.url,
            &self.anon_key,
            self.http_client.clone(),
            self.identity(),
        )
    }

    pub fn menu(&self) -> MenuTable {
        MenuTable::new(
            &self.url,
            &self.anon_key,
            self.http_client.clone(),
            self.identity(),
            self.storage(),
            &self.options.image_bucket,
            self.options.refresh_debounce,
        )
    }

    pub fn orders(&self) -> OrdersTable {
        OrdersTable::new(
            &self.url,
            &self.anon_key,
            self.http_client.clone(),
            self.identity(),
            self.options.refresh_debounce,
        )
    }

    pub fn storage(&self) -> StorageClient {
        StorageClient::new(&self.url, &self.anon_key, self.http_client.clone())
    }

    /// Change feed client. Call [`ChangeClient::set_auth`] after sign-in
    /// so row policies filter the feed for the right caller.
    pub fn realtime(&self) -> ChangeClient {
        ChangeClient::new(&self.url, &self.anon_key)
    }

    /// The one resolved-session slot for this instance. Every call hands
    /// out the same resolver, so screens share a single writer and
    /// repeated `start()` calls stay idempotent.
    pub fn session_resolver(&self) -> Arc<SessionResolver> {
        self.resolver
            .get_or_init(|| SessionResolver::new(self.identity(), Arc::new(self.profiles())))
            .clone()
    }

    /// Startup check that the image bucket exists and is public-read.
    pub async fn verify_storage(&self) -> Result<()> {
        self.storage()
            .ensure_public_bucket(&self.options.image_bucket)
            .await?;
        Ok(())
    }
}

pub mod prelude {
    pub use crate::access::can_access;
    pub use crate::config::ClientOptions;
    pub use crate::error::{Error, Result};
    pub use crate::models::{
        MenuCategory, MenuItem, NewMenuItem, NewOrder, Order, OrderItem, OrderStatus, Profile,
        Role,
    };
    pub use crate::session::SessionResolver;
    pub use crate::sync::{SyncState, TableSync};
    pub use crate::Backoffice;
}

#[cfg(test)]
pub(crate) fn test_env_lock() -> &'static std::sync::Mutex<()> {
    use std::sync::OnceLock;
    static LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| std::sync::Mutex::new(()))
}
