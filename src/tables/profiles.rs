//! Gateway for the `profiles` table.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::json;

use brigade_gateway::{SortOrder, TableClient};
use brigade_identity::IdentityClient;

use crate::error::Result;
use crate::models::{Profile, Role};
use crate::session::ProfileSource;

#[derive(Clone)]
pub struct ProfilesTable {
    base_url: String,
    anon_key: String,
    http_client: Client,
    identity: Arc<IdentityClient>,
}

impl ProfilesTable {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        http_client: Client,
        identity: Arc<IdentityClient>,
    ) -> Self {
        Self {
            base_url: base_url.to_string(),
            anon_key: anon_key.to_string(),
            http_client,
            identity,
        }
    }

    fn client(&self) -> Result<TableClient> {
        super::table_client(
            &self.base_url,
            &self.anon_key,
            "profiles",
            self.http_client.clone(),
            &self.identity,
        )
    }

    /// Fetch one profile by identity id. `None` when the row is missing
    /// or the row policy hides it.
    pub async fn fetch_by_id(&self, id: &str) -> Result<Option<Profile>> {
        let rows = self
            .client()?
            .select("*")
            .eq("id", id)
            .limit(1)
            .execute::<Profile>()
            .await?;
        Ok(rows.into_iter().next())
    }

    /// All profiles, newest first. Profile rows are readable by any
    /// caller, so this needs no elevated session.
    pub async fn list(&self) -> Result<Vec<Profile>> {
        let rows = self
            .client()?
            .select("*")
            .order("created_at", SortOrder::Descending)
            .execute::<Profile>()
            .await?;
        Ok(rows)
    }

    pub async fn update_display_name(&self, id: &str, display_name: &str) -> Result<Profile> {
        let value = self
            .client()?
            .eq("id", id)
            .update(json!({ "display_name": display_name }))
            .await?;
        super::single_row(value)
    }

    /// Change a profile's role. Row policies let admins update any
    /// profile row; an insufficient caller gets a policy rejection, not
    /// a silent no-op.
    pub async fn set_role(&self, id: &str, role: Role) -> Result<Profile> {
        debug!("setting role of {} to {}", id, role.as_str());
        let value = self
            .client()?
            .eq("id", id)
            .update(json!({ "role": role }))
            .await?;
        super::single_row(value)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.client()?.eq("id", id).delete().await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileSource for ProfilesTable {
    async fn profile_for(
        &self,
        identity_id: &str,
        access_token: &str,
    ) -> Result<Option<Profile>> {
        // Use the session's own token, not whatever the identity client
        // currently holds, so a mid-refresh race cannot read as the
        // wrong caller.
        let rows = TableClient::new(
            &self.base_url,
            &self.anon_key,
            "profiles",
            self.http_client.clone(),
        )?
        .with_auth(access_token)?
        .select("*")
        .eq("id", identity_id)
        .limit(1)
        .execute::<Profile>()
        .await?;

        match rows.into_iter().next() {
            Some(profile) => {
                profile.validate()?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }
}
