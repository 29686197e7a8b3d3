//! Recipient tokens and the directory lookups that turn them into users.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Prefix marking a recipient token as a role rather than a user id.
pub const ROLE_PREFIX: &str = "role:";

/// A recipient as named by a rule: a user id or a role scoped to the event's tenant.
///
/// Role tokens are expanded when an event is emitted, never when the rule is
/// registered, so membership changes are picked up by later emissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecipientToken {
    /// A literal user id.
    User(String),
    /// A role key, written `role:<key>` in string form.
    Role(String),
}

impl RecipientToken {
    /// Parse a string token. `"role:foreman"` is a role, anything else a user id.
    pub fn parse(token: &str) -> Self {
        match token.strip_prefix(ROLE_PREFIX) {
            Some(role) => RecipientToken::Role(role.to_string()),
            None => RecipientToken::User(token.to_string()),
        }
    }

    pub fn role(key: impl Into<String>) -> Self {
        RecipientToken::Role(key.into())
    }
}

impl From<&str> for RecipientToken {
    fn from(token: &str) -> Self {
        Self::parse(token)
    }
}

impl From<String> for RecipientToken {
    fn from(token: String) -> Self {
        Self::parse(&token)
    }
}

/// A failed directory lookup.
#[derive(Debug, Error)]
#[error("directory lookup failed: {0}")]
pub struct DirectoryError(pub String);

/// User and role membership lookups owned by the host application.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// The contact address (email) of a user, if one is on file.
    async fn contact_address(&self, user_id: &str) -> Result<Option<String>, DirectoryError>;

    /// Users holding `role_key` within `tenant_id`.
    async fn role_members(
        &self,
        role_key: &str,
        tenant_id: &str,
    ) -> Result<Vec<String>, DirectoryError>;
}

/// Directory lookups that never fail.
///
/// Lookup errors are logged and degrade to "no address" or "no members", so a
/// single broken lookup cannot block the rest of an emission.
pub struct RecipientResolver<'a> {
    directory: &'a dyn Directory,
}

impl<'a> RecipientResolver<'a> {
    pub fn new(directory: &'a dyn Directory) -> Self {
        Self { directory }
    }

    /// A user's contact address, or `None` when missing, blank or unavailable.
    pub async fn resolve_contact_address(&self, user_id: &str) -> Option<String> {
        match self.directory.contact_address(user_id).await {
            Ok(address) => address
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            Err(error) => {
                warn!(user_id, error = %error, "Contact address lookup failed");
                None
            }
        }
    }

    /// Members of a role in a tenant. Without a tenant no lookup is made.
    pub async fn resolve_role_members(
        &self,
        role_key: &str,
        tenant_id: Option<&str>,
    ) -> Vec<String> {
        let Some(tenant_id) = tenant_id else {
            return Vec::new();
        };

        match self.directory.role_members(role_key, tenant_id).await {
            Ok(members) => members,
            Err(error) => {
                warn!(role_key, tenant_id, error = %error, "Role member lookup failed");
                Vec::new()
            }
        }
    }
}

/// A [`Directory`] backed by in-process maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    addresses: HashMap<String, String>,
    roles: HashMap<(String, String), Vec<String>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user's contact address.
    pub fn with_user(mut self, user_id: impl Into<String>, address: impl Into<String>) -> Self {
        self.addresses.insert(user_id.into(), address.into());
        self
    }

    /// Add a user to a role within a tenant.
    pub fn with_role_member(
        mut self,
        tenant_id: impl Into<String>,
        role_key: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        self.roles
            .entry((tenant_id.into(), role_key.into()))
            .or_default()
            .push(user_id.into());
        self
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn contact_address(&self, user_id: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self.addresses.get(user_id).cloned())
    }

    async fn role_members(
        &self,
        role_key: &str,
        tenant_id: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        Ok(self
            .roles
            .get(&(tenant_id.to_string(), role_key.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
