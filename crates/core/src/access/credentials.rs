use async_trait::async_trait;

use crate::crypto::Secret;
use crate::namespace::Name;

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("credential store error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Local key material for one consumer.
///
/// Holds the member's own key and caches group content keys once they
/// have been unwrapped, so repeated decrypts under the same group don't
/// refetch the wrapped key record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up the cached content key for `(group, member)`
    async fn content_key(
        &self,
        group: &Name,
        member: &Name,
    ) -> Result<Option<Secret>, CredentialStoreError>;

    /// Cache an unwrapped content key for `(group, member)`
    async fn store_content_key(
        &self,
        group: &Name,
        member: &Name,
        key: Secret,
    ) -> Result<(), CredentialStoreError>;

    /// Look up the member's own key, used to unwrap content key records
    async fn member_key(&self, member: &Name) -> Result<Option<Secret>, CredentialStoreError>;
}
