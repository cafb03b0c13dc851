use std::sync::Arc;

use bytes::Bytes;

use super::credentials::{CredentialStore, CredentialStoreError};
use crate::crypto::Secret;
use crate::namespace::{Component, Name};
use crate::transport::{Transport, TransportError};

/// Name component under which a group publishes wrapped content keys
const CONTENT_KEY_COMPONENT: &str = "CK";

/// The name of the wrapped content key record for `member` in `group`:
/// `<group>/CK/<member>`
pub fn content_key_name(group: &Name, member: &Name) -> Name {
    group.append(Component::from(CONTENT_KEY_COMPONENT)).extend(member)
}

/// A transport-layer content container holding still-encrypted bytes
#[derive(Debug, Clone)]
pub struct EncryptedContent {
    payload: Bytes,
}

impl EncryptedContent {
    pub fn new(payload: Bytes) -> Self {
        EncryptedContent { payload }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Closed enumeration of decrypt failures reported to the error continuation
#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("no decrypt key for group {0}")]
    NoDecryptKey(Name),
    #[error("invalid encrypted format: {0}")]
    InvalidEncryptedFormat(String),
    #[error("decryption failure: {0}")]
    DecryptionFailure(String),
    #[error("credential store: {0}")]
    CredentialStore(#[from] CredentialStoreError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Decrypts group-protected content on behalf of one member.
///
/// One consumer instance is shared by every handler clone under a
/// protected root; all interaction goes through [`decrypt`](Self::decrypt),
/// which is safe to invoke repeatedly from the event callback context.
pub struct GroupConsumer {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    group: Name,
    member: Name,
}

impl GroupConsumer {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        group: Name,
        member: Name,
    ) -> Self {
        GroupConsumer {
            transport,
            credentials,
            group,
            member,
        }
    }

    pub fn group(&self) -> &Name {
        &self.group
    }

    pub fn member(&self) -> &Name {
        &self.member
    }

    /// Decrypt one content container.
    ///
    /// Uses the cached group content key when the credential store has
    /// one; otherwise fetches this member's wrapped key record, unwraps
    /// it with the member key, and caches the result before decrypting.
    /// No retry is attempted here.
    pub async fn decrypt(&self, content: &EncryptedContent) -> Result<Bytes, DecryptError> {
        let key = match self.credentials.content_key(&self.group, &self.member).await? {
            Some(key) => key,
            None => self.fetch_content_key().await?,
        };

        let plaintext = key
            .decrypt(content.payload())
            .map_err(|e| DecryptError::DecryptionFailure(e.to_string()))?;
        Ok(Bytes::from(plaintext))
    }

    /// Retrieve and unwrap the content key record `<group>/CK/<member>`
    async fn fetch_content_key(&self) -> Result<Secret, DecryptError> {
        let member_key = self
            .credentials
            .member_key(&self.member)
            .await?
            .ok_or_else(|| DecryptError::NoDecryptKey(self.group.clone()))?;

        let record_name = content_key_name(&self.group, &self.member);
        let wrapped = match self.transport.fetch(&record_name).await {
            Ok(bytes) => bytes,
            Err(TransportError::NotFound(name)) => {
                tracing::debug!(record = %name, "no wrapped content key published");
                return Err(DecryptError::NoDecryptKey(self.group.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        let raw = member_key
            .decrypt(&wrapped)
            .map_err(|e| DecryptError::InvalidEncryptedFormat(format!("wrapped content key: {e}")))?;
        let key = Secret::from_slice(&raw)
            .map_err(|e| DecryptError::InvalidEncryptedFormat(format!("content key: {e}")))?;

        self.credentials
            .store_content_key(&self.group, &self.member, key.clone())
            .await?;
        Ok(key)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::{publish_content_key, MemoryCredentialStore, StaticTransport};

    fn consumer(
        transport: Arc<StaticTransport>,
        credentials: Arc<MemoryCredentialStore>,
    ) -> GroupConsumer {
        GroupConsumer::new(
            transport,
            credentials,
            Name::parse("/org/docs"),
            Name::parse("/org/alice"),
        )
    }

    #[tokio::test]
    async fn test_decrypt_with_cached_content_key() {
        let credentials = MemoryCredentialStore::new();
        let content_key = Secret::generate();
        credentials.insert_content_key(
            Name::parse("/org/docs"),
            Name::parse("/org/alice"),
            content_key.clone(),
        );

        let consumer = consumer(StaticTransport::new(), credentials);
        let sealed = content_key.encrypt(b"plaintext").unwrap();
        let plain = consumer
            .decrypt(&EncryptedContent::new(sealed.into()))
            .await
            .unwrap();
        assert_eq!(plain, Bytes::from_static(b"plaintext"));
    }

    #[tokio::test]
    async fn test_decrypt_fetches_and_caches_wrapped_key() {
        let group = Name::parse("/org/docs");
        let member = Name::parse("/org/alice");
        let credentials = MemoryCredentialStore::new();
        let transport = StaticTransport::new();

        let member_key = Secret::generate();
        let content_key = Secret::generate();
        credentials.insert_member_key(member.clone(), member_key.clone());
        publish_content_key(&transport, &member_key, &group, &member, &content_key);

        let consumer = consumer(transport, credentials.clone());
        let sealed = content_key.encrypt(b"fetched").unwrap();
        let plain = consumer
            .decrypt(&EncryptedContent::new(sealed.into()))
            .await
            .unwrap();
        assert_eq!(plain, Bytes::from_static(b"fetched"));

        // the unwrapped key is now cached locally
        let cached = credentials.content_key(&group, &member).await.unwrap();
        assert_eq!(cached, Some(content_key));
    }

    #[tokio::test]
    async fn test_no_key_anywhere_is_no_decrypt_key() {
        let consumer = consumer(StaticTransport::new(), MemoryCredentialStore::new());
        let err = consumer
            .decrypt(&EncryptedContent::new(Bytes::from_static(b"whatever")))
            .await
            .unwrap_err();
        assert!(matches!(err, DecryptError::NoDecryptKey(_)));
    }

    #[tokio::test]
    async fn test_wrong_key_is_decryption_failure() {
        let credentials = MemoryCredentialStore::new();
        credentials.insert_content_key(
            Name::parse("/org/docs"),
            Name::parse("/org/alice"),
            Secret::generate(),
        );

        let consumer = consumer(StaticTransport::new(), credentials);
        let sealed = Secret::generate().encrypt(b"other key").unwrap();
        let err = consumer
            .decrypt(&EncryptedContent::new(sealed.into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DecryptError::DecryptionFailure(_)));
    }

    #[test]
    fn test_content_key_name_layout() {
        let name = content_key_name(&Name::parse("/org/docs"), &Name::parse("/org/alice"));
        assert_eq!(name.to_string(), "/org/docs/CK/org/alice");
    }
}
