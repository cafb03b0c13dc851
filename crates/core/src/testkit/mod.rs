//! In-memory collaborators for exercising the handlers without a network

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::access::{content_key_name, CredentialStore, CredentialStoreError};
use crate::crypto::Secret;
use crate::namespace::Name;
use crate::transport::{Transport, TransportError};

/// In-memory credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    content_keys: Mutex<BTreeMap<(Name, Name), Secret>>,
    member_keys: Mutex<BTreeMap<Name, Secret>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a group content key directly, bypassing the wrapped-key fetch
    pub fn insert_content_key(&self, group: Name, member: Name, key: Secret) {
        self.content_keys.lock().insert((group, member), key);
    }

    /// Seed a member's own key
    pub fn insert_member_key(&self, member: Name, key: Secret) {
        self.member_keys.lock().insert(member, key);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn content_key(
        &self,
        group: &Name,
        member: &Name,
    ) -> Result<Option<Secret>, CredentialStoreError> {
        Ok(self
            .content_keys
            .lock()
            .get(&(group.clone(), member.clone()))
            .cloned())
    }

    async fn store_content_key(
        &self,
        group: &Name,
        member: &Name,
        key: Secret,
    ) -> Result<(), CredentialStoreError> {
        self.content_keys
            .lock()
            .insert((group.clone(), member.clone()), key);
        Ok(())
    }

    async fn member_key(&self, member: &Name) -> Result<Option<Secret>, CredentialStoreError> {
        Ok(self.member_keys.lock().get(member).cloned())
    }
}

/// Transport serving a fixed set of named objects
#[derive(Default)]
pub struct StaticTransport {
    objects: Mutex<BTreeMap<Name, Bytes>>,
}

impl StaticTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, name: Name, bytes: impl Into<Bytes>) {
        self.objects.lock().insert(name, bytes.into());
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn fetch(&self, name: &Name) -> Result<Bytes, TransportError> {
        self.objects
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(name.clone()))
    }
}

/// Publish the wrapped content key record `<group>/CK/<member>`:
/// the content key sealed under the member's own key
pub fn publish_content_key(
    transport: &StaticTransport,
    member_key: &Secret,
    group: &Name,
    member: &Name,
    content_key: &Secret,
) {
    let wrapped = member_key
        .encrypt(content_key.bytes())
        .expect("wrap content key");
    transport.publish(content_key_name(group, member), wrapped);
}
