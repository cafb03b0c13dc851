mod consumer;
mod credentials;

pub use consumer::{content_key_name, DecryptError, EncryptedContent, GroupConsumer};
pub use credentials::{CredentialStore, CredentialStoreError};

use std::sync::Arc;

use bytes::Bytes;

use crate::namespace::{
    DeserializeHandler, Name, Namespace, NodeState, OnDeserialized, SubscriptionId,
};
use crate::transport::Transport;

/**
 * Group decryption adapter
 * ========================
 * Installs a group-decryption implementation of the namespace tree's
 *  deserialization extension point, and makes sure every node created
 *  under the protected root inherits it.
 * One consumer instance is built at the root and shared by reference
 *  through every clone; the cascade works one level at a time -- each
 *  handler only reacts to its own node's direct children, and the clone
 *  it installs there picks up that child's children in turn.
 * Handlers hold no reference back into the tree: each node retains the
 *  handlers installed on it (handler slot and subscription closure), so
 *  dropping a subtree frees its handlers with it.
 */
pub struct GroupDecryptHandler {
    consumer: Arc<GroupConsumer>,
}

impl GroupDecryptHandler {
    /// Protect the subtree under `root`.
    ///
    /// Builds one [`GroupConsumer`] scoped to
    /// `(transport, credentials, group, member)`, subscribes to all state
    /// changes at and below `root`, and installs the handler as `root`'s
    /// deserialize handler. The subscription holds a strong reference to
    /// the handler and lives as long as the governed subtree.
    pub fn new(
        root: &Namespace,
        transport: Arc<dyn Transport>,
        group: Name,
        member: Name,
        credentials: Arc<dyn CredentialStore>,
    ) -> Arc<Self> {
        let consumer = Arc::new(GroupConsumer::new(transport, credentials, group, member));
        let handler = Arc::new(GroupDecryptHandler { consumer });
        handler.subscribe(root);
        root.set_deserialize_handler(handler.clone());
        handler
    }

    /// The shared decryption engine behind this handler and all its clones
    pub fn consumer(&self) -> &Arc<GroupConsumer> {
        &self.consumer
    }

    /// Derived construction mode: same consumer instance, no new
    /// transport or key material. The clone subscribes on `child` so the
    /// cascade continues below it.
    fn clone_for_child(&self, child: &Namespace) -> Arc<Self> {
        let handler = Arc::new(GroupDecryptHandler {
            consumer: self.consumer.clone(),
        });
        handler.subscribe(child);
        handler
    }

    fn subscribe(self: &Arc<Self>, node: &Namespace) {
        let this = Arc::clone(self);
        node.on_state_changed(Arc::new(move |parent, changed, state, id| {
            this.on_state_changed(parent, changed, state, id);
        }));
    }

    fn on_state_changed(
        &self,
        parent: &Namespace,
        changed: &Namespace,
        state: NodeState,
        _subscription: SubscriptionId,
    ) {
        // direct children only; deeper descendants inherit from the
        // clone installed here when their own parent sees them appear
        if state != NodeState::NameExists || changed.name().len() != parent.name().len() + 1 {
            return;
        }
        tracing::debug!(child = %changed.name(), "inheriting group decrypt handler");
        changed.set_deserialize_handler(self.clone_for_child(changed));
    }
}

impl DeserializeHandler for GroupDecryptHandler {
    /// Start an asynchronous decrypt of `raw` and report that the attempt
    /// is underway. Success is delivered through `on_deserialized`;
    /// failure is logged and marks the node [`NodeState::DecryptionError`].
    /// Neither outcome is observable through the return value. Outside an
    /// async runtime the attempt takes the failure path instead of
    /// panicking.
    fn can_deserialize(
        &self,
        node: &Namespace,
        raw: Bytes,
        on_deserialized: OnDeserialized,
    ) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::error!(node = %node.name(), "no async runtime to decrypt on");
                node.set_state(NodeState::DecryptionError);
                return true;
            }
        };
        let consumer = Arc::clone(&self.consumer);
        let node = node.clone();
        let content = EncryptedContent::new(raw);
        runtime.spawn(async move {
            match consumer.decrypt(&content).await {
                Ok(plaintext) => {
                    // a misbehaving downstream callback must not unwind
                    // into the decrypt pipeline
                    if let Err(err) = on_deserialized(plaintext) {
                        tracing::error!(node = %node.name(), "callback failed: {err:#}");
                    }
                }
                Err(err) => {
                    tracing::error!(node = %node.name(), "group decrypt failed: {err}");
                    node.set_state(NodeState::DecryptionError);
                }
            }
        });
        true
    }
}
