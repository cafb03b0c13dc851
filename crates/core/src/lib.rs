/**
 * Hierarchical names and the in-memory namespace tree.
 *  Nodes are cheap-clone shared handles; state changes
 *  bubble to subscriptions registered on any ancestor.
 * Also home to the deserialization extension point that
 *  handlers hook into.
 */
pub mod namespace;
/**
 * Content-key encryption (ChaCha20-Poly1305 with a BLAKE3
 *  plaintext-hash header). Every protected object is sealed
 *  under a single group content key.
 */
pub mod crypto;
/**
 * The group access-control side of the house:
 *  - GroupDecryptHandler, which installs itself on a protected
 *    subtree and cascades onto children as they appear
 *  - GroupConsumer, the shared decryption engine behind it
 *  - the CredentialStore seam for local key material
 */
pub mod access;
/**
 * Segment reassembly: turns a stream of per-segment namespace
 *  events into one contiguous object, delivered exactly once.
 */
pub mod segmented;
/**
 * The transport seam. Fetch/retry policy for remote objects
 *  lives behind this trait, not in this crate.
 */
pub mod transport;
/**
 * In-memory collaborators for tests and examples: a credential
 *  store, a static transport, and wrapped-key publishing helpers.
 */
pub mod testkit;

pub mod prelude {
    pub use crate::access::{CredentialStore, GroupConsumer, GroupDecryptHandler};
    pub use crate::crypto::Secret;
    pub use crate::namespace::{Component, DeserializeHandler, Name, Namespace, NodeState};
    pub use crate::segmented::SegmentedObjectHandler;
    pub use crate::transport::Transport;
}
