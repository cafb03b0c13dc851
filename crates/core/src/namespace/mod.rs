mod name;

pub use name::{Component, Name};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

/**
 * Namespace tree
 * ==============
 * An in-memory tree of named data objects. Each node tracks one
 *  object's delivery lifecycle; components elsewhere in the crate
 *  (the segment reassembler, the group decryption adapter) attach
 *  themselves to nodes and react to its state-change events.
 * Dispatch is synchronous: a state change at a node is delivered to
 *  subscriptions on that node and every ancestor, and each callback
 *  runs to completion before the next event fires. Callbacks are
 *  invoked with no internal locks held, so they may create children
 *  or install handlers re-entrantly.
 * What this tree deliberately does *not* do: express interests,
 *  fetch or retry anything over a network, or encode packets. Raw
 *  bytes arrive via `install_data` from whatever fetch layer sits
 *  in front of it.
 */

/// Delivery lifecycle of one namespace node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    /// The name is known to exist (the node was just created)
    NameExists,
    /// Raw (possibly encrypted) bytes have arrived at the node
    DataReceived,
    /// An installed handler is deserializing the raw bytes
    Decrypting,
    /// The handler's decrypt failed; the object will never complete
    DecryptionError,
    /// The application object is attached and final
    ObjectReady,
}

pub type SubscriptionId = u64;

/// State-change callback: `(subscribed_node, changed_node, state, subscription_id)`
pub type OnStateChanged =
    Arc<dyn Fn(&Namespace, &Namespace, NodeState, SubscriptionId) + Send + Sync>;

/// Completion callback for the deserialization contract.
///
/// An `Err` returned here is caught and logged at the boundary and never
/// propagated back into the decrypt pipeline.
pub type OnDeserialized = Box<dyn FnOnce(Bytes) -> anyhow::Result<()> + Send>;

/// The extension point by which raw bytes attached to a node are
/// transformed into an application-level object.
pub trait DeserializeHandler: Send + Sync {
    /// Begin deserializing `raw` bytes that arrived at `node`.
    ///
    /// The return value only reports that this handler will *attempt* the
    /// transformation. Completion is asynchronous and observable solely
    /// through `on_deserialized` (success) or the node's state (failure) --
    /// callers must not assume the object is ready when this returns.
    fn can_deserialize(&self, node: &Namespace, raw: Bytes, on_deserialized: OnDeserialized)
        -> bool;
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// A cheap-clone shared handle to one node of the namespace tree
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    name: Name,
    parent: Option<Weak<NodeInner>>,
    children: Mutex<BTreeMap<Component, Namespace>>,
    state: Mutex<NodeState>,
    payload: Mutex<Option<Bytes>>,
    handler: Mutex<Option<Arc<dyn DeserializeHandler>>>,
    subscriptions: Mutex<Vec<(SubscriptionId, OnStateChanged)>>,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name.to_string())
            .field("state", &self.state())
            .finish()
    }
}

impl Namespace {
    /// Create a detached root node
    pub fn root(name: impl Into<Name>) -> Self {
        Namespace::new_node(name.into(), None)
    }

    fn new_node(name: Name, parent: Option<Weak<NodeInner>>) -> Self {
        Namespace {
            inner: Arc::new(NodeInner {
                name,
                parent,
                children: Mutex::new(BTreeMap::new()),
                state: Mutex::new(NodeState::NameExists),
                payload: Mutex::new(None),
                handler: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &Name {
        &self.inner.name
    }

    pub fn state(&self) -> NodeState {
        *self.inner.state.lock()
    }

    /// The application object, once one has been attached
    pub fn payload(&self) -> Option<Bytes> {
        self.inner.payload.lock().clone()
    }

    pub fn parent(&self) -> Option<Namespace> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Namespace { inner })
    }

    /// Get or create the child under `component`.
    ///
    /// Creating a child fires a `NameExists` state change for it.
    pub fn child(&self, component: impl Into<Component>) -> Namespace {
        let component = component.into();
        let created;
        let child = {
            let mut children = self.inner.children.lock();
            match children.get(&component) {
                Some(existing) => {
                    created = false;
                    existing.clone()
                }
                None => {
                    let node = Namespace::new_node(
                        self.inner.name.append(component.clone()),
                        Some(Arc::downgrade(&self.inner)),
                    );
                    children.insert(component, node.clone());
                    created = true;
                    node
                }
            }
        };
        if created {
            child.notify(NodeState::NameExists);
        }
        child
    }

    /// Get or create the descendant reached by walking `relative`
    /// one component at a time, firing `NameExists` for each node created
    pub fn descendant(&self, relative: &Name) -> Namespace {
        let mut node = self.clone();
        for component in relative.components() {
            node = node.child(component.clone());
        }
        node
    }

    /// Subscribe to state changes at this node and every descendant.
    ///
    /// There is no unsubscribe path; the subscription lives as long as
    /// this subtree does.
    pub fn on_state_changed(&self, callback: OnStateChanged) -> SubscriptionId {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.lock().push((id, callback));
        id
    }

    /// Install the deserialization handler raw bytes are routed through
    pub fn set_deserialize_handler(&self, handler: Arc<dyn DeserializeHandler>) {
        *self.inner.handler.lock() = Some(handler);
    }

    pub fn deserialize_handler(&self) -> Option<Arc<dyn DeserializeHandler>> {
        self.inner.handler.lock().clone()
    }

    /// Raw bytes arrive at this node from the fetch layer.
    ///
    /// With a handler installed the bytes are routed through it and the
    /// object is attached whenever its completion callback fires; without
    /// one the bytes *are* the object.
    pub fn install_data(&self, raw: Bytes) {
        self.set_state(NodeState::DataReceived);
        let handler = self.inner.handler.lock().clone();
        match handler {
            Some(handler) => {
                self.set_state(NodeState::Decrypting);
                let node = self.clone();
                let attempted = handler.can_deserialize(
                    self,
                    raw,
                    Box::new(move |object| {
                        node.attach_object(object);
                        Ok(())
                    }),
                );
                if !attempted {
                    tracing::warn!(node = %self.name(), "deserialize handler refused content");
                }
            }
            None => self.attach_object(raw),
        }
    }

    /// Attach a derived object to a node that has no backing
    /// network-delivered record (e.g. a reassembled segment stream)
    pub fn attach_synthesized(&self, object: Bytes) {
        self.attach_object(object);
    }

    fn attach_object(&self, object: Bytes) {
        *self.inner.payload.lock() = Some(object);
        self.set_state(NodeState::ObjectReady);
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        *self.inner.state.lock() = state;
        self.notify(state);
    }

    /// Deliver a state change for this node to subscriptions registered
    /// here and on every ancestor. Callbacks are collected first and
    /// invoked with no locks held.
    fn notify(&self, state: NodeState) {
        let mut callbacks = Vec::new();
        let mut cursor = Some(self.clone());
        while let Some(node) = cursor {
            {
                let subscriptions = node.inner.subscriptions.lock();
                for (id, callback) in subscriptions.iter() {
                    callbacks.push((node.clone(), *id, callback.clone()));
                }
            }
            cursor = node.parent();
        }
        for (subscriber, id, callback) in callbacks {
            callback(&subscriber, self, state, id);
        }
    }
}
