//! Integration tests for the group decryption adapter

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use canopy::access::{DecryptError, EncryptedContent, GroupConsumer, GroupDecryptHandler};
use canopy::crypto::Secret;
use canopy::namespace::{DeserializeHandler, Name, Namespace, NodeState};
use canopy::testkit::{publish_content_key, MemoryCredentialStore, StaticTransport};

struct Env {
    group: Name,
    member: Name,
    content_key: Secret,
    root: Namespace,
    events: flume::Receiver<(Name, NodeState)>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Protected tree with the content key already cached in the store
fn protected_env() -> (Env, Arc<GroupDecryptHandler>) {
    init_tracing();

    let group = Name::parse("/org/docs");
    let member = Name::parse("/org/alice");
    let content_key = Secret::generate();

    let credentials = MemoryCredentialStore::new();
    credentials.insert_content_key(group.clone(), member.clone(), content_key.clone());

    let root = Namespace::root("/org/docs/content");
    let events = state_stream(&root);
    let handler = GroupDecryptHandler::new(
        &root,
        StaticTransport::new(),
        group.clone(),
        member.clone(),
        credentials,
    );

    (
        Env {
            group,
            member,
            content_key,
            root,
            events,
        },
        handler,
    )
}

fn state_stream(node: &Namespace) -> flume::Receiver<(Name, NodeState)> {
    let (tx, rx) = flume::unbounded();
    node.on_state_changed(Arc::new(move |_, changed, state, _| {
        let _ = tx.send((changed.name().clone(), state));
    }));
    rx
}

async fn wait_for(events: &flume::Receiver<(Name, NodeState)>, name: &Name, state: NodeState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (changed, observed) = events.recv_async().await.expect("event stream closed");
            if &changed == name && observed == state {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {name} to reach {state:?}"));
}

#[tokio::test]
async fn test_decrypts_through_inherited_child_handler() {
    let (env, _handler) = protected_env();

    let child = env.root.child("report");
    let sealed = env.content_key.encrypt(b"attack at dawn").unwrap();
    child.install_data(Bytes::from(sealed));

    wait_for(&env.events, child.name(), NodeState::ObjectReady).await;
    assert_eq!(child.payload(), Some(Bytes::from_static(b"attack at dawn")));
}

#[tokio::test]
async fn test_grandchild_inherits_through_the_intermediate_clone() {
    let (env, _handler) = protected_env();

    // the grandchild appears after the child, so only the child's own
    // clone can have installed its handler
    let child = env.root.child("reports");
    let grandchild = child.child("q3");
    assert!(grandchild.deserialize_handler().is_some());

    let sealed = env.content_key.encrypt(b"quarterly numbers").unwrap();
    grandchild.install_data(Bytes::from(sealed));

    wait_for(&env.events, grandchild.name(), NodeState::ObjectReady).await;
    assert_eq!(
        grandchild.payload(),
        Some(Bytes::from_static(b"quarterly numbers"))
    );
}

#[tokio::test]
async fn test_deep_cascade_across_several_generations() {
    let (env, _handler) = protected_env();

    let leaf = env
        .root
        .descendant(&Name::parse("a/b/c/d"));
    assert!(leaf.deserialize_handler().is_some());

    let sealed = env.content_key.encrypt(b"deep").unwrap();
    leaf.install_data(Bytes::from(sealed));

    wait_for(&env.events, leaf.name(), NodeState::ObjectReady).await;
    assert_eq!(leaf.payload(), Some(Bytes::from_static(b"deep")));
}

#[tokio::test]
async fn test_decrypt_failure_marks_the_node_and_attaches_nothing() {
    let (env, _handler) = protected_env();

    let child = env.root.child("garbled");
    child.install_data(Bytes::from_static(b"not a sealed record"));

    wait_for(&env.events, child.name(), NodeState::DecryptionError).await;
    assert_eq!(child.payload(), None);
}

#[tokio::test]
async fn test_can_deserialize_always_returns_true() {
    let (env, handler) = protected_env();

    let node = env.root.child("anything");
    // garbage that will certainly fail to decrypt
    let attempted = handler.can_deserialize(
        &node,
        Bytes::from_static(b"garbage"),
        Box::new(|_| Ok(())),
    );
    assert!(attempted);

    // and the failure surfaces only through the node state
    wait_for(&env.events, node.name(), NodeState::DecryptionError).await;
}

#[test]
fn test_dropping_the_tree_frees_the_protected_subtree() {
    init_tracing();

    // a sentinel owned by a subscription on the tree: it can only be
    // released if the whole subtree, handlers included, is released
    let sentinel = Arc::new(());
    let watch = Arc::downgrade(&sentinel);
    {
        let (env, handler) = protected_env();

        // grow a few generations so inherited clones exist everywhere
        let child = env.root.child("reports");
        let grandchild = child.child("q3");
        assert!(grandchild.deserialize_handler().is_some());

        env.root.on_state_changed(Arc::new(move |_, _, _, _| {
            let _ = &sentinel;
        }));

        drop(handler);
        drop((child, grandchild));
    }
    assert!(watch.upgrade().is_none(), "protected subtree was retained");
}

#[test]
fn test_can_deserialize_without_runtime_takes_the_failure_path() {
    let (env, handler) = protected_env();

    let node = env.root.child("offline");
    let attempted = handler.can_deserialize(
        &node,
        Bytes::from_static(b"sealed"),
        Box::new(|_| Ok(())),
    );

    // no runtime to decrypt on: still no panic, failure via the node state
    assert!(attempted);
    assert_eq!(node.state(), NodeState::DecryptionError);
    assert_eq!(node.payload(), None);
}

#[tokio::test]
async fn test_misbehaving_downstream_callback_is_contained() {
    let (env, handler) = protected_env();

    let node = env.root.child("victim");
    let sealed = env.content_key.encrypt(b"fine plaintext").unwrap();

    let (tx, rx) = flume::bounded(1);
    let attempted = handler.can_deserialize(
        &node,
        Bytes::from(sealed),
        Box::new(move |object| {
            let _ = tx.send(object);
            Err(anyhow::anyhow!("downstream handler blew up"))
        }),
    );
    assert!(attempted);

    // the plaintext reached the callback before it failed
    let object = rx.recv_async().await.unwrap();
    assert_eq!(object, Bytes::from_static(b"fine plaintext"));

    // and the pipeline is still healthy afterwards
    let next = env.root.child("after");
    let sealed = env.content_key.encrypt(b"still working").unwrap();
    next.install_data(Bytes::from(sealed));
    wait_for(&env.events, next.name(), NodeState::ObjectReady).await;
    assert_eq!(next.payload(), Some(Bytes::from_static(b"still working")));
}

#[tokio::test]
async fn test_decrypts_after_fetching_the_wrapped_content_key() {
    let group = Name::parse("/org/docs");
    let member = Name::parse("/org/bob");
    let member_key = Secret::generate();
    let content_key = Secret::generate();

    // the store only knows bob's own key; the content key has to come
    // from the published wrapped record
    let credentials = MemoryCredentialStore::new();
    credentials.insert_member_key(member.clone(), member_key.clone());
    let transport = StaticTransport::new();
    publish_content_key(&transport, &member_key, &group, &member, &content_key);

    let root = Namespace::root("/org/docs/content");
    let events = state_stream(&root);
    let _handler = GroupDecryptHandler::new(&root, transport, group, member, credentials);

    let child = root.child("memo");
    let sealed = content_key.encrypt(b"unwrapped en route").unwrap();
    child.install_data(Bytes::from(sealed));

    wait_for(&events, child.name(), NodeState::ObjectReady).await;
    assert_eq!(
        child.payload(),
        Some(Bytes::from_static(b"unwrapped en route"))
    );
}

#[tokio::test]
async fn test_no_key_anywhere_ends_in_decryption_error() {
    let root = Namespace::root("/org/docs/content");
    let events = state_stream(&root);
    let _handler = GroupDecryptHandler::new(
        &root,
        StaticTransport::new(),
        Name::parse("/org/docs"),
        Name::parse("/org/mallory"),
        MemoryCredentialStore::new(),
    );

    let child = root.child("locked");
    child.install_data(Bytes::from_static(b"sealed for someone else"));

    wait_for(&events, child.name(), NodeState::DecryptionError).await;
    assert_eq!(child.payload(), None);
}

#[tokio::test]
async fn test_all_clones_share_one_consumer_context() {
    let (env, handler) = protected_env();

    let consumer = handler.consumer();
    assert_eq!(consumer.group(), &env.group);
    assert_eq!(consumer.member(), &env.member);

    // decrypting directly through the shared consumer matches what the
    // inherited child handlers produce
    let sealed = env.content_key.encrypt(b"same context").unwrap();
    let direct = consumer
        .decrypt(&EncryptedContent::new(Bytes::from(sealed.clone())))
        .await
        .unwrap();

    let child = env.root.child("via-child");
    child.install_data(Bytes::from(sealed));
    wait_for(&env.events, child.name(), NodeState::ObjectReady).await;

    assert_eq!(child.payload(), Some(direct));
}

#[tokio::test]
async fn test_consumer_error_enumeration_is_closed_over_failures() {
    let credentials = MemoryCredentialStore::new();
    let consumer = GroupConsumer::new(
        StaticTransport::new(),
        credentials.clone(),
        Name::parse("/org/docs"),
        Name::parse("/org/alice"),
    );

    let err = consumer
        .decrypt(&EncryptedContent::new(Bytes::from_static(b"x")))
        .await
        .unwrap_err();
    assert!(matches!(err, DecryptError::NoDecryptKey(_)));

    credentials.insert_content_key(
        Name::parse("/org/docs"),
        Name::parse("/org/alice"),
        Secret::generate(),
    );
    let err = consumer
        .decrypt(&EncryptedContent::new(Bytes::from_static(b"x")))
        .await
        .unwrap_err();
    assert!(matches!(err, DecryptError::DecryptionFailure(_)));
}
