use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::namespace::Namespace;

/// Completion callback for a reassembled object, invoked at most once ever
pub type OnSegmentedObject = Box<dyn FnOnce(&SegmentedObjectHandler, Bytes) + Send>;

/**
 * Segment reassembly
 * ==================
 * Consumes the fetch layer's per-segment events for one logical object
 *  and produces the single contiguous byte object, exactly once.
 * Arrival order is trusted: segments are concatenated in the order their
 *  events are observed, and the terminal event must come strictly last.
 *  Nothing here re-sorts by an embedded sequence number; ordering is the
 *  fetch layer's contract.
 */
pub struct SegmentedObjectHandler {
    namespace: Namespace,
    state: Mutex<Reassembly>,
}

/// Collecting -> Finished, absorbing
struct Reassembly {
    segments: Vec<Bytes>,
    total_size: usize,
    finished: bool,
    on_segmented_object: Option<OnSegmentedObject>,
}

impl SegmentedObjectHandler {
    /// Reassemble one object into `namespace`, optionally notifying
    /// `on_segmented_object` when it completes
    pub fn new(namespace: &Namespace, on_segmented_object: Option<OnSegmentedObject>) -> Arc<Self> {
        Arc::new(SegmentedObjectHandler {
            namespace: namespace.clone(),
            state: Mutex::new(Reassembly {
                segments: Vec::new(),
                total_size: 0,
                finished: false,
                on_segmented_object,
            }),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Number of segments buffered so far (zero again after finishing)
    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// Running total of buffered bytes
    pub fn total_size(&self) -> usize {
        self.state.lock().total_size
    }

    /// Observe one segment event.
    ///
    /// `Some(node)` is one more in-order segment: its payload is buffered.
    /// `None` is the terminal sentinel, to be observed exactly once after
    /// all segments: the buffered chunks are concatenated into one object,
    /// attached to this handler's namespace node, and handed to the
    /// completion callback synchronously. Any event after the terminal one
    /// is a logged no-op.
    pub fn on_segment(&self, segment: Option<&Namespace>) {
        let (object, callback) = {
            let mut state = self.state.lock();
            if state.finished {
                // we already finished and delivered; not expected
                tracing::debug!(node = %self.namespace.name(), "segment event after finish, ignoring");
                return;
            }

            match segment {
                Some(node) => {
                    let Some(payload) = node.payload() else {
                        tracing::warn!(node = %node.name(), "segment node has no payload, skipping");
                        return;
                    };
                    state.total_size += payload.len();
                    state.segments.push(payload);
                    return;
                }
                None => {
                    let mut object = BytesMut::with_capacity(state.total_size);
                    for segment in state.segments.drain(..) {
                        object.extend_from_slice(&segment);
                        // each chunk is dropped as soon as it is copied
                    }
                    state.finished = true;
                    (object.freeze(), state.on_segmented_object.take())
                }
            }
            // lock released before the object leaves this component
        };

        self.namespace.attach_synthesized(object.clone());
        if let Some(callback) = callback {
            callback(self, object);
        }
    }
}
