//! Route child events to the parent that controls them.

use std::sync::Arc;

use kube::Resource;
use sluice_core::{controller_ref, DispatchError, ErrorSink, Ingress, OwnerKind};
use tracing::trace;

use crate::Lister;

/// Hand the controlling parent of a child (or of a tombstoned child) to `enqueue`.
///
/// Children without a controller, children controlled by another kind, and
/// children whose parent is not in the lister are skipped without an error:
/// the cache delivers every change to every controller, so these are the
/// common case. A parent that vanished is cleaned up by its own delete event,
/// so lookup failures are not retried either.
///
/// Only undecodable input is reported to `errors`.
pub fn enqueue_parent_object<K, P, L, F>(
    obj: &Ingress<K>,
    expected: OwnerKind,
    lister: &L,
    errors: &ErrorSink,
    mut enqueue: F,
) where
    K: Resource,
    L: Lister<P> + ?Sized,
    F: FnMut(Arc<P>),
{
    let child = match obj {
        Ingress::Object(o) => o,
        Ingress::Tombstone(t) => match &t.obj {
            Some(o) => {
                trace!(key = %t.key, "recovered deleted object from tombstone");
                o
            }
            None => {
                errors.report(DispatchError::InvalidTombstone);
                return;
            }
        },
        Ingress::Foreign(what) => {
            trace!(received = %what, "not a domain object");
            errors.report(DispatchError::InvalidObject);
            return;
        }
    };

    let Some(owner) = controller_ref(child) else { return };
    if !expected.matches(owner) {
        return;
    }

    let namespace = child.meta().namespace.as_deref();
    match lister.get(namespace, &owner.name) {
        Ok(parent) => enqueue(parent),
        Err(e) => trace!(kind = %expected, owner = %owner.name, error = %e, "ignoring child of missing owner"),
    }
}
