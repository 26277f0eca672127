//! Per-thread execution context.
//!
//! Each runtime thread carries a thread-scoped context slot naming the
//! runtime it belongs to and, under dedicated placement, the partition
//! it serves. The slot is written exactly once per thread, by the
//! thread-local initializers [`crate::system::SystemResources`]
//! registers as its final construction step, and read without
//! synchronization thereafter. Threads the runtime never initialized
//! have an empty slot; accessors surface that as an error rather than
//! tolerating foreign-thread access.
//!
//! The runtime reference is weak so a thread's context can never keep
//! the runtime it belongs to alive past teardown.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crate::system::SystemResources;

#[derive(Default)]
struct ExecutionContext {
    runtime: Option<Weak<SystemResources>>,
    partition_id: Option<usize>,
}

thread_local! {
    static CONTEXT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::default());
}

/// Binds the current thread to `runtime` and, when given, to one
/// partition. Re-binding to the same runtime is idempotent.
pub(crate) fn bind_current_thread(runtime: Weak<SystemResources>, partition_id: Option<usize>) {
    CONTEXT.with(|context| {
        let mut context = context.borrow_mut();
        context.runtime = Some(runtime);
        if partition_id.is_some() {
            context.partition_id = partition_id;
        }
    });
}

pub(crate) fn current_runtime() -> Option<Arc<SystemResources>> {
    CONTEXT.with(|context| {
        context
            .borrow()
            .runtime
            .as_ref()
            .and_then(Weak::upgrade)
    })
}

pub(crate) fn current_partition_id() -> Option<usize> {
    CONTEXT.with(|context| context.borrow().partition_id)
}
