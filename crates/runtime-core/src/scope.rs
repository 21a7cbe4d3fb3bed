//! Thread-local scope stacks with RAII enter/exit
//!
//! Builders attach work to whatever group, node or job is currently
//! entered. Each kind of scope is a per-thread stack; entering pushes and
//! dropping the returned guard pops. Guards are `!Send` so a scope cannot
//! be exited from a different thread than the one that entered it.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::thread::LocalKey;

use crate::{NodeId, DEFAULT_NODE};

/// Per-thread stack of entered scopes
pub type ScopeStack<T> = RefCell<Vec<T>>;

/// Pops its scope when dropped
#[must_use = "the scope is exited as soon as the guard is dropped"]
pub struct ScopeGuard<T: 'static> {
    stack: &'static LocalKey<ScopeStack<T>>,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

/// Enter `item` on `stack`
pub fn enter<T: 'static>(stack: &'static LocalKey<ScopeStack<T>>, item: T) -> ScopeGuard<T> {
    let depth = stack.with(|s| {
        let mut s = s.borrow_mut();
        s.push(item);
        s.len()
    });
    ScopeGuard {
        stack,
        depth,
        _not_send: PhantomData,
    }
}

/// Innermost entered scope, if any
pub fn current<T: Clone + 'static>(stack: &'static LocalKey<ScopeStack<T>>) -> Option<T> {
    stack.with(|s| s.borrow().last().cloned())
}

impl<T: 'static> Drop for ScopeGuard<T> {
    fn drop(&mut self) {
        let _ = self.stack.try_with(|s| {
            let mut s = s.borrow_mut();
            debug_assert_eq!(s.len(), self.depth, "scopes exited out of order");
            s.truncate(self.depth.saturating_sub(1));
        });
    }
}

thread_local! {
    static NODES: ScopeStack<NodeId> = const { RefCell::new(Vec::new()) };
}

/// Tag tasks created while the guard lives as belonging to `node`
pub fn node_scope(node: impl Into<NodeId>) -> ScopeGuard<NodeId> {
    enter(&NODES, node.into())
}

/// Node of the innermost node scope, or [`DEFAULT_NODE`]
pub fn current_node() -> NodeId {
    current(&NODES).unwrap_or_else(|| DEFAULT_NODE.to_string())
}
