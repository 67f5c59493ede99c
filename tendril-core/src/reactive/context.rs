//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This is what makes dependency tracking automatic: when a tracked value is
//! read, the tracker asks the context who is running and registers that
//! computation as a subscriber.
//!
//! # Implementation
//!
//! Each [`ReactiveGraph`](super::ReactiveGraph) owns one stack. Entering a
//! computation pushes it; dropping the returned guard pops it. Computations
//! nest (a derived value evaluated while a render is running), and the guard
//! keeps the stack balanced even if the getter panics.
//!
//! An untracked entry (`None`) hides everything below it, so reads made
//! inside [`ReactiveGraph::untracked`](super::ReactiveGraph::untracked) are
//! attributed to nobody.

use std::cell::RefCell;
use std::rc::Rc;

use super::computation::Computation;
use super::subscriber::SubscriberId;

/// The active-computation stack of one graph.
#[derive(Default)]
pub struct ReactiveContext {
    stack: RefCell<Vec<Option<Rc<Computation>>>>,
}

/// Guard that pops the context when dropped.
pub struct ContextGuard<'a> {
    context: &'a ReactiveContext,
    expected: Option<SubscriberId>,
}

impl ReactiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `computation` the running computation until the guard drops.
    pub fn enter(&self, computation: Rc<Computation>) -> ContextGuard<'_> {
        let expected = Some(computation.id());
        self.stack.borrow_mut().push(Some(computation));
        ContextGuard {
            context: self,
            expected,
        }
    }

    /// Suspend tracking until the guard drops.
    pub fn enter_untracked(&self) -> ContextGuard<'_> {
        self.stack.borrow_mut().push(None);
        ContextGuard {
            context: self,
            expected: None,
        }
    }

    /// The computation reads are currently attributed to.
    pub fn current(&self) -> Option<Rc<Computation>> {
        self.stack.borrow().last().cloned().flatten()
    }

    pub fn current_id(&self) -> Option<SubscriberId> {
        self.stack
            .borrow()
            .last()
            .and_then(|entry| entry.as_ref().map(|c| c.id()))
    }

    /// Whether reads are currently being attributed to a computation.
    pub fn is_active(&self) -> bool {
        self.current_id().is_some()
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = self.context.stack.borrow_mut().pop();

        // Catch mismatched enter/exit pairs.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.as_ref().map(|c| c.id()),
                self.expected,
                "ReactiveContext mismatch: expected {:?}",
                self.expected
            );
        }
    }
}
