//! Error Types
//!
//! Everything that can go wrong inside the reactive core is a
//! [`ReactiveError`]. Errors fall into two groups:
//!
//! - Evaluation failures: a computation's getter or callback returned an
//!   error. Where these end up is decided by the computation's
//!   [`ErrorPolicy`](crate::reactive::ErrorPolicy).
//! - Misuse warnings: reshaping a root state container, adding a property to
//!   a primitive, and similar. These are logged through the graph's warn
//!   handler and also returned to the caller; they never abort anything.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::reactive::SubscriberId;

/// Boxed error returned by user-supplied getters and callbacks.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Handler invoked for errors routed away from the caller.
pub type ErrorHandler = Rc<dyn Fn(&ReactiveError, &ErrorContext)>;

/// Handler invoked for non-fatal warnings.
pub type WarnHandler = Rc<dyn Fn(&ReactiveError)>;

/// Which part of a computation was running when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The getter (the unit of work).
    Getter,
    /// The change callback invoked after a re-run.
    Callback,
    /// The callback invoked once at watch registration (`immediate`).
    ImmediateCallback,
    /// The scheduler's loop guard.
    Scheduler,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Getter => "getter",
            Phase::Callback => "callback",
            Phase::ImmediateCallback => "immediate callback",
            Phase::Scheduler => "scheduler",
        };
        f.write_str(label)
    }
}

/// Where a routed error came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Name of the owning unit of state, if the computation has one.
    pub owner: Option<String>,
    /// Phase label, e.g. `getter for computation "user.name"`.
    pub info: String,
    /// The failing computation.
    pub computation: Option<SubscriberId>,
}

/// Errors produced by the reactive core.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A getter or callback failed.
    #[error("{phase} for computation \"{expression}\" failed: {source}")]
    Evaluation {
        phase: Phase,
        expression: String,
        #[source]
        source: BoxError,
    },

    /// A computation kept re-queueing itself within one flush.
    #[error(
        "you may have an infinite update loop in computation \"{expression}\" ({id}): \
         re-queued more than {limit} times in one flush"
    )]
    InfiniteUpdateLoop {
        id: SubscriberId,
        expression: String,
        limit: usize,
    },

    /// `add_property`/`remove_property` on something that is not a structure.
    #[error("cannot {action} reactive property on undefined, null, or primitive value")]
    InvalidTarget { action: &'static str },

    /// A sequence was addressed with a key that is not an index.
    #[error("cannot {action} property \"{key}\" on a sequence; use an index")]
    InvalidKey { action: &'static str, key: String },

    /// `add_property`/`remove_property` on a root state container.
    #[error(
        "avoid {action} reactive properties on a root state container at runtime; \
         declare them upfront"
    )]
    RootReshape { action: &'static str },

    /// Plain assignment of a new key on a root state container.
    #[error(
        "property \"{key}\" was assigned on a root state container without add_property \
         and will not be reactive"
    )]
    ImplicitRootAssignment { key: String },

    /// A watch path contained something other than a dot-delimited path.
    #[error("failed watching path \"{0}\": only simple dot-delimited paths are supported")]
    InvalidPath(String),

    /// Scope state must be a keyed structure.
    #[error("state for \"{scope}\" must be an object")]
    NotAnObject { scope: String },

    /// The graph or computation was dropped while still referenced.
    #[error("computation is no longer attached to a reactive graph")]
    Detached,

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Wrap a user error with the phase and expression it came from.
    pub fn evaluation(phase: Phase, expression: impl Into<String>, source: BoxError) -> Self {
        Self::Evaluation {
            phase,
            expression: expression.into(),
            source,
        }
    }

    /// Whether this error is a misuse warning rather than a failure.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::InvalidTarget { .. }
                | Self::InvalidKey { .. }
                | Self::RootReshape { .. }
                | Self::ImplicitRootAssignment { .. }
        )
    }
}
