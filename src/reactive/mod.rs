//! Reactive values with asynchronous recomputation.
//!
//! A [`Source`] is a plain writable value. A [`ReactiveCell`] derives its value
//! from one or more upstream observables by running an asynchronous compute
//! function whenever any of them changes. Cells are observable themselves, so
//! they chain:
//!
//! ```text
//! Source<Vec<AccessoryFragment>> ──┐
//! Source<Option<ViewBox>> ─────────┼──► ReactiveCell<Option<Arc<ComposedDocument>>> ──┐
//! Source<StylePalette> ────────────┘                                                  ├──► ReactiveCell<Option<RasterResult>>
//! Source<Option<RenderRequest>> ──────────────────────────────────────────────────────┘
//! ```
//!
//! # Supersession
//!
//! When an upstream value changes while a compute call is still running, the
//! running call is *superseded*: its [`Supersession`] token is cancelled and
//! a new call starts against fresh upstream values. Cancelling the old token
//! and installing the new one happen in one step under the cell's lock, so
//! there is never more than one live token per cell. A superseded call may
//! stop early by returning [`Interrupt::Superseded`]; if it runs to completion
//! anyway its result is discarded. Only the result of the most recently
//! started call is ever applied.
//!
//! Dependencies are registered explicitly through [`Observable::subscribe`];
//! there is no implicit tracking of which values a compute function reads.

mod cell;
mod source;

pub use cell::ReactiveCell;
pub use source::Source;

use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Observer Traits
// ============================================================================

/// Receives change notifications from an [`Observable`].
pub trait Observer: Send + Sync {
    /// Called synchronously after the observed value changed.
    fn notify(&self);
}

/// A value that announces its changes to registered observers.
pub trait Observable {
    /// Registers an observer. Observers are held weakly and pruned once
    /// dropped.
    fn subscribe(&self, observer: Weak<dyn Observer>);
}

/// Weakly held observers, notified in registration order.
#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Mutex<Vec<Weak<dyn Observer>>>,
}

impl ObserverList {
    pub(crate) fn push(&self, observer: Weak<dyn Observer>) {
        self.observers.lock().push(observer);
    }

    pub(crate) fn notify_all(&self) {
        // Observers may subscribe or read while being notified, so the list
        // is not locked during the callbacks.
        let live: Vec<Arc<dyn Observer>> = {
            let mut observers = self.observers.lock();
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.notify();
        }
    }
}

// ============================================================================
// Interrupt
// ============================================================================

/// Failure outcome of a compute call.
///
/// `Superseded` is kept apart from application errors so that ordinary error
/// handling (`?` on `Result<_, E>`) can never produce or swallow it by
/// accident. Cells discard it silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt<E> {
    /// The call noticed it was superseded and stopped early.
    Superseded,

    /// The call failed; the error becomes the cell's visible state.
    Failed(E),
}

impl<E> From<E> for Interrupt<E> {
    fn from(err: E) -> Self {
        Self::Failed(err)
    }
}

// ============================================================================
// Supersession
// ============================================================================

/// One-shot notifier handed to each compute call.
///
/// It fires exactly once, when a newer call for the same cell starts (or the
/// cell is dropped).
#[derive(Debug, Clone)]
pub struct Supersession {
    token: CancellationToken,
}

impl Supersession {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once a newer call has started.
    pub async fn superseded(&self) {
        self.token.cancelled().await
    }

    /// Returns `Err(Interrupt::Superseded)` if a newer call has started.
    pub fn check<E>(&self) -> Result<(), Interrupt<E>> {
        if self.is_superseded() {
            Err(Interrupt::Superseded)
        } else {
            Ok(())
        }
    }

    /// Runs `fut` until it completes or the call is superseded, whichever
    /// comes first.
    pub async fn guard<F, E>(&self, fut: F) -> Result<F::Output, Interrupt<E>>
    where
        F: Future,
    {
        self.token
            .run_until_cancelled(fut)
            .await
            .ok_or(Interrupt::Superseded)
    }
}

// ============================================================================
// Tests
// ============================================================================
