//! FIFO mutual exclusion for asynchronous operations.
//!
//! An [`ExecutionSerializer`] guards a shared resource (such as the raster
//! host) that must not run two operations at once. Operations queue in
//! arrival order and each caller receives its own result.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use avatar_composer::serializer::SerializedSlot;
//!
//! let counter = SerializedSlot::new(0u32);
//! let increment = || counter.update(|value| async move { (value + 1, ()) });
//! tokio::join!(increment(), increment());
//! assert_eq!(counter.get(), 2);
//! # }
//! ```
//!
//! The serializer is not reentrant: calling [`ExecutionSerializer::run`] from
//! inside an operation it is already running never completes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

// ============================================================================
// ExecutionSerializer
// ============================================================================

/// Runs asynchronous operations one at a time, in the order they arrive.
///
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct ExecutionSerializer {
    // Tokio's mutex hands out the lock in FIFO order.
    lock: Arc<Mutex<()>>,
}

impl ExecutionSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for every earlier operation to finish, then runs `op`.
    ///
    /// `op` is only invoked once the serializer is held.
    pub async fn run<F, Fut>(&self, op: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let _held = self.lock.lock().await;
        op().await
    }

    /// True if an operation is currently running.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

// ============================================================================
// Serialized
// ============================================================================

/// An asynchronous function whose calls never overlap.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use avatar_composer::serializer::Serialized;
///
/// let double = Serialized::new(|value: u32| async move { value * 2 });
/// assert_eq!(double.call(21).await, 42);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Serialized<F> {
    serializer: ExecutionSerializer,
    op: F,
}

impl<F> Serialized<F> {
    /// Wraps `op` with a serializer of its own.
    pub fn new(op: F) -> Self {
        Self::with_serializer(ExecutionSerializer::new(), op)
    }

    /// Wraps `op` so it shares `serializer` with other operations.
    pub fn with_serializer(serializer: ExecutionSerializer, op: F) -> Self {
        Self { serializer, op }
    }

    pub fn serializer(&self) -> &ExecutionSerializer {
        &self.serializer
    }

    pub async fn call<A, Fut>(&self, arg: A) -> Fut::Output
    where
        F: Fn(A) -> Fut,
        Fut: Future,
    {
        self.serializer.run(|| (self.op)(arg)).await
    }
}

// ============================================================================
// SerializedSlot
// ============================================================================

/// A shared value updated by asynchronous read-modify-write operations.
///
/// Updates run through an [`ExecutionSerializer`], so an update that awaits
/// between reading and writing can never lose a concurrent one.
#[derive(Debug, Clone)]
pub struct SerializedSlot<T> {
    serializer: ExecutionSerializer,
    value: Arc<parking_lot::Mutex<T>>,
}

impl<T: Clone> SerializedSlot<T> {
    pub fn new(value: T) -> Self {
        Self::with_serializer(ExecutionSerializer::new(), value)
    }

    pub fn with_serializer(serializer: ExecutionSerializer, value: T) -> Self {
        Self {
            serializer,
            value: Arc::new(parking_lot::Mutex::new(value)),
        }
    }

    /// The last committed value.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Runs `f` on the current value and stores the value it returns.
    ///
    /// The second element of `f`'s output is handed back to the caller.
    pub async fn update<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = (T, R)>,
    {
        self.serializer
            .run(|| async {
                let current = self.get();
                let (next, result) = f(current).await;
                *self.value.lock() = next;
                result
            })
            .await
    }

    /// Replaces the value once every earlier update has finished.
    pub async fn replace(&self, value: T) -> T {
        self.update(|previous| async move { (value, previous) }).await
    }
}

// ============================================================================
// Tests
// ============================================================================
