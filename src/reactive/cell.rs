use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Interrupt, Observable, Observer, ObserverList, Supersession};

type ComputeFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, Interrupt<E>>> + Send>>;
type ComputeFn<T, E> = dyn Fn(Supersession) -> ComputeFuture<T, E> + Send + Sync;

/// A value recomputed asynchronously whenever one of its dependencies changes.
///
/// The compute function is called synchronously when a recomputation starts,
/// which is where it should snapshot the upstream values it needs. It returns
/// a future that runs on the Tokio runtime the cell was created in.
///
/// Reading never blocks: [`get`](Self::get) returns the last applied value
/// (or re-raises the last applied error) even while a newer computation is in
/// flight. Use [`is_computing`](Self::is_computing) to tell the two apart, or
/// [`settled`](Self::settled) to wait for the in-flight call.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use avatar_composer::reactive::{Interrupt, ReactiveCell, Source};
///
/// let name = Source::new("hat".to_string());
/// let upstream = name.clone();
/// let shout: ReactiveCell<String, String> =
///     ReactiveCell::new("shout", String::new(), &[&name], move |_supersession| {
///         let name = upstream.get();
///         async move { Ok::<_, Interrupt<String>>(name.to_uppercase()) }
///     });
///
/// assert_eq!(shout.settled().await, Ok("HAT".to_string()));
///
/// name.set("cap".to_string());
/// assert_eq!(shout.settled().await, Ok("CAP".to_string()));
/// # }
/// ```
pub struct ReactiveCell<T, E> {
    inner: Arc<CellInner<T, E>>,
}

struct CellInner<T, E> {
    this: Weak<CellInner<T, E>>,
    name: String,
    state: Mutex<CellState<T, E>>,
    compute: Box<ComputeFn<T, E>>,
    observers: ObserverList,
    /// Generation of the most recently finished current call.
    settled: watch::Sender<u64>,
    runtime: Handle,
}

struct CellState<T, E> {
    value: Result<T, E>,
    /// Generation of the most recently started call.
    generation: u64,
    /// Token of the in-flight current call, if any.
    token: Option<CancellationToken>,
}

impl<T, E> Clone for ReactiveCell<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> ReactiveCell<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Display + Send + 'static,
{
    /// Creates a cell, subscribes it to `dependencies`, and starts the first
    /// computation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        initial: T,
        dependencies: &[&dyn Observable],
        compute: F,
    ) -> Self
    where
        F: Fn(Supersession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Interrupt<E>>> + Send + 'static,
    {
        let inner = Arc::new_cyclic(|this| CellInner {
            this: this.clone(),
            name: name.into(),
            state: Mutex::new(CellState {
                value: Ok(initial),
                generation: 0,
                token: None,
            }),
            compute: Box::new(move |supersession| -> ComputeFuture<T, E> {
                Box::pin(compute(supersession))
            }),
            observers: ObserverList::default(),
            settled: watch::channel(0).0,
            runtime: Handle::current(),
        });

        for dependency in dependencies {
            let observer: Weak<dyn Observer> = inner.this.clone();
            dependency.subscribe(observer);
        }
        inner.restart();

        Self { inner }
    }

    /// The last applied value, or the last applied error.
    pub fn get(&self) -> Result<T, E> {
        self.inner.state.lock().value.clone()
    }

    /// True while the most recently started call has not finished.
    pub fn is_computing(&self) -> bool {
        self.inner.is_computing()
    }

    /// Number of computations started so far.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Waits until no computation is in flight, then reads the cell.
    pub async fn settled(&self) -> Result<T, E> {
        let mut settled = self.inner.settled.subscribe();
        let inner = &self.inner;
        // The sender lives as long as `inner`, so this cannot fail.
        let _ = settled.wait_for(|_| !inner.is_computing()).await;
        self.get()
    }

    /// Supersedes any in-flight call and starts a new one.
    pub fn recompute(&self) {
        self.inner.restart();
    }
}

impl<T, E> Observable for ReactiveCell<T, E> {
    fn subscribe(&self, observer: Weak<dyn Observer>) {
        self.inner.observers.push(observer);
    }
}

impl<T, E> fmt::Debug for ReactiveCell<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ReactiveCell")
            .field("name", &self.inner.name)
            .field("generation", &state.generation)
            .field("computing", &state.token.is_some())
            .finish()
    }
}

impl<T, E> CellInner<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Display + Send + 'static,
{
    fn is_computing(&self) -> bool {
        self.state.lock().token.is_some()
    }

    fn restart(&self) {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            if let Some(previous) = state.token.replace(token.clone()) {
                previous.cancel();
            }
            state.generation += 1;
            state.generation
        };
        log::trace!("cell '{}' starting generation {}", self.name, generation);

        let future = (self.compute)(Supersession::new(token));
        let this = self.this.clone();
        self.runtime.spawn(async move {
            let result = future.await;
            if let Some(cell) = this.upgrade() {
                cell.finish(generation, result);
            }
        });
    }

    fn finish(&self, generation: u64, result: Result<T, Interrupt<E>>) {
        let applied = {
            let mut state = self.state.lock();
            if state.generation != generation {
                drop(state);
                match result {
                    Ok(_) => log::debug!(
                        "cell '{}' discarded result of superseded generation {}",
                        self.name,
                        generation
                    ),
                    Err(Interrupt::Superseded) => log::debug!(
                        "cell '{}' generation {} stopped after supersession",
                        self.name,
                        generation
                    ),
                    Err(Interrupt::Failed(err)) => log::warn!(
                        "cell '{}' discarded error of superseded generation {}: {}",
                        self.name,
                        generation,
                        err
                    ),
                }
                return;
            }

            match result {
                Ok(value) => {
                    state.value = Ok(value);
                    true
                }
                Err(Interrupt::Failed(err)) => {
                    state.value = Err(err);
                    true
                }
                // Nothing newer started; keep the previous value.
                Err(Interrupt::Superseded) => false,
            }
        };

        // Dependents restart while this call still counts as computing.
        if applied {
            log::trace!("cell '{}' applied generation {}", self.name, generation);
            self.observers.notify_all();
        }

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.token = None;
        }
        self.settled.send_replace(generation);
    }
}

impl<T, E> Observer for CellInner<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + fmt::Display + Send + 'static,
{
    fn notify(&self) {
        self.restart();
    }
}

impl<T, E> Drop for CellInner<T, E> {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().token.take() {
            token.cancel();
        }
    }
}
