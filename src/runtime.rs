//! Generic service runtime — shared scaffolding for long-running components.
//!
//! # Component model
//!
//! A [`Component`] is any independently-runnable unit owned by the service:
//! the HTTP surface, the ingestion scheduler, the status-sync worker pool.
//! `main` constructs components with their shared state already captured
//! inside them, then hands them to [`spawn_components`].
//!
//! Any component error cancels the shared [`CancellationToken`] so sibling
//! components and the rest of the process shut down cleanly.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit of the service.
///
/// Implementors capture all shared state (`Arc<XxxState>`, shutdown token, …)
/// at construction time. [`Component::run`] is called once by
/// [`spawn_components`] and should run until `shutdown` is cancelled or the
/// component's own work is done.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its async run-loop as a boxed future.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

/// An opaque handle to a running component task set.
pub struct RuntimeHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl RuntimeHandle {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Ingestion(format!("component task panicked: {e}"))),
        }
    }
}

/// Spawn each [`Component`] as an independent Tokio task and return a
/// [`RuntimeHandle`] that resolves when all components have exited.
///
/// If any component returns `Err`, `shutdown` is cancelled so all siblings
/// receive the cancellation signal and stop cooperatively; the manager task
/// then drains the remaining components and returns the first error.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> RuntimeHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            let shutdown = shutdown.clone();
            debug!(component = %id, "spawning component");
            set.spawn(component.run(shutdown));
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| {
                        AppError::Ingestion(format!("component panicked: {e}"))
                    });
                }
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    RuntimeHandle { inner: handle }
}
