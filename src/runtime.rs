//! Component runtime — runs the service's long-lived tasks side by side.
//!
//! A [`Component`] owns everything it needs (shared `Arc<Tutor>`, bind
//! address, …) and is handed to [`spawn_components`] together with the
//! service shutdown token. The returned [`ServiceHandle`] resolves once
//! every component has exited.
//!
//! If one component fails or panics the shared token is cancelled, so its
//! siblings wind down too, and the first error is reported.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit of the service.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its run loop. The loop should end
    /// once `shutdown` is cancelled.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

/// Handle to the task supervising all spawned components.
pub struct ServiceHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl ServiceHandle {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Comms(format!("component supervisor panicked: {e}"))),
        }
    }
}

/// Spawn each component on its own task.
pub fn spawn_components(components: Vec<Box<dyn Component>>, shutdown: CancellationToken) -> ServiceHandle {
    let inner = tokio::spawn(async move {
        let mut set: JoinSet<(String, Result<(), AppError>)> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            let fut = component.run(shutdown.clone());
            debug!(component = %id, "spawning component");
            set.spawn(async move { (id, fut.await) });
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| AppError::Comms(format!("component panicked: {e}")));
                }
                Ok((id, Err(e))) => {
                    error!(component = %id, "component failed: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok((id, Ok(()))) => info!(component = %id, "component stopped"),
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    ServiceHandle { inner }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WaitForShutdown;

    impl Component for WaitForShutdown {
        fn id(&self) -> &str {
            "waiter"
        }

        fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async move {
                shutdown.cancelled().await;
                Ok(())
            })
        }
    }

    struct FailImmediately;

    impl Component for FailImmediately {
        fn id(&self) -> &str {
            "failer"
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async { Err(AppError::Comms("bind failed".into())) })
        }
    }

    #[tokio::test]
    async fn cancellation_stops_components() {
        let token = CancellationToken::new();
        let handle = spawn_components(vec![Box::new(WaitForShutdown)], token.clone());
        token.cancel();
        assert!(handle.join().await.is_ok());
    }

    #[tokio::test]
    async fn failure_cancels_siblings_and_is_reported() {
        let token = CancellationToken::new();
        let handle = spawn_components(vec![Box::new(WaitForShutdown), Box::new(FailImmediately)], token.clone());
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("bind failed"));
        assert!(token.is_cancelled());
    }
}
