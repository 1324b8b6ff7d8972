//! Worker-isolated runtime backing.
//!
//! The wrapped provider's handle lives on its own tokio task and is driven
//! through a request channel. Each execution runs on a task of its own, so a
//! request abandoned by a timeout never blocks the next one, and terminate
//! is served as soon as it arrives. Terminating aborts whatever is still in
//! flight. A panic inside the engine is caught, reported as
//! [`SandpitError::Engine`], and ends the worker; later requests fail fast
//! instead of hanging.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use sandpit_shared::errors::{SandpitError, SandpitResult};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{ExecutionResult, RuntimeHandle, RuntimeMode, RuntimeOptions, RuntimeProvider};
use crate::fs::SharedFs;

type Reply<T> = oneshot::Sender<SandpitResult<T>>;

enum Request {
    Execute {
        code: String,
        filename: Option<String>,
        reply: Reply<ExecutionResult>,
    },
    RunFile {
        filename: String,
        reply: Reply<ExecutionResult>,
    },
    Terminate {
        reply: Reply<()>,
    },
}

/// Hosts another provider's runtimes on dedicated worker tasks.
pub struct WorkerProvider {
    inner: Arc<dyn RuntimeProvider>,
}

impl WorkerProvider {
    pub fn new(inner: Arc<dyn RuntimeProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RuntimeProvider for WorkerProvider {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::Worker
    }

    async fn create(
        &self,
        fs: SharedFs,
        options: &RuntimeOptions,
    ) -> SandpitResult<Arc<dyn RuntimeHandle>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let options = options.clone();

        tokio::spawn(async move {
            let handle = match contain(inner.create(fs, &options)).await {
                Ok(Ok(handle)) => {
                    let _ = ready_tx.send(Ok(()));
                    handle
                }
                Ok(Err(e)) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                Err(panic) => {
                    let _ = ready_tx.send(Err(SandpitError::Engine(format!(
                        "runtime panicked during startup: {}",
                        panic
                    ))));
                    return;
                }
            };

            tracing::debug!(container_id = %options.container_id, "Worker started");
            serve(handle, rx).await;
            tracing::debug!(container_id = %options.container_id, "Worker exited");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(Arc::new(WorkerHandle { tx })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SandpitError::Engine(
                "worker exited before reporting readiness".into(),
            )),
        }
    }
}

async fn serve(handle: Arc<dyn RuntimeHandle>, mut rx: mpsc::UnboundedReceiver<Request>) {
    let mut in_flight = JoinSet::new();
    let poisoned = CancellationToken::new();

    loop {
        tokio::select! {
            biased;
            _ = poisoned.cancelled() => return,
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            request = rx.recv() => {
                let Some(request) = request else { return };
                match request {
                    Request::Execute {
                        code,
                        filename,
                        reply,
                    } => {
                        let handle = Arc::clone(&handle);
                        let poisoned = poisoned.clone();
                        in_flight.spawn(async move {
                            let outcome = contain(handle.execute(&code, filename.as_deref())).await;
                            answer(reply, outcome, &poisoned);
                        });
                    }
                    Request::RunFile { filename, reply } => {
                        let handle = Arc::clone(&handle);
                        let poisoned = poisoned.clone();
                        in_flight.spawn(async move {
                            let outcome = contain(handle.run_file(&filename)).await;
                            answer(reply, outcome, &poisoned);
                        });
                    }
                    Request::Terminate { reply } => {
                        if !in_flight.is_empty() {
                            tracing::debug!(abandoned = in_flight.len(), "Aborting in-flight requests");
                            in_flight.abort_all();
                        }
                        answer(reply, contain(handle.terminate()).await, &poisoned);
                        return;
                    }
                }
            }
        }
    }
}

/// Deliver a result. A panic poisons the worker before the caller hears
/// about it, so no request is accepted afterwards.
fn answer<T>(
    reply: Reply<T>,
    outcome: Result<SandpitResult<T>, String>,
    poisoned: &CancellationToken,
) {
    match outcome {
        Ok(result) => {
            let _ = reply.send(result);
        }
        Err(panic) => {
            tracing::error!(panic = %panic, "Runtime panicked, stopping worker");
            poisoned.cancel();
            let _ = reply.send(Err(SandpitError::Engine(format!(
                "runtime panicked: {}",
                panic
            ))));
        }
    }
}

async fn contain<T, F>(fut: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|p| panic_message(p.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct WorkerHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl WorkerHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> SandpitResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| SandpitError::Engine("worker has exited".into()))?;
        reply_rx
            .await
            .map_err(|_| SandpitError::Engine("worker dropped the request".into()))?
    }
}

#[async_trait]
impl RuntimeHandle for WorkerHandle {
    async fn execute(&self, code: &str, filename: Option<&str>) -> SandpitResult<ExecutionResult> {
        self.call(|reply| Request::Execute {
            code: code.to_string(),
            filename: filename.map(str::to_string),
            reply,
        })
        .await
    }

    async fn run_file(&self, filename: &str) -> SandpitResult<ExecutionResult> {
        self.call(|reply| Request::RunFile {
            filename: filename.to_string(),
            reply,
        })
        .await
    }

    async fn terminate(&self) -> SandpitResult<()> {
        if self.tx.is_closed() {
            return Ok(());
        }
        self.call(|reply| Request::Terminate { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoProvider {
        terminated: Arc<AtomicUsize>,
    }

    struct EchoHandle {
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RuntimeHandle for EchoHandle {
        async fn execute(&self, code: &str, _: Option<&str>) -> SandpitResult<ExecutionResult> {
            if code == "panic" {
                panic!("engine blew up");
            }
            if code == "hang" {
                std::future::pending::<()>().await;
            }
            Ok(ExecutionResult::new(serde_json::json!(code)))
        }

        async fn run_file(&self, filename: &str) -> SandpitResult<ExecutionResult> {
            Err(SandpitError::Execution(format!("cannot run {}", filename)))
        }

        async fn terminate(&self) -> SandpitResult<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl RuntimeProvider for EchoProvider {
        fn mode(&self) -> RuntimeMode {
            RuntimeMode::Inline
        }

        async fn create(
            &self,
            _fs: SharedFs,
            _options: &RuntimeOptions,
        ) -> SandpitResult<Arc<dyn RuntimeHandle>> {
            Ok(Arc::new(EchoHandle {
                terminated: Arc::clone(&self.terminated),
            }))
        }
    }

    fn worker() -> (WorkerProvider, Arc<AtomicUsize>) {
        let terminated = Arc::new(AtomicUsize::new(0));
        let provider = WorkerProvider::new(Arc::new(EchoProvider {
            terminated: Arc::clone(&terminated),
        }));
        (provider, terminated)
    }

    #[tokio::test]
    async fn test_worker_forwards_requests() {
        let (provider, terminated) = worker();
        assert_eq!(provider.mode(), RuntimeMode::Worker);

        let handle = provider
            .create(Arc::new(MemFs::new()), &RuntimeOptions::default())
            .await
            .unwrap();

        let result = handle.execute("hello", None).await.unwrap();
        assert_eq!(result.exports, serde_json::json!("hello"));

        let err = handle.run_file("main.js").await.unwrap_err();
        assert!(matches!(err, SandpitError::Execution(_)));

        handle.terminate().await.unwrap();
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_serves_past_abandoned_request() {
        let (provider, terminated) = worker();
        let handle = provider
            .create(Arc::new(MemFs::new()), &RuntimeOptions::default())
            .await
            .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), handle.execute("hang", None)).await;
        assert!(abandoned.is_err());

        // The hung request is still in flight on the worker.
        let result = handle.execute("hello", None).await.unwrap();
        assert_eq!(result.exports, serde_json::json!("hello"));

        handle.terminate().await.unwrap();
        assert_eq!(terminated.load(Ordering::SeqCst), 1);

        let err = handle.execute("hello", None).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_worker_contains_panics() {
        let (provider, _) = worker();
        let handle = provider
            .create(Arc::new(MemFs::new()), &RuntimeOptions::default())
            .await
            .unwrap();

        let err = handle.execute("panic", None).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("engine blew up"));

        // Worker is gone; later calls fail fast and terminate is a no-op.
        let err = handle.execute("hello", None).await.unwrap_err();
        assert!(err.is_fatal());
        handle.terminate().await.unwrap();
    }
}
