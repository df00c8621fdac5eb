pub mod builders;
pub mod driver;
pub mod fake_provisioner;

use std::sync::{Arc, Once};

use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt};

use compositor::engine::{CoreRuntime, Orchestrator, Runtime, RuntimeOptions};
use compositor::errors::Result;
use compositor::exec::Provisioner;
use compositor::store::{InMemoryNodeStore, NodeStore};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=compositor=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// A runtime running on a background task, plus its handle.
pub struct TestRuntime {
    pub orchestrator: Orchestrator,
    pub handle: JoinHandle<Result<()>>,
}

impl TestRuntime {
    /// Start a runtime over `store` that keeps running until
    /// [`stop`](Self::stop) is called.
    pub fn start<P: Provisioner + 'static>(store: Arc<dyn NodeStore>, provisioner: P) -> Self {
        Self::start_with(store, provisioner, RuntimeOptions::default())
    }

    /// Start a runtime over a fresh in-memory store.
    pub fn in_memory<P: Provisioner + 'static>(provisioner: P) -> Self {
        Self::start(Arc::new(InMemoryNodeStore::new()), provisioner)
    }

    pub fn start_with<P: Provisioner + 'static>(
        store: Arc<dyn NodeStore>,
        provisioner: P,
        options: RuntimeOptions,
    ) -> Self {
        let (runtime, orchestrator) = Runtime::new(CoreRuntime::new(store), provisioner, options);
        let handle = tokio::spawn(runtime.run());
        Self {
            orchestrator,
            handle,
        }
    }

    /// Request shutdown and wait for the runtime task to finish.
    pub async fn stop(self) {
        let _ = self.orchestrator.shutdown().await;
        with_timeout(self.handle)
            .await
            .expect("runtime task panicked")
            .expect("runtime returned an error");
    }
}
