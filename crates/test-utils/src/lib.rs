pub mod builders;
pub mod fake_executor;

use std::sync::Once;

use pipedag::fs::mock::MockFileSystem;
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{ConfigFileBuilder, TaskConfigBuilder};
pub use fake_executor::FakeExecutor;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
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
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// A mock project tree with these files, written in the given order (so
/// later files are newer).
pub fn mock_project(files: &[&str]) -> MockFileSystem {
    let fs = MockFileSystem::new();
    for f in files {
        fs.add_file(f, *f);
    }
    fs
}

/// Orchestrator over a mock tree rooted at `.`, sharing `store` with the caller.
pub fn mock_orchestrator(
    cfg: pipedag::config::ConfigFile,
    fs: &MockFileSystem,
    store: &pipedag::state::MemoryStateStore,
) -> pipedag::engine::Orchestrator {
    let fs: std::sync::Arc<dyn pipedag::fs::FileSystem> = std::sync::Arc::new(fs.clone());
    pipedag::engine::Orchestrator::new(".", cfg, fs, Box::new(store.clone()))
        .expect("orchestrator over a valid config")
}

/// Runtime event channel roomy enough for a `FakeExecutor`, which reports
/// completions from inside the runtime's own task.
pub fn fake_channel() -> (
    tokio::sync::mpsc::Sender<pipedag::engine::RuntimeEvent>,
    tokio::sync::mpsc::Receiver<pipedag::engine::RuntimeEvent>,
) {
    tokio::sync::mpsc::channel(1024)
}
