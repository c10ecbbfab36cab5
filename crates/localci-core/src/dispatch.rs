//! How revision tests are scheduled relative to each other.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Scheduling mode for revision tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// One test at a time across every repository sharing the policy.
    #[default]
    Serialized,
    /// Each test runs as its own task.
    Concurrent,
}

impl DispatchMode {
    pub fn from_parallel(parallel: bool) -> Self {
        if parallel {
            Self::Concurrent
        } else {
            Self::Serialized
        }
    }
}

/// A dispatch mode plus the lock serialized tests share.
///
/// Clones share the same lock, so handing one policy to every monitor
/// serializes tests process-wide.
#[derive(Debug, Clone, Default)]
pub struct DispatchPolicy {
    mode: DispatchMode,
    lock: Arc<Mutex<()>>,
}

impl DispatchPolicy {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn serialized() -> Self {
        Self::new(DispatchMode::Serialized)
    }

    pub fn concurrent() -> Self {
        Self::new(DispatchMode::Concurrent)
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Serialized policy sharing this policy's lock.
    pub fn pinned(&self) -> Self {
        Self {
            mode: DispatchMode::Serialized,
            lock: self.lock.clone(),
        }
    }

    /// Run `test` according to the mode.
    ///
    /// Serialized: waits for the lock, runs `test` to completion and returns
    /// `None`. Concurrent: spawns `test` and returns its handle immediately.
    pub async fn dispatch<F>(&self, test: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.mode {
            DispatchMode::Serialized => {
                let _guard = self.lock.lock().await;
                test.await;
                None
            }
            DispatchMode::Concurrent => Some(tokio::spawn(test)),
        }
    }
}
