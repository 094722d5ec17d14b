use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, info};

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Cleanup callbacks run when the process shuts down.
///
/// Hooks are drained when they run, so `run_all` can be called from every
/// shutdown path without running anything twice.
#[derive(Clone, Default)]
pub struct ShutdownHooks {
    hooks: Arc<Mutex<Vec<(String, Hook)>>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(hook = %name, "registered shutdown hook");
        self.hooks.lock().push((name, Box::new(move || Box::pin(hook()))));
    }

    /// Run every pending hook in registration order
    pub async fn run_all(&self) {
        let pending: Vec<(String, Hook)> = std::mem::take(&mut *self.hooks.lock());
        for (name, hook) in pending {
            info!(hook = %name, "running shutdown hook");
            hook().await;
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_hooks_run_once_in_order() {
        let hooks = ShutdownHooks::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let calls = calls.clone();
            hooks.register(name, move || async move {
                calls.lock().push(name);
            });
        }
        assert_eq!(hooks.len(), 2);

        hooks.run_all().await;
        hooks.run_all().await;

        assert_eq!(*calls.lock(), vec!["first", "second"]);
        assert!(hooks.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_hooks() {
        let hooks = ShutdownHooks::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        hooks.clone().register("count", move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        hooks.run_all().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
