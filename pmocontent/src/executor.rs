//! Registre des processus externes
//!
//! Les processus lancés pour le compte du serveur (transcodeurs,
//! scripts) sont tenus par référence faible : le registre ne prolonge
//! jamais leur vie, mais l'arrêt du serveur tue tout ce qui tourne
//! encore. Un exécuteur qui se termine de lui-même se désenregistre,
//! sauf pendant l'arrêt où le balayage de destruction fait foi.

use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// Un processus externe dont la vie est bornée par celle du serveur.
pub trait Executor: Send + Sync {
    /// Le processus tourne-t-il encore ?
    fn is_alive(&self) -> bool;

    /// Termine le processus sans délai.
    fn kill(&self);
}

/// Registre des exécuteurs actifs.
pub struct ExecutorRegistry {
    executors: Mutex<Vec<Weak<dyn Executor>>>,
    shutting_down: Arc<AtomicBool>,
}

impl ExecutorRegistry {
    pub fn new(shutting_down: Arc<AtomicBool>) -> Self {
        Self {
            executors: Mutex::new(Vec::new()),
            shutting_down,
        }
    }

    pub fn register(&self, executor: &Arc<dyn Executor>) {
        let mut executors = self.executors.lock().unwrap();
        executors.push(Arc::downgrade(executor));
        executors.retain(|w| w.strong_count() > 0);
    }

    /// Retire un exécuteur.
    ///
    /// Pendant l'arrêt, la désinscription est ignorée : le balayage de
    /// destruction parcourt la liste et ne doit pas la voir bouger.
    pub fn unregister(&self, executor: &Arc<dyn Executor>) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let target = Arc::downgrade(executor);
        self.executors
            .lock()
            .unwrap()
            .retain(|w| !Weak::ptr_eq(w, &target));
    }

    pub fn len(&self) -> usize {
        self.executors
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tue tous les exécuteurs encore vivants.
    pub fn kill_all(&self) {
        let executors = std::mem::take(&mut *self.executors.lock().unwrap());
        for weak in executors {
            if let Some(executor) = weak.upgrade() {
                if executor.is_alive() {
                    debug!("Killing tracked executor");
                    executor.kill();
                }
            }
        }
    }
}

/// Exécuteur adossé à un processus fils.
pub struct ProcessExecutor {
    child: Mutex<Child>,
}

impl ProcessExecutor {
    pub fn new(child: Child) -> Self {
        Self {
            child: Mutex::new(child),
        }
    }
}

impl Executor for ProcessExecutor {
    fn is_alive(&self) -> bool {
        matches!(self.child.lock().unwrap().try_wait(), Ok(None))
    }

    fn kill(&self) {
        let mut child = self.child.lock().unwrap();
        if let Err(e) = child.kill() {
            warn!("Failed to kill child process: {e}");
        }
        let _ = child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FakeExecutor {
        alive: AtomicBool,
        kills: AtomicU32,
    }

    impl FakeExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(true),
                kills: AtomicU32::new(0),
            })
        }
    }

    impl Executor for FakeExecutor {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn kill(&self) {
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn kill_all_reaches_live_executors() {
        let flag = Arc::new(AtomicBool::new(false));
        let registry = ExecutorRegistry::new(Arc::clone(&flag));
        let exec = FakeExecutor::new();
        registry.register(&(exec.clone() as Arc<dyn Executor>));
        assert_eq!(registry.len(), 1);
        flag.store(true, Ordering::SeqCst);
        registry.kill_all();
        assert_eq!(exec.kills.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_is_ignored_during_shutdown() {
        let flag = Arc::new(AtomicBool::new(false));
        let registry = ExecutorRegistry::new(Arc::clone(&flag));
        let exec = FakeExecutor::new() as Arc<dyn Executor>;
        registry.register(&exec);
        flag.store(true, Ordering::SeqCst);
        registry.unregister(&exec);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropped_executors_do_not_linger() {
        let flag = Arc::new(AtomicBool::new(false));
        let registry = ExecutorRegistry::new(flag);
        {
            let exec = FakeExecutor::new() as Arc<dyn Executor>;
            registry.register(&exec);
        }
        assert!(registry.is_empty());
    }
}
