//! Serveur de file de tâches
//!
//! Un [`TaskRunner`] attache un thread serveur à une [`TaskQueue`] : il
//! dépile, expose la tâche courante, exécute les tâches encore valides
//! et survit aux erreurs ordinaires. Le gestionnaire de contenu en
//! utilise deux exemplaires, un par propriétaire de file.

use crate::error::ContentError;
use crate::task::{Task, TaskQueue};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Thread serveur d'une [`TaskQueue`].
pub struct TaskRunner {
    queue: Arc<TaskQueue>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(TaskQueue::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Démarre le thread serveur. `run` exécute une tâche ; une erreur
    /// `ShuttingDown` arrête le serveur, les autres sont journalisées et
    /// le service continue.
    pub fn start<F>(&self, name: &str, run: F)
    where
        F: Fn(&Task) -> crate::error::Result<()> + Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(task) = queue.dequeue_blocking() {
                    if task.is_valid() {
                        debug!(id = task.id(), description = task.description(), "Running task");
                        match run(&task) {
                            Ok(()) => {}
                            Err(ContentError::ShuttingDown) => {
                                queue.finish_current();
                                queue.shutdown();
                                break;
                            }
                            Err(e) if e.is_silent() => {
                                debug!(id = task.id(), "Task aborted: {e}");
                            }
                            Err(e) => {
                                error!(id = task.id(), "Task failed: {e}");
                            }
                        }
                    }
                    queue.finish_current();
                }
                debug!("Task runner thread exiting");
            })
            .expect("failed to start task runner thread");
        *self.thread.lock().unwrap() = Some(handle);
    }

    /// Arrête le serveur et attend la fin de la tâche en cours.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskOwner, TaskPayload};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn task(path: &str) -> Task {
        Task::new(
            TaskOwner::ContentManager,
            TaskPayload::AddFile {
                path: PathBuf::from(path),
                rootpath: PathBuf::new(),
                recursive: false,
                hidden: false,
            },
        )
    }

    #[test]
    fn runner_preserves_enqueue_order() {
        let runner = TaskRunner::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_runner = Arc::clone(&seen);
        runner.start("test-runner", move |t| {
            if let TaskPayload::AddFile { path, .. } = t.payload() {
                seen_in_runner.lock().unwrap().push(path.clone());
            }
            Ok(())
        });
        runner.queue().enqueue(task("/1"), false);
        runner.queue().enqueue(task("/2"), false);
        runner.queue().enqueue(task("/3"), false);
        std::thread::sleep(Duration::from_millis(100));
        runner.shutdown();
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![PathBuf::from("/1"), PathBuf::from("/2"), PathBuf::from("/3")]
        );
    }

    #[test]
    fn invalidated_task_body_is_skipped() {
        let runner = TaskRunner::new();
        let executed = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&executed);
        let id = runner.queue().enqueue(task("/skip"), false);
        runner.queue().invalidate(id);
        runner.start("test-runner", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        std::thread::sleep(Duration::from_millis(50));
        runner.shutdown();
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn errors_do_not_kill_the_runner() {
        let runner = TaskRunner::new();
        let executed = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&executed);
        runner.start("test-runner", move |t| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = t;
                return Err(ContentError::other("boom"));
            }
            Ok(())
        });
        runner.queue().enqueue(task("/a"), false);
        runner.queue().enqueue(task("/b"), false);
        std::thread::sleep(Duration::from_millis(100));
        runner.shutdown();
        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }
}
