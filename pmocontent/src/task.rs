//! Tâches et files de tâches
//!
//! Tout ce qui mute le Content Directory passe par une [`Task`] déposée
//! dans une [`TaskQueue`]. Une file possède deux niveaux de priorité et
//! un thread serveur unique ; l'invalidation d'une tâche (par
//! identifiant, par identifiant parent ou par préfixe de chemin) la
//! laisse dans la file mais rend son exécution sans effet.

use crate::error::{ContentError, Result};
use pmocds::autoscan::{ScanId, ScanMode};
use pmocds::ObjectId;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

/// Identifiant monotone d'une tâche.
pub type TaskId = u64;

/// Catégorie d'une tâche.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    AddFile,
    RemoveObject,
    LoadAccounting,
    RescanDirectory,
    FetchOnlineContent,
}

/// File propriétaire d'une tâche.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOwner {
    ContentManager,
    TaskProcessor,
}

/// Charge utile d'une tâche.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    AddFile {
        path: PathBuf,
        rootpath: PathBuf,
        recursive: bool,
        hidden: bool,
    },
    RemoveObject {
        object_id: ObjectId,
        all: bool,
    },
    LoadAccounting,
    RescanDirectory {
        object_id: ObjectId,
        scan_id: ScanId,
        scan_mode: ScanMode,
    },
    FetchOnlineContent {
        service_id: String,
        unscheduled: bool,
    },
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::AddFile { .. } => TaskType::AddFile,
            TaskPayload::RemoveObject { .. } => TaskType::RemoveObject,
            TaskPayload::LoadAccounting => TaskType::LoadAccounting,
            TaskPayload::RescanDirectory { .. } => TaskType::RescanDirectory,
            TaskPayload::FetchOnlineContent { .. } => TaskType::FetchOnlineContent,
        }
    }
}

/// Une unité de travail sérialisée.
///
/// Le drapeau de validité est partagé entre tous les clones de la tâche,
/// si bien qu'une invalidation reste visible de la tâche en cours
/// d'exécution.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    parent_id: TaskId,
    owner: TaskOwner,
    description: String,
    cancellable: bool,
    valid: Arc<AtomicBool>,
    payload: TaskPayload,
}

impl Task {
    pub fn new(owner: TaskOwner, payload: TaskPayload) -> Self {
        Self {
            id: 0,
            parent_id: 0,
            owner,
            description: String::new(),
            cancellable: false,
            valid: Arc::new(AtomicBool::new(true)),
            payload,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parent(mut self, parent_id: TaskId) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn parent_id(&self) -> TaskId {
        self.parent_id
    }

    pub fn owner(&self) -> TaskOwner {
        self.owner
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    pub fn is_cancellable(&self) -> bool {
        self.cancellable
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Point de contrôle coopératif des tâches annulables.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancellable && !self.is_valid() {
            return Err(ContentError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    normal: VecDeque<Task>,
    low: VecDeque<Task>,
    current: Option<Task>,
    next_id: TaskId,
    shutdown: bool,
}

/// File de tâches à deux priorités, servie par un thread unique.
#[derive(Debug)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                next_id: 1,
                ..Default::default()
            }),
            cond: Condvar::new(),
        }
    }

    /// Dépose une tâche et réveille le serveur. Retourne l'identifiant
    /// attribué.
    pub fn enqueue(&self, mut task: Task, low_priority: bool) -> TaskId {
        let mut inner = self.inner.lock().unwrap();
        task.id = inner.next_id;
        inner.next_id += 1;
        let id = task.id;
        debug!(
            id,
            low_priority,
            description = task.description(),
            "Enqueuing task"
        );
        if low_priority {
            inner.low.push_back(task);
        } else {
            inner.normal.push_back(task);
        }
        self.cond.notify_one();
        id
    }

    /// Retire la tâche de tête (priorité normale d'abord) en bloquant
    /// tant que la file est vide. Retourne `None` à l'arrêt.
    ///
    /// La tâche retirée devient la tâche courante jusqu'à l'appel de
    /// [`TaskQueue::finish_current`].
    pub fn dequeue_blocking(&self) -> Option<Task> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.shutdown {
                return None;
            }
            if let Some(task) = inner.normal.pop_front().or_else(|| inner.low.pop_front()) {
                inner.current = Some(task.clone());
                return Some(task);
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Oublie la tâche courante une fois son exécution terminée.
    pub fn finish_current(&self) {
        self.inner.lock().unwrap().current = None;
    }

    /// La tâche en cours d'exécution, si le serveur en tient une.
    pub fn current_task(&self) -> Option<Task> {
        self.inner.lock().unwrap().current.clone()
    }

    /// Invalide la tâche courante et toutes les tâches en file dont
    /// l'identifiant ou l'identifiant parent vaut `task_id`. Idempotent.
    pub fn invalidate(&self, task_id: TaskId) {
        let inner = self.inner.lock().unwrap();
        let matches =
            |t: &Task| t.id == task_id || t.parent_id == task_id;
        if let Some(current) = &inner.current {
            if matches(current) {
                current.invalidate();
            }
        }
        for task in inner.normal.iter().chain(inner.low.iter()) {
            if matches(task) {
                task.invalidate();
            }
        }
    }

    /// Invalide toutes les tâches `AddFile` (courante incluse) dont le
    /// chemin est sous `path`.
    pub fn invalidate_add_tasks_under(&self, path: &Path) {
        let inner = self.inner.lock().unwrap();
        let invalidate_if_under = |task: &Task| {
            if let TaskPayload::AddFile { path: task_path, .. } = task.payload() {
                if task_path.starts_with(path) {
                    debug!(task = task.id, path = %task_path.display(), "Invalidating add task");
                    task.invalidate();
                }
            }
        };
        if let Some(current) = &inner.current {
            invalidate_if_under(current);
        }
        for task in inner.normal.iter().chain(inner.low.iter()) {
            invalidate_if_under(task);
        }
    }

    /// Instantané de la file : tâche courante d'abord, puis les tâches
    /// valides en attente, dans l'ordre.
    pub fn task_list(&self) -> Vec<Task> {
        let inner = self.inner.lock().unwrap();
        let mut list = Vec::new();
        if let Some(current) = &inner.current {
            list.push(current.clone());
        }
        for task in inner.normal.iter().chain(inner.low.iter()) {
            if task.is_valid() {
                list.push(task.clone());
            }
        }
        list
    }

    /// Demande l'arrêt du serveur de la file.
    pub fn shutdown(&self) {
        self.inner.lock().unwrap().shutdown = true;
        self.cond.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().unwrap().shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_task(path: &str) -> Task {
        Task::new(
            TaskOwner::ContentManager,
            TaskPayload::AddFile {
                path: PathBuf::from(path),
                rootpath: PathBuf::new(),
                recursive: false,
                hidden: false,
            },
        )
        .with_cancellable(true)
    }

    #[test]
    fn ids_are_monotone_and_distinct() {
        let queue = TaskQueue::new();
        let a = queue.enqueue(add_task("/a"), false);
        let b = queue.enqueue(add_task("/b"), true);
        let c = queue.enqueue(add_task("/c"), false);
        assert!(a > 0 && b > a && c > b);
    }

    #[test]
    fn normal_priority_overtakes_low() {
        let queue = TaskQueue::new();
        queue.enqueue(add_task("/low"), true);
        queue.enqueue(add_task("/normal"), false);
        let first = queue.dequeue_blocking().unwrap();
        assert!(matches!(
            first.payload(),
            TaskPayload::AddFile { path, .. } if path == Path::new("/normal")
        ));
        queue.finish_current();
    }

    #[test]
    fn invalidate_hits_queued_and_current() {
        let queue = TaskQueue::new();
        let id = queue.enqueue(add_task("/a"), false);
        let child = add_task("/a/child").with_parent(id);
        queue.enqueue(child, false);

        let running = queue.dequeue_blocking().unwrap();
        assert!(running.is_valid());
        queue.invalidate(id);
        // the running clone shares the validity flag
        assert!(!running.is_valid());
        queue.finish_current();

        let queued = queue.dequeue_blocking().unwrap();
        assert!(!queued.is_valid(), "child task must follow its parent");
        queue.finish_current();

        // invalidation is idempotent
        queue.invalidate(id);
    }

    #[test]
    fn invalidate_by_path_prefix() {
        let queue = TaskQueue::new();
        queue.enqueue(add_task("/media/eps/big"), true);
        queue.enqueue(add_task("/media/other"), true);
        queue.invalidate_add_tasks_under(Path::new("/media/eps"));
        let list = queue.task_list();
        assert_eq!(list.len(), 1);
        assert!(matches!(
            list[0].payload(),
            TaskPayload::AddFile { path, .. } if path == Path::new("/media/other")
        ));
    }

    #[test]
    fn task_list_has_current_first() {
        let queue = TaskQueue::new();
        queue.enqueue(add_task("/a"), false);
        queue.enqueue(add_task("/b"), false);
        let current = queue.dequeue_blocking().unwrap();
        let list = queue.task_list();
        assert_eq!(list[0].id(), current.id());
        assert_eq!(list.len(), 2);
        queue.finish_current();
    }

    #[test]
    fn shutdown_unblocks_dequeue() {
        let queue = Arc::new(TaskQueue::new());
        let q = Arc::clone(&queue);
        let handle = std::thread::spawn(move || q.dequeue_blocking());
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.shutdown();
        assert!(handle.join().unwrap().is_none());
    }
}
