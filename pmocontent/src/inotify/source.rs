//! Source d'événements du watcher
//!
//! Le gestionnaire ne parle jamais directement au noyau : il consomme
//! une [`FsWatchSource`], bloquante, réveillable sans événement. La
//! source réelle ([`InotifySource`]) s'appuie sur inotify ; la source
//! simulée ([`FakeWatchSource`]) permet de scénariser les événements
//! dans les tests.

use super::types::{FsEvent, FsEventMask, WatchId};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

/// Abstraction du mécanisme noyau de surveillance.
///
/// Toutes les méthodes sont appelées depuis le thread du gestionnaire ;
/// seul le réveil retourné par [`FsWatchSource::waker`] est utilisable
/// depuis d'autres threads.
pub trait FsWatchSource: Send {
    /// Pose un watch sur `path`. Les échecs transitoires sont retentés
    /// `retries` fois avec une courte pause.
    ///
    /// Poser deux fois un watch sur le même chemin retourne le même
    /// descripteur.
    fn subscribe(&mut self, path: &Path, retries: u32) -> io::Result<WatchId>;

    /// Retire un watch. Le retrait produit un événement `IGNORED`.
    fn unsubscribe(&mut self, wd: WatchId);

    /// Bloque jusqu'au prochain lot d'événements. Un réveil explicite
    /// fait revenir l'appel avec un lot vide.
    fn next_events(&mut self) -> io::Result<Vec<FsEvent>>;

    /// Fabrique un réveil utilisable depuis n'importe quel thread.
    fn waker(&self) -> Arc<dyn Fn() + Send + Sync>;
}

// ---------------------------------------------------------------------------
// Source inotify réelle
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
const SUBSCRIBE_RETRY_PAUSE: std::time::Duration = std::time::Duration::from_millis(100);

/// Source adossée à inotify.
///
/// Le réveil est réalisé par un répertoire de contrôle privé : écrire un
/// fichier dedans produit un événement réel qui débloque la lecture,
/// événement qui n'est jamais remonté au gestionnaire.
#[cfg(target_os = "linux")]
pub struct InotifySource {
    inotify: inotify::Inotify,
    mask: inotify::WatchMask,
    control_dir: PathBuf,
    control_wd: inotify::WatchDescriptor,
    next_id: WatchId,
    id_by_desc: HashMap<inotify::WatchDescriptor, WatchId>,
    desc_by_id: HashMap<WatchId, inotify::WatchDescriptor>,
    buffer: [u8; 4096],
}

#[cfg(target_os = "linux")]
impl InotifySource {
    pub fn new(watch_attrib: bool) -> io::Result<Self> {
        use inotify::WatchMask;

        let mut inotify = inotify::Inotify::init()?;
        let mut mask = WatchMask::CLOSE_WRITE
            | WatchMask::CREATE
            | WatchMask::MOVED_FROM
            | WatchMask::MOVED_TO
            | WatchMask::DELETE
            | WatchMask::DELETE_SELF
            | WatchMask::MOVE_SELF;
        if watch_attrib {
            mask |= WatchMask::ATTRIB;
        }

        let control_dir =
            std::env::temp_dir().join(format!("pmolibrary-watch-{}", std::process::id()));
        std::fs::create_dir_all(&control_dir)?;
        let control_wd = inotify.add_watch(&control_dir, WatchMask::CLOSE_WRITE)?;

        Ok(Self {
            inotify,
            mask,
            control_dir,
            control_wd,
            next_id: 1,
            id_by_desc: HashMap::new(),
            desc_by_id: HashMap::new(),
            buffer: [0; 4096],
        })
    }
}

#[cfg(target_os = "linux")]
impl FsWatchSource for InotifySource {
    fn subscribe(&mut self, path: &Path, retries: u32) -> io::Result<WatchId> {
        use tracing::debug;
        let mut attempt = 0;
        loop {
            match self.inotify.add_watch(path, self.mask) {
                Ok(desc) => {
                    if let Some(id) = self.id_by_desc.get(&desc) {
                        return Ok(*id);
                    }
                    let id = self.next_id;
                    self.next_id += 1;
                    self.id_by_desc.insert(desc.clone(), id);
                    self.desc_by_id.insert(id, desc);
                    return Ok(id);
                }
                Err(e) if attempt < retries => {
                    debug!(path = %path.display(), attempt, "add_watch failed, retrying: {e}");
                    attempt += 1;
                    std::thread::sleep(SUBSCRIBE_RETRY_PAUSE);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn unsubscribe(&mut self, wd: WatchId) {
        if let Some(desc) = self.desc_by_id.get(&wd).cloned() {
            // the kernel answers with IGNORED, which drops the mapping
            let _ = self.inotify.rm_watch(desc);
        }
    }

    fn next_events(&mut self) -> io::Result<Vec<FsEvent>> {
        let events = self.inotify.read_events_blocking(&mut self.buffer)?;
        let mut out = Vec::new();
        for event in events {
            if event.wd == self.control_wd {
                continue; // wake-up only
            }
            let Some(&id) = self.id_by_desc.get(&event.wd) else {
                continue;
            };
            let mask = FsEventMask(event.mask.bits());
            if mask.is_ignored() {
                self.id_by_desc.remove(&event.wd);
                self.desc_by_id.remove(&id);
            }
            out.push(FsEvent {
                wd: id,
                mask,
                name: event.name.map(|n| n.to_os_string()),
            });
        }
        Ok(out)
    }

    fn waker(&self) -> Arc<dyn Fn() + Send + Sync> {
        let control = self.control_dir.join(".wake");
        Arc::new(move || {
            let _ = std::fs::write(&control, b"w");
        })
    }
}

#[cfg(target_os = "linux")]
impl Drop for InotifySource {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.control_dir);
    }
}

// ---------------------------------------------------------------------------
// Source simulée
// ---------------------------------------------------------------------------

enum FakeMsg {
    Event(FsEvent),
    Wake,
}

#[derive(Default)]
struct FakeInner {
    next_wd: WatchId,
    by_path: HashMap<PathBuf, WatchId>,
    by_wd: HashMap<WatchId, PathBuf>,
    pending: VecDeque<FakeMsg>,
}

struct FakeShared {
    inner: Mutex<FakeInner>,
    cond: Condvar,
}

/// Source simulée : les tests poussent les événements à la main.
///
/// Les chemins surveillés doivent exister sur disque (les tests
/// travaillent dans des répertoires temporaires réels), ce qui permet de
/// vérifier la gestion des chemins manquants.
pub struct FakeWatchSource {
    shared: Arc<FakeShared>,
}

/// Poignée de pilotage d'une [`FakeWatchSource`].
#[derive(Clone)]
pub struct FakeWatchHandle {
    shared: Arc<FakeShared>,
}

impl FakeWatchSource {
    pub fn new() -> (Self, FakeWatchHandle) {
        let shared = Arc::new(FakeShared {
            inner: Mutex::new(FakeInner {
                next_wd: 1,
                ..Default::default()
            }),
            cond: Condvar::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            FakeWatchHandle { shared },
        )
    }
}

impl FsWatchSource for FakeWatchSource {
    fn subscribe(&mut self, path: &Path, _retries: u32) -> io::Result<WatchId> {
        if !path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory: {}", path.display()),
            ));
        }
        let mut inner = self.shared.inner.lock().unwrap();
        if let Some(wd) = inner.by_path.get(path) {
            return Ok(*wd);
        }
        let wd = inner.next_wd;
        inner.next_wd += 1;
        inner.by_path.insert(path.to_path_buf(), wd);
        inner.by_wd.insert(wd, path.to_path_buf());
        Ok(wd)
    }

    fn unsubscribe(&mut self, wd: WatchId) {
        let mut inner = self.shared.inner.lock().unwrap();
        if let Some(path) = inner.by_wd.remove(&wd) {
            inner.by_path.remove(&path);
            inner.pending.push_back(FakeMsg::Event(FsEvent {
                wd,
                mask: FsEventMask::IGNORED,
                name: None,
            }));
            self.shared.cond.notify_all();
        }
    }

    fn next_events(&mut self) -> io::Result<Vec<FsEvent>> {
        let mut inner = self.shared.inner.lock().unwrap();
        while inner.pending.is_empty() {
            inner = self.shared.cond.wait(inner).unwrap();
        }
        let mut out = Vec::new();
        while let Some(msg) = inner.pending.pop_front() {
            match msg {
                FakeMsg::Event(event) => out.push(event),
                FakeMsg::Wake => {}
            }
        }
        Ok(out)
    }

    fn waker(&self) -> Arc<dyn Fn() + Send + Sync> {
        let shared = Arc::clone(&self.shared);
        Arc::new(move || {
            shared.inner.lock().unwrap().pending.push_back(FakeMsg::Wake);
            shared.cond.notify_all();
        })
    }
}

impl FakeWatchHandle {
    /// Le descripteur attribué à un chemin surveillé.
    pub fn wd_for(&self, path: &Path) -> Option<WatchId> {
        self.shared.inner.lock().unwrap().by_path.get(path).copied()
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.wd_for(path).is_some()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.shared
            .inner
            .lock()
            .unwrap()
            .by_path
            .keys()
            .cloned()
            .collect()
    }

    /// Injecte un événement pour un chemin surveillé.
    pub fn emit(&self, dir: &Path, mask: FsEventMask, name: Option<&str>) {
        let mut inner = self.shared.inner.lock().unwrap();
        let Some(&wd) = inner.by_path.get(dir) else {
            panic!("emit on unwatched path {}", dir.display());
        };
        inner.pending.push_back(FakeMsg::Event(FsEvent {
            wd,
            mask,
            name: name.map(Into::into),
        }));
        self.shared.cond.notify_all();
    }

    /// Injecte un événement par descripteur (pour les wd déjà retirés).
    pub fn emit_wd(&self, wd: WatchId, mask: FsEventMask, name: Option<&str>) {
        let mut inner = self.shared.inner.lock().unwrap();
        inner.pending.push_back(FakeMsg::Event(FsEvent {
            wd,
            mask,
            name: name.map(Into::into),
        }));
        self.shared.cond.notify_all();
    }
}
