//! Gestionnaire des watches inotify
//!
//! Un thread unique possède la source d'événements et la table des
//! watches. Les demandes de surveillance arrivent par une file de
//! commandes ; le réveil de la source fait revenir la lecture bloquante
//! sans événement pour que la file soit drainée.

use super::handler;
use super::source::FsWatchSource;
use super::types::{FsEvent, WatchId, ROOT_WD, UNKNOWN_PARENT_WD};
use super::watch::{DirectoryWatch, Watch, WatchAutoscan, WatchMove};
use crate::config_ext::ImportMode;
use crate::content::ContentManager;
use crate::setting::ScanSettings;
use crossbeam_channel::{Receiver, Sender};
use pmocds::autoscan::AutoscanDirectory;
use pmocds::tweak::DirectoryTweakList;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

pub(super) type Table = HashMap<WatchId, DirectoryWatch>;

enum MonitorCmd {
    Monitor(Arc<AutoscanDirectory>),
    Unmonitor(Arc<AutoscanDirectory>),
}

/// Options de fonctionnement du watcher, figées au démarrage.
#[derive(Debug, Clone)]
pub(crate) struct InotifyOptions {
    pub default_hidden: bool,
    pub default_follow_symlinks: bool,
    pub tweaks: DirectoryTweakList,
    pub import_mode: ImportMode,
    pub config_file: PathBuf,
}

/// Etat d'un watch, pour l'introspection et les tests.
#[derive(Debug, Clone)]
pub struct WatchSnapshot {
    pub wd: WatchId,
    pub path: PathBuf,
    pub start_point: Option<PathBuf>,
    pub non_existing: Vec<PathBuf>,
    pub move_watches: usize,
    pub descendants: Vec<WatchId>,
}

/// Façade du watcher inotify.
pub struct AutoscanInotify {
    cmd_tx: Sender<MonitorCmd>,
    waker: Arc<dyn Fn() + Send + Sync>,
    table: Arc<Mutex<Table>>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AutoscanInotify {
    pub(crate) fn start(
        content: Weak<ContentManager>,
        source: Box<dyn FsWatchSource>,
        options: InotifyOptions,
    ) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let table: Arc<Mutex<Table>> = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let waker = source.waker();

        let mut worker = Worker {
            content,
            source,
            table: Arc::clone(&table),
            cmd_rx,
            shutdown: Arc::clone(&shutdown),
            options,
        };
        let handle = std::thread::Builder::new()
            .name("pmo-inotify".to_string())
            .spawn(move || worker.run())
            .expect("failed to start inotify thread");

        Arc::new(Self {
            cmd_tx,
            waker,
            table,
            shutdown,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Demande la surveillance d'un autoscan.
    pub fn monitor(&self, adir: Arc<AutoscanDirectory>) {
        debug!(location = %adir.location().display(), "Requested to monitor");
        let _ = self.cmd_tx.send(MonitorCmd::Monitor(adir));
        (self.waker)();
    }

    /// Demande l'arrêt de la surveillance d'un autoscan.
    pub fn unmonitor(&self, adir: Arc<AutoscanDirectory>) {
        debug!(location = %adir.location().display(), "Requested to unmonitor");
        let _ = self.cmd_tx.send(MonitorCmd::Unmonitor(adir));
        (self.waker)();
    }

    /// Arrête le thread du watcher et attend sa fin.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        (self.waker)();
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Instantané de la table des watches.
    pub fn snapshot(&self) -> Vec<WatchSnapshot> {
        let table = self.table.lock().unwrap();
        table
            .values()
            .map(|dw| WatchSnapshot {
                wd: dw.wd(),
                path: dw.path().to_path_buf(),
                start_point: dw.start_point().map(|w| w.location.clone()),
                non_existing: dw
                    .watches()
                    .iter()
                    .filter_map(Watch::as_autoscan)
                    .filter_map(|w| w.non_existing_path.clone())
                    .collect(),
                move_watches: dw
                    .watches()
                    .iter()
                    .filter(|w| matches!(w, Watch::Move(_)))
                    .count(),
                descendants: dw
                    .watches()
                    .iter()
                    .filter_map(Watch::as_autoscan)
                    .flat_map(|w| w.descendants.iter().copied())
                    .collect(),
            })
            .collect()
    }
}

pub(super) struct Worker {
    pub(super) content: Weak<ContentManager>,
    pub(super) source: Box<dyn FsWatchSource>,
    pub(super) table: Arc<Mutex<Table>>,
    cmd_rx: Receiver<MonitorCmd>,
    shutdown: Arc<AtomicBool>,
    pub(super) options: InotifyOptions,
}

impl Worker {
    fn run(&mut self) {
        debug!("Inotify thread started");
        while !self.shutdown.load(Ordering::SeqCst) {
            while let Ok(cmd) = self.cmd_rx.try_recv() {
                match cmd {
                    MonitorCmd::Monitor(adir) => self.handle_monitor(adir),
                    MonitorCmd::Unmonitor(adir) => self.handle_unmonitor(adir),
                }
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let events = match self.source.next_events() {
                Ok(events) => events,
                Err(e) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    error!("Failed to read watch events: {e}");
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    continue;
                }
            };
            for event in events {
                self.handle_event(event);
            }
        }
        debug!("Inotify thread exiting");
    }

    pub(super) fn content(&self) -> Option<Arc<ContentManager>> {
        self.content.upgrade()
    }

    fn handle_monitor(&mut self, adir: Arc<AutoscanDirectory>) {
        let location = adir.location().to_path_buf();
        if location.as_os_str().is_empty() {
            debug!("Empty autoscan location");
            return;
        }
        if location.is_dir() {
            if adir.recursive() {
                debug!(location = %location.display(), "Adding recursive watch");
                self.monitor_unmonitor_recursive(&location, false, &adir, true);
            } else {
                debug!(location = %location.display(), "Adding non-recursive watch");
                self.monitor_directory(&location, &adir, true, None);
            }
            if let Some(content) = self.content() {
                content.rescan_directory(
                    adir.object_id(),
                    adir.scan_id(),
                    adir.scan_mode(),
                    Some(location),
                    false,
                );
            }
        } else if adir.persistent() {
            // path does not exist yet, watch the nearest existing ancestor
            self.monitor_nonexisting(&location, &adir);
        } else {
            error!(location = %location.display(), "Failed to read autoscan directory");
        }
    }

    fn handle_unmonitor(&mut self, adir: Arc<AutoscanDirectory>) {
        let location = adir.location().to_path_buf();
        if location.as_os_str().is_empty() {
            return;
        }
        if adir.recursive() {
            debug!(location = %location.display(), "Removing recursive watch");
            self.monitor_unmonitor_recursive(&location, true, &adir, true);
        } else {
            debug!(location = %location.display(), "Removing non-recursive watch");
            self.unmonitor_directory(&location, &adir);
        }
    }

    fn handle_event(&mut self, event: FsEvent) {
        let known = self.table.lock().unwrap().contains_key(&event.wd);
        if !known {
            // watch removed behind our back, drop the kernel side too
            if !event.mask.is_ignored() {
                self.source.unsubscribe(event.wd);
            }
            return;
        }
        handler::process(self, event);
    }

    /// Réglages effectifs pour un chemin, avec les réglages par
    /// répertoire appliqués.
    pub(super) fn settings_for(
        &self,
        adir: Option<Arc<AutoscanDirectory>>,
        path: &Path,
    ) -> ScanSettings {
        let mut settings = ScanSettings::from_autoscan(
            adir,
            self.options.default_hidden,
            self.options.default_follow_symlinks,
        );
        settings.merge_tweaks(&self.options.tweaks, path);
        settings
    }

    /// L'entrée doit-elle être ignorée (cachée ou fichier de config) ?
    pub(super) fn is_ignored_entry(&self, path: &Path, settings: &ScanSettings) -> bool {
        if path == self.options.config_file {
            return true;
        }
        if settings.hidden {
            return false;
        }
        path.file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false)
    }

    /// Pose (ou retire) les watches sous un répertoire, récursivement.
    pub(super) fn monitor_unmonitor_recursive(
        &mut self,
        start_path: &Path,
        unmonitor: bool,
        adir: &Arc<AutoscanDirectory>,
        is_start_point: bool,
    ) -> WatchId {
        debug!(path = %start_path.display(), unmonitor, "monitor_unmonitor_recursive");

        let result = if unmonitor {
            self.unmonitor_directory(start_path, adir);
            ROOT_WD
        } else {
            let wd = self.monitor_directory(start_path, adir, is_start_point, None);
            if wd <= ROOT_WD {
                return ROOT_WD;
            }
            wd
        };

        let entries = match std::fs::read_dir(start_path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %start_path.display(), "Could not open directory: {e}");
                return result;
            }
        };
        for entry in entries {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let settings = self.settings_for(Some(Arc::clone(adir)), &path);
            if self.is_ignored_entry(&path, &settings) {
                debug!(path = %path.display(), "Hidden entry skipped");
                continue;
            }
            if !settings.follow_symlinks && path.is_symlink() {
                continue;
            }
            if path.is_dir() && settings.recursive {
                self.monitor_unmonitor_recursive(&path, unmonitor, adir, false);
            }
        }
        result
    }

    /// Pose un watch sur un répertoire pour un autoscan.
    ///
    /// Quand le chemin n'existe pas et que l'autoscan est un point de
    /// départ persistant, un watch de chemin manquant est armé sur le
    /// plus proche ancêtre existant.
    pub(super) fn monitor_directory(
        &mut self,
        path: &Path,
        adir: &Arc<AutoscanDirectory>,
        is_start_point: bool,
        non_existing: Option<&Path>,
    ) -> WatchId {
        let wd = match self.source.subscribe(path, adir.retry_count()) {
            Ok(wd) => wd,
            Err(e) => {
                debug!(path = %path.display(), "add watch failed: {e}");
                if is_start_point && adir.persistent() {
                    self.monitor_nonexisting(path, adir);
                }
                return ROOT_WD;
            }
        };
        debug!(path = %path.display(), wd, "monitor_directory");

        let parent_wd = if is_start_point {
            self.watch_path_for_moves(path, wd, adir.retry_count())
        } else {
            UNKNOWN_PARENT_WD
        };

        let start_wd = if !is_start_point && non_existing.is_none() {
            self.source
                .subscribe(adir.location(), adir.retry_count())
                .ok()
        } else {
            None
        };

        let mut table = self.table.lock().unwrap();
        let entry = table
            .entry(wd)
            .or_insert_with(|| DirectoryWatch::new(path, wd, parent_wd));
        if parent_wd > ROOT_WD && entry.parent_wd() <= ROOT_WD {
            entry.set_parent_wd(parent_wd);
        }

        let already_watching = non_existing.is_none()
            && entry
                .watches()
                .iter()
                .filter_map(Watch::as_autoscan)
                .any(|w| w.non_existing_path.is_none() && w.location == adir.location());
        if already_watching {
            return wd;
        }

        let mut watch = WatchAutoscan::new(adir, is_start_point);
        if let Some(nep) = non_existing {
            watch.non_existing_path = Some(nep.to_path_buf());
        }
        entry.add_watch(Watch::Autoscan(watch));

        // track the new wd as a descendant of its start point
        if let Some(start_wd) = start_wd {
            if start_wd != wd {
                if let Some(start_entry) = table.get_mut(&start_wd) {
                    let target = start_entry
                        .watches_mut()
                        .iter_mut()
                        .filter_map(Watch::as_autoscan_mut)
                        .find(|w| {
                            w.non_existing_path.is_none() && w.location == adir.location()
                        });
                    if let Some(target) = target {
                        target.descendants.push(wd);
                    }
                }
            }
        }
        wd
    }

    fn unmonitor_directory(&mut self, path: &Path, adir: &Arc<AutoscanDirectory>) {
        // subscribing again is the cheapest way to learn the wd of a path
        let wd = match self.source.subscribe(path, adir.retry_count()) {
            Ok(wd) => wd,
            Err(_) => {
                debug!(path = %path.display(), "unmonitor: not currently watched");
                return;
            }
        };
        let mut remove_whole_wd = false;
        {
            let mut table = self.table.lock().unwrap();
            let Some(entry) = table.get_mut(&wd) else {
                error!(wd, path = %path.display(), "wd not found in watch table");
                return;
            };
            let index = entry.watches().iter().position(|w| {
                w.as_autoscan()
                    .map(|a| a.non_existing_path.is_none() && a.location == adir.location())
                    .unwrap_or(false)
            });
            match index {
                Some(index) => {
                    if entry.watches().len() == 1 {
                        // the IGNORED event will clean up the table row
                        remove_whole_wd = true;
                    } else {
                        entry.watches_mut().remove(index);
                    }
                }
                None => {
                    debug!(wd, path = %path.display(), "autoscan not found in watches");
                }
            }
        }
        if remove_whole_wd {
            self.source.unsubscribe(wd);
        }
    }

    /// Pose un watch de déplacement sur chaque ancêtre du point de
    /// départ. Retourne le wd du parent immédiat.
    fn watch_path_for_moves(&mut self, path: &Path, wd: WatchId, retries: u32) -> WatchId {
        let mut parent_wd = ROOT_WD;
        let Some(parent) = path.parent() else {
            return parent_wd;
        };
        let mut watch_path = PathBuf::new();
        for component in parent.components() {
            watch_path.push(component);
            if watch_path.as_os_str() == "/" {
                continue;
            }
            debug!(path = %watch_path.display(), "adding move watch");
            parent_wd = self.add_move_watch(&watch_path, wd, parent_wd, retries);
        }
        parent_wd
    }

    fn add_move_watch(
        &mut self,
        path: &Path,
        remove_wd: WatchId,
        parent_wd: WatchId,
        retries: u32,
    ) -> WatchId {
        let wd = match self.source.subscribe(path, retries) {
            Ok(wd) => wd,
            Err(e) => {
                debug!(path = %path.display(), "move watch failed: {e}");
                return ROOT_WD;
            }
        };
        let mut table = self.table.lock().unwrap();
        let entry = table
            .entry(wd)
            .or_insert_with(|| DirectoryWatch::new(path, wd, parent_wd));
        if parent_wd > ROOT_WD && entry.parent_wd() <= ROOT_WD {
            entry.set_parent_wd(parent_wd);
        }
        let duplicate = entry.watches().iter().any(|w| match w {
            Watch::Move(m) => m.remove_wd == remove_wd,
            Watch::Autoscan(_) => false,
        });
        if !duplicate {
            entry.add_watch(Watch::Move(WatchMove { remove_wd }));
        }
        wd
    }

    /// Arme un watch de chemin manquant pour `path`.
    pub(super) fn monitor_nonexisting(&mut self, path: &Path, adir: &Arc<AutoscanDirectory>) {
        self.recheck_nonexisting_monitor(ROOT_WD, path, adir);
    }

    /// Vérifie si un chemin manquant est apparu ; sinon (ré)arme le
    /// watch sur le plus proche ancêtre existant.
    pub(super) fn recheck_nonexisting_monitor(
        &mut self,
        cur_wd: WatchId,
        non_existing_path: &Path,
        adir: &Arc<AutoscanDirectory>,
    ) {
        let mut first = true;
        let mut path = non_existing_path.to_path_buf();
        loop {
            let exists = path.is_dir();
            debug!(path = %path.display(), exists, "recheck_nonexisting_monitor");
            if exists {
                if cur_wd > ROOT_WD {
                    self.remove_nonexisting_monitor(cur_wd, non_existing_path);
                }
                if first {
                    // the missing path appeared: promote to a real start point
                    self.monitor_directory(&path, adir, true, None);
                    if let Some(content) = self.content() {
                        content.handle_persistent_autoscan_recreate(adir);
                        content.rescan_directory(
                            adir.object_id(),
                            adir.scan_id(),
                            adir.scan_mode(),
                            Some(path.clone()),
                            false,
                        );
                    }
                } else {
                    self.monitor_directory(&path, adir, false, Some(non_existing_path));
                }
                break;
            }
            first = false;
            match path.parent() {
                Some(parent) if parent != path => path = parent.to_path_buf(),
                _ => break,
            }
        }
    }

    /// Réarme tous les watches de chemins manquants portés par `wd`.
    pub(super) fn recheck_nonexisting_monitors(&mut self, wd: WatchId) {
        let pending: Vec<(PathBuf, Arc<AutoscanDirectory>)> = {
            let table = self.table.lock().unwrap();
            let Some(entry) = table.get(&wd) else {
                return;
            };
            entry
                .watches()
                .iter()
                .filter_map(Watch::as_autoscan)
                .filter_map(|w| {
                    let nep = w.non_existing_path.clone()?;
                    let adir = w.autoscan()?;
                    Some((nep, adir))
                })
                .collect()
        };
        for (nep, adir) in pending {
            self.recheck_nonexisting_monitor(wd, &nep, &adir);
        }
    }

    fn remove_nonexisting_monitor(&mut self, wd: WatchId, non_existing_path: &Path) {
        let mut remove_whole_wd = false;
        {
            let mut table = self.table.lock().unwrap();
            let Some(entry) = table.get_mut(&wd) else {
                return;
            };
            let index = entry.watches().iter().position(|w| {
                w.as_autoscan()
                    .map(|a| a.non_existing_path.as_deref() == Some(non_existing_path))
                    .unwrap_or(false)
            });
            if let Some(index) = index {
                if entry.watches().len() == 1 {
                    remove_whole_wd = true;
                } else {
                    entry.watches_mut().remove(index);
                }
            }
        }
        if remove_whole_wd {
            // removing the watch raises IGNORED, which erases the row
            self.source.unsubscribe(wd);
        }
    }

    /// Traite les watches de déplacement du répertoire renommé.
    pub(super) fn check_move_watches(&mut self, wd: WatchId) {
        let move_wds: Vec<WatchId> = {
            let mut table = self.table.lock().unwrap();
            let Some(entry) = table.get_mut(&wd) else {
                return;
            };
            let moves: Vec<WatchId> = entry
                .watches()
                .iter()
                .filter_map(|w| match w {
                    Watch::Move(m) => Some(m.remove_wd),
                    Watch::Autoscan(_) => None,
                })
                .collect();
            entry
                .watches_mut()
                .retain(|w| !matches!(w, Watch::Move(_)));
            moves
        };

        for remove_wd in move_wds {
            self.recheck_nonexisting_monitors(remove_wd);

            let target = {
                let table = self.table.lock().unwrap();
                table.get(&remove_wd).map(|dw| {
                    (
                        dw.path().to_path_buf(),
                        dw.start_point().and_then(|w| w.autoscan()),
                    )
                })
            };
            let Some((path, start_adir)) = target else {
                continue;
            };
            debug!(remove_wd, path = %path.display(), "tearing down moved watch");
            self.source.unsubscribe(remove_wd);

            if let Some(content) = self.content() {
                if let Some(adir) = start_adir {
                    if adir.persistent() {
                        self.monitor_nonexisting(&path, &adir);
                        content.handle_persistent_autoscan_remove(&adir);
                    } else {
                        content.remove_autoscan_record(&adir);
                    }
                    content.remove_indexed_path(&adir, &path);
                }
            }
        }

        // a pure move-watch row is no longer useful once processed
        let now_empty = {
            let table = self.table.lock().unwrap();
            table.get(&wd).map(|dw| dw.watches().is_empty()).unwrap_or(false)
        };
        if now_empty {
            self.source.unsubscribe(wd);
        }
    }

    /// Retire les watches de déplacement pointant sur `wd` chez ses
    /// ancêtres.
    pub(super) fn remove_watch_moves(&mut self, wd: WatchId) {
        let mut check_wd = wd;
        let mut first = true;
        loop {
            let mut unsubscribe = None;
            let parent = {
                let mut table = self.table.lock().unwrap();
                let Some(entry) = table.get_mut(&check_wd) else {
                    break;
                };
                if entry.watches().is_empty() && !first {
                    break;
                }
                if !first {
                    let before = entry.watches().len();
                    entry.watches_mut().retain(|w| match w {
                        Watch::Move(m) => m.remove_wd != wd,
                        Watch::Autoscan(_) => true,
                    });
                    if before != entry.watches().len() && entry.watches().is_empty() {
                        unsubscribe = Some(check_wd);
                    }
                }
                entry.parent_wd()
            };
            if let Some(empty_wd) = unsubscribe {
                self.source.unsubscribe(empty_wd);
            }
            first = false;
            if parent <= ROOT_WD {
                break;
            }
            check_wd = parent;
        }
    }

    /// Démonte les watches descendants de `wd` et oublie sa ligne.
    pub(super) fn remove_descendants(&mut self, wd: WatchId) {
        let descendants: Vec<WatchId> = {
            let mut table = self.table.lock().unwrap();
            let Some(entry) = table.remove(&wd) else {
                return;
            };
            entry
                .watches()
                .iter()
                .filter_map(Watch::as_autoscan)
                .flat_map(|w| w.descendants.iter().copied())
                .collect()
        };
        for desc in descendants {
            self.source.unsubscribe(desc);
        }
    }
}
