//! Table des watches
//!
//! Chaque descripteur noyau correspond à un [`DirectoryWatch`] : le
//! chemin surveillé, le watch parent éventuel et la liste des
//! abonnements portés par ce répertoire. Un abonnement est soit un
//! autoscan (éventuellement point de départ, avec ses descendants et
//! son chemin manquant), soit un suivi de déplacement.

use super::types::WatchId;
use pmocds::autoscan::AutoscanDirectory;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Abonnement autoscan porté par un répertoire surveillé.
#[derive(Debug)]
pub struct WatchAutoscan {
    /// Lien faible vers l'enregistrement ; résolu à chaque usage.
    pub adir: Weak<AutoscanDirectory>,
    /// Chemin de l'autoscan, conservé pour les comparaisons quand le
    /// lien est résolu.
    pub location: PathBuf,
    /// Ce watch est-il la racine de l'abonnement ?
    pub is_start_point: bool,
    /// Watches créés par la descente récursive sous le point de départ.
    pub descendants: Vec<WatchId>,
    /// Chemin encore inexistant que ce watch guette, le cas échéant.
    pub non_existing_path: Option<PathBuf>,
}

impl WatchAutoscan {
    pub fn new(adir: &Arc<AutoscanDirectory>, is_start_point: bool) -> Self {
        Self {
            adir: Arc::downgrade(adir),
            location: adir.location().to_path_buf(),
            is_start_point,
            descendants: Vec::new(),
            non_existing_path: None,
        }
    }

    pub fn autoscan(&self) -> Option<Arc<AutoscanDirectory>> {
        self.adir.upgrade()
    }
}

/// Abonnement de suivi de déplacement.
///
/// Posé sur chaque ancêtre d'un point de départ : si l'ancêtre est
/// renommé, le watch `remove_wd` (et ses descendants) doit être démonté
/// car son chemin absolu n'est plus valable.
#[derive(Debug)]
pub struct WatchMove {
    pub remove_wd: WatchId,
}

/// Un abonnement porté par un répertoire surveillé.
#[derive(Debug)]
pub enum Watch {
    Autoscan(WatchAutoscan),
    Move(WatchMove),
}

impl Watch {
    pub fn as_autoscan(&self) -> Option<&WatchAutoscan> {
        match self {
            Watch::Autoscan(w) => Some(w),
            Watch::Move(_) => None,
        }
    }

    pub fn as_autoscan_mut(&mut self) -> Option<&mut WatchAutoscan> {
        match self {
            Watch::Autoscan(w) => Some(w),
            Watch::Move(_) => None,
        }
    }
}

/// Un répertoire surveillé et ses abonnements.
#[derive(Debug)]
pub struct DirectoryWatch {
    path: PathBuf,
    wd: WatchId,
    parent_wd: WatchId,
    watches: Vec<Watch>,
}

impl DirectoryWatch {
    pub fn new(path: impl Into<PathBuf>, wd: WatchId, parent_wd: WatchId) -> Self {
        Self {
            path: path.into(),
            wd,
            parent_wd,
            watches: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn wd(&self) -> WatchId {
        self.wd
    }

    pub fn parent_wd(&self) -> WatchId {
        self.parent_wd
    }

    pub fn set_parent_wd(&mut self, parent_wd: WatchId) {
        self.parent_wd = parent_wd;
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    pub fn watches_mut(&mut self) -> &mut Vec<Watch> {
        &mut self.watches
    }

    pub fn add_watch(&mut self, watch: Watch) {
        self.watches.push(watch);
    }

    /// L'abonnement autoscan dont ce watch est le point de départ.
    pub fn start_point(&self) -> Option<&WatchAutoscan> {
        self.watches
            .iter()
            .filter_map(Watch::as_autoscan)
            .find(|w| w.is_start_point)
    }

    /// L'abonnement autoscan le plus spécifique couvrant `path`.
    ///
    /// Les watches de chemins manquants ne comptent pas : ils ne
    /// couvrent encore rien.
    pub fn appropriate_autoscan(&self, path: &Path) -> Option<&WatchAutoscan> {
        let mut best: Option<&WatchAutoscan> = None;
        for watch in self.watches.iter().filter_map(Watch::as_autoscan) {
            if watch.non_existing_path.is_some() {
                continue;
            }
            if path.starts_with(&watch.location) {
                let better = match best {
                    Some(current) => watch.location.as_os_str().len()
                        > current.location.as_os_str().len(),
                    None => true,
                };
                if better {
                    best = Some(watch);
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmocds::autoscan::ScanMode;

    fn adir(path: &str) -> Arc<AutoscanDirectory> {
        Arc::new(AutoscanDirectory::new(path, ScanMode::INotify))
    }

    #[test]
    fn deepest_autoscan_wins() {
        let outer = adir("/media");
        let inner = adir("/media/music");
        let mut dw = DirectoryWatch::new("/media/music", 3, -2);
        dw.add_watch(Watch::Autoscan(WatchAutoscan::new(&outer, false)));
        dw.add_watch(Watch::Autoscan(WatchAutoscan::new(&inner, true)));

        let found = dw.appropriate_autoscan(Path::new("/media/music/a.mp3")).unwrap();
        assert_eq!(found.location, Path::new("/media/music"));
        assert!(dw.start_point().unwrap().is_start_point);
    }

    #[test]
    fn placeholder_watches_never_match() {
        let a = adir("/media/missing");
        let mut dw = DirectoryWatch::new("/media", 1, -2);
        let mut watch = WatchAutoscan::new(&a, false);
        watch.non_existing_path = Some(PathBuf::from("/media/missing"));
        dw.add_watch(Watch::Autoscan(watch));
        assert!(dw.appropriate_autoscan(Path::new("/media/missing/x")).is_none());
    }
}
