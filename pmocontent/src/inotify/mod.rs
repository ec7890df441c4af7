//! Surveillance inotify d'une arborescence
//!
//! Le watcher traduit les événements bruts du noyau en actions
//! sémantiques sur le Content Directory : ajout, suppression,
//! renommage, déplacement, récupération des chemins manquants. La table
//! des watches associe chaque descripteur noyau à son répertoire et à
//! ses abonnements (autoscan ou suivi de déplacement).

mod handler;
mod manager;
mod source;
mod types;
mod watch;

pub use manager::{AutoscanInotify, WatchSnapshot};
pub(crate) use manager::InotifyOptions;
pub use source::{FakeWatchHandle, FakeWatchSource, FsWatchSource};
#[cfg(target_os = "linux")]
pub use source::InotifySource;
pub use types::{FsEvent, FsEventMask, WatchId, ROOT_WD, UNKNOWN_PARENT_WD};
pub use watch::{DirectoryWatch, Watch, WatchAutoscan, WatchMove};

/// Options du watcher dérivées de l'état du gestionnaire de contenu.
pub(crate) fn manager_options(content: &crate::content::ContentManager) -> InotifyOptions {
    InotifyOptions {
        default_hidden: content.default_hidden,
        default_follow_symlinks: content.default_follow_symlinks,
        tweaks: content.tweaks.clone(),
        import_mode: content.import_mode,
        config_file: content.config_file.clone(),
    }
}
