//! Traduction des événements en actions sémantiques
//!
//! Un événement brut devient, selon son masque et l'état de la table :
//! un démontage de sous-arbre, un réarmement de chemin manquant, une
//! pose récursive de watches, une suppression ou un (ré)import d'objet.

use super::manager::Worker;
use super::types::{FsEvent, ROOT_WD};
use crate::config_ext::ImportMode;
use pmodatabase::FileType;
use tracing::{debug, warn};

/// Applique un événement du watcher à la table et au contenu.
pub(super) fn process(worker: &mut Worker, event: FsEvent) {
    let wd = event.wd;
    let mask = event.mask;

    let (path, adir, start_point) = {
        let table = worker.table.lock().unwrap();
        let Some(entry) = table.get(&wd) else {
            return;
        };
        let mut path = entry.path().to_path_buf();
        // the name is only meaningful while the watched path still exists
        if !mask.is_gone() {
            if let Some(name) = &event.name {
                path.push(name);
            }
        }
        let adir = entry.appropriate_autoscan(&path).and_then(|w| w.autoscan());
        let start_point = entry.start_point().and_then(|w| w.autoscan());
        (path, adir, start_point)
    };
    debug!(wd, %mask, path = %path.display(), "inotify event");

    let mut is_dir = mask.is_dir() || (path.exists() && !path.is_file());

    // renames first: tear down the subtrees whose absolute path broke
    if mask.was_moved() {
        worker.check_move_watches(wd);
    }
    if mask.is_gone() {
        worker.recheck_nonexisting_monitors(wd);
    }

    let settings = worker.settings_for(adir.clone(), &path);

    if is_dir {
        if mask.is_new() {
            // a created entry may be a missing segment someone waits for
            worker.recheck_nonexisting_monitors(wd);
        }
        if settings.recursive && mask.is_created() {
            if let Some(adir) = &adir {
                if worker.is_ignored_entry(&path, &settings) {
                    debug!(path = %path.display(), "new hidden dir ignored");
                } else {
                    debug!(path = %path.display(), "new dir, adding to watch table");
                    worker.monitor_unmonitor_recursive(&path, false, adir, false);
                }
            }
        }
    }

    if let Some(adir) = adir {
        let content = worker.content();
        let mut wd_to_remove = None;

        if !mask.is_new() {
            if mask.is_gone() {
                if !mask.was_moved() {
                    wd_to_remove = Some(wd);
                }
                // the start point itself disappeared
                if let Some(start_adir) = start_point {
                    if start_adir.persistent() {
                        worker.monitor_nonexisting(&path, &start_adir);
                        if let Some(content) = &content {
                            content.handle_persistent_autoscan_remove(&start_adir);
                        }
                    } else {
                        // the subscription dies with its directory
                        wd_to_remove = Some(wd);
                        if let Some(content) = &content {
                            content.remove_autoscan_record(&start_adir);
                        }
                    }
                }
            }

            // an already indexed entry changed or vanished
            if let Some(content) = &content {
                match content.database().find_object_by_path(&path, FileType::Any) {
                    Ok(Some(changed)) => {
                        if changed.is_container() {
                            is_dir = true;
                        }
                        let keep_on_write = mask.is_written()
                            && worker.options.import_mode == ImportMode::Gerbera;
                        if !keep_on_write {
                            debug!(path = %path.display(), id = changed.id, "removing indexed entry");
                            content.remove_object_async(changed.id, false);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(path = %path.display(), "path lookup failed: {e}"),
                }
            }
        }

        if mask.is_new_entry(is_dir || path.is_symlink())
            && !worker.is_ignored_entry(&path, &settings)
        {
            debug!(path = %path.display(), "importing entry");
            if let Some(content) = &content {
                content.add_file_queued(
                    path.clone(),
                    adir.location().to_path_buf(),
                    settings.recursive && is_dir,
                    settings.hidden,
                    false,
                    false,
                );
            }
            if is_dir {
                let dir_wd = worker.monitor_unmonitor_recursive(&path, false, &adir, false);
                if mask.is_moved_to() && dir_wd > ROOT_WD {
                    // rename target: the table row still carries the old path
                    let mut table = worker.table.lock().unwrap();
                    if let Some(entry) = table.get_mut(&dir_wd) {
                        debug!(from = %entry.path().display(), to = %path.display(), "rebinding watch path");
                        entry.set_path(&path);
                    }
                }
            }
        }

        if let Some(wd) = wd_to_remove {
            worker.source.unsubscribe(wd);
        }
    }

    if mask.is_ignored() {
        worker.remove_watch_moves(wd);
        worker.remove_descendants(wd);
    }
}
