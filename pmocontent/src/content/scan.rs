//! Balayage périodique d'un répertoire
//!
//! Le balayage compare le contenu du disque à l'état de la base :
//! fichiers nouveaux ajoutés, fichiers modifiés réimportés (niveau
//! full), fichiers disparus retirés. Les sous-répertoires connus sont
//! replanifiés comme tâches filles, les nouveaux importés récursivement
//! en priorité basse.

use super::ContentManager;
use crate::error::Result;
use crate::task::{Task, TaskOwner, TaskPayload};
use pmocds::autoscan::{AutoscanDirectory, ScanId, ScanLevel, ScanMode};
use pmocds::{ObjectId, INVALID_OBJECT_ID, PC_DIRECTORY_ID};
use pmodatabase::FileType;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

impl ContentManager {
    /// Planifie un balayage du répertoire d'un autoscan.
    pub fn rescan_directory(
        &self,
        object_id: ObjectId,
        scan_id: ScanId,
        scan_mode: ScanMode,
        desc_path: Option<PathBuf>,
        cancellable: bool,
    ) {
        let Some(adir) = self.get_autoscan_directory(scan_id, scan_mode) else {
            return;
        };
        adir.inc_task_count();

        let level = adir.scan_level().as_str();
        let shown = desc_path.unwrap_or_else(|| adir.location().to_path_buf());
        let task = Task::new(
            TaskOwner::ContentManager,
            TaskPayload::RescanDirectory {
                object_id,
                scan_id,
                scan_mode,
            },
        )
        .with_description(format!("Performing {level} scan: {}", shown.display()))
        .with_cancellable(cancellable);
        self.add_task(task, true); // low priority
    }

    /// Corps du balayage (exécuté dans une tâche RescanDirectory).
    pub(crate) fn _rescan_directory(
        &self,
        object_id: ObjectId,
        adir: &Arc<AutoscanDirectory>,
        task: &Task,
    ) -> Result<()> {
        if !adir.is_valid() {
            return Ok(());
        }
        let mut container_id = object_id;
        let mut location = PathBuf::new();

        if container_id != INVALID_OBJECT_ID {
            match self.database().load_object(container_id) {
                Ok(obj) if obj.is_container() => {
                    location = if container_id == PC_DIRECTORY_ID {
                        PathBuf::from("/")
                    } else {
                        PathBuf::from(obj.location)
                    };
                }
                _ => {
                    // bound container vanished from the database
                    if adir.persistent() {
                        container_id = INVALID_OBJECT_ID;
                    } else {
                        self.drop_autoscan(adir);
                        return Ok(());
                    }
                }
            }
        }

        if container_id == INVALID_OBJECT_ID {
            if !adir.location().is_dir() {
                adir.set_object_id(INVALID_OBJECT_ID);
                let _ = self.database().update_autoscan_directory(adir);
                if !adir.persistent() {
                    self.drop_autoscan(adir);
                }
                return Ok(());
            }
            container_id = self.ensure_path_existence(adir.location())?;
            adir.set_object_id(container_id);
            let _ = self.database().update_autoscan_directory(adir);
            location = adir.location().to_path_buf();
        }

        if location.as_os_str().is_empty() {
            error!(container_id, "container has no location information");
            return Ok(());
        }
        debug!(location = %location.display(), "rescanning");

        let entries = match std::fs::read_dir(&location) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(location = %location.display(), "could not open directory: {e}");
                self._remove_object(container_id, false)?;
                adir.set_object_id(INVALID_OBJECT_ID);
                let _ = self.database().update_autoscan_directory(adir);
                if !adir.persistent() {
                    self.drop_autoscan(adir);
                }
                return Ok(());
            }
        };

        // objects currently known below this container
        let mut known = self.database().get_objects(container_id, true)?;
        let mut last_modified_max = adir.previous_lmt();

        let mut names: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        names.sort();

        for path in names {
            if self.is_shutting_down() || !task.is_valid() {
                return Ok(());
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if name.starts_with('.') && !adir.hidden() {
                continue;
            }
            if path == self.config_file {
                continue;
            }
            if !adir.follow_symlinks() && path.is_symlink() {
                continue;
            }

            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    error!(path = %path.display(), "failed to stat: {e}");
                    continue;
                }
            };

            // the record may have been removed while we were scanning
            if !adir.is_valid() {
                return Ok(());
            }

            if metadata.is_file() {
                let mtime = file_mtime(&metadata);
                match self.database().find_object_by_path(&path, FileType::File)? {
                    Some(existing) => {
                        known.remove(&existing.id);
                        match adir.scan_level() {
                            ScanLevel::Full => {
                                if mtime > adir.previous_lmt() {
                                    // re-import to run the layout again
                                    self._remove_object(existing.id, false)?;
                                    if let Err(e) = self._add_file(
                                        &path,
                                        &location,
                                        false,
                                        adir.hidden(),
                                        Some(task),
                                    ) {
                                        warn!(path = %path.display(), "re-import failed: {e}");
                                    }
                                    if mtime > last_modified_max {
                                        last_modified_max = mtime;
                                    }
                                }
                            }
                            ScanLevel::Basic => {}
                        }
                    }
                    None => {
                        if let Err(e) =
                            self._add_file(&path, &location, false, adir.hidden(), Some(task))
                        {
                            if e.is_silent() {
                                return Err(e);
                            }
                            warn!(path = %path.display(), "import failed: {e}");
                        }
                        if mtime > last_modified_max {
                            last_modified_max = mtime;
                        }
                    }
                }
            } else if metadata.is_dir() && adir.recursive() {
                match self
                    .database()
                    .find_object_by_path(&path, FileType::Directory)?
                {
                    Some(existing) => {
                        known.remove(&existing.id);
                        self.rescan_directory(
                            existing.id,
                            adir.scan_id(),
                            adir.scan_mode(),
                            Some(path.clone()),
                            task.is_cancellable(),
                        );
                    }
                    None => {
                        // freshly appeared subtree, import it in the background
                        if adir.is_valid() {
                            self.add_file_subtask(
                                path.clone(),
                                location.clone(),
                                true,
                                adir.hidden(),
                                task.id(),
                                task.is_cancellable(),
                            );
                        }
                    }
                }
            }
        }

        if self.is_shutting_down() || !task.is_valid() {
            return Ok(());
        }

        // whatever is left in the set vanished from disk
        if !known.is_empty() {
            let ids: Vec<ObjectId> = known.into_iter().collect();
            debug!(count = ids.len(), "removing vanished objects");
            let changed = self.database().remove_objects(&ids)?;
            self.sessions().containers_changed_ui(&changed.ui);
            self.update_manager().containers_changed(&changed.upnp);
        }

        adir.set_current_lmt(last_modified_max);
        Ok(())
    }

    /// Retire un autoscan dont la cible a disparu définitivement.
    fn drop_autoscan(&self, adir: &Arc<AutoscanDirectory>) {
        let scan_id = adir.scan_id();
        let mode = adir.scan_mode();
        if let Err(e) = self.remove_autoscan_directory(scan_id, mode) {
            debug!("autoscan already gone: {e}");
        }
    }
}

/// mtime d'un fichier en secondes Unix.
pub(crate) fn file_mtime(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
