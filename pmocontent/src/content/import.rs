//! Importation de fichiers
//!
//! `add_file` est l'entrée universelle : tout fichier ou répertoire qui
//! rejoint le Content Directory passe par ici, qu'il vienne d'un
//! balayage, d'un événement inotify ou d'une demande explicite.

use super::ContentManager;
use crate::error::{ContentError, Result};
use crate::playlist::CONTENT_TYPE_PLAYLIST;
use crate::task::{Task, TaskId, TaskOwner, TaskPayload};
use pmocds::{upnp_class, CdsObject, ObjectId, INVALID_OBJECT_ID};
use pmodatabase::FileType;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Type MIME de repli quand aucune correspondance n'est trouvée.
const DEFAULT_MIMETYPE: &str = "application/octet-stream";

impl ContentManager {
    /// Demande l'importation d'un chemin (asynchrone).
    ///
    /// Retourne l'identifiant de la tâche déposée.
    pub fn add_file(
        &self,
        path: impl Into<PathBuf>,
        recursive: bool,
        low_priority: bool,
        cancellable: bool,
    ) -> Result<TaskId> {
        let path: PathBuf = path.into();
        if !path.is_absolute() {
            return Err(ContentError::InvalidArgument(format!(
                "import path must be absolute: {}",
                path.display()
            )));
        }
        let rootpath = if path.is_dir() {
            path.clone()
        } else {
            PathBuf::new()
        };
        Ok(self.add_file_queued(
            path,
            rootpath,
            recursive,
            self.default_hidden,
            low_priority,
            cancellable,
        ))
    }

    /// Dépose une tâche d'importation sur la file du gestionnaire.
    pub(crate) fn add_file_queued(
        &self,
        path: PathBuf,
        rootpath: PathBuf,
        recursive: bool,
        hidden: bool,
        low_priority: bool,
        cancellable: bool,
    ) -> TaskId {
        let description = format!("Adding: {}", path.display());
        let task = Task::new(
            TaskOwner::ContentManager,
            TaskPayload::AddFile {
                path,
                rootpath,
                recursive,
                hidden,
            },
        )
        .with_description(description)
        .with_cancellable(cancellable);
        self.add_task(task, low_priority)
    }

    /// Variante interne avec lien de parenté de tâche (balayages).
    pub(crate) fn add_file_subtask(
        &self,
        path: PathBuf,
        rootpath: PathBuf,
        recursive: bool,
        hidden: bool,
        parent_task: TaskId,
        cancellable: bool,
    ) -> TaskId {
        let description = format!("Adding: {}", path.display());
        let task = Task::new(
            TaskOwner::ContentManager,
            TaskPayload::AddFile {
                path,
                rootpath,
                recursive,
                hidden,
            },
        )
        .with_description(description)
        .with_parent(parent_task)
        .with_cancellable(cancellable);
        self.add_task(task, true)
    }

    /// Importe un chemin, immédiatement et sur le thread appelant.
    pub fn add_file_sync(
        &self,
        path: &Path,
        rootpath: &Path,
        recursive: bool,
        hidden: bool,
    ) -> Result<ObjectId> {
        self._add_file(path, rootpath, recursive, hidden, None)
    }

    /// Corps de l'importation d'un chemin.
    pub(crate) fn _add_file(
        &self,
        path: &Path,
        rootpath: &Path,
        recursive: bool,
        hidden: bool,
        task: Option<&Task>,
    ) -> Result<ObjectId> {
        if !hidden && is_hidden_name(path) {
            return Ok(INVALID_OBJECT_ID);
        }
        // never index the server configuration file
        if path == self.config_file {
            return Ok(INVALID_OBJECT_ID);
        }

        let existing = self.database().find_object_by_path(path, FileType::Any)?;
        let obj = match existing {
            Some(obj) => Some(obj),
            None => {
                let Some(mut obj) = self.create_object_from_file(path, false)? else {
                    debug!(path = %path.display(), "file ignored");
                    return Ok(INVALID_OBJECT_ID);
                };
                if obj.is_item() {
                    // the media type filter of the covering autoscan applies
                    if let Some(adir) = self.get_autoscan_covering(path) {
                        if !adir.accepts_class(&obj.upnp_class) {
                            debug!(path = %path.display(), "class filtered by autoscan");
                            return Ok(INVALID_OBJECT_ID);
                        }
                    }
                    let parent = path.parent().unwrap_or(Path::new("/"));
                    obj.parent_id = self.ensure_path_existence(parent)?;
                    self.add_object(&mut obj)?;
                    self.layout_and_playlist(&obj, rootpath, task);
                    Some(obj)
                } else {
                    // containers materialise through their children
                    Some(obj)
                }
            }
        };

        let Some(obj) = obj else {
            return Ok(INVALID_OBJECT_ID);
        };
        if recursive && (obj.is_container() || path.is_dir()) {
            self.add_recursive(path, rootpath, hidden, task)?;
        }
        Ok(obj.id)
    }

    /// Passe de layout et de playlist d'un item fraîchement ajouté.
    fn layout_and_playlist(&self, obj: &CdsObject, rootpath: &Path, task: Option<&Task>) {
        if let Some(layout) = &self.layout {
            if let Err(e) = layout.process_cds_object(self, obj, rootpath) {
                warn!(path = %obj.location, "layout failed, keeping physical entry: {e}");
            }
        }
        let content_type = obj
            .mimetype
            .as_deref()
            .and_then(|m| self.contenttype_for_mimetype(m));
        if content_type.as_deref() == Some(CONTENT_TYPE_PLAYLIST) {
            if let Some(parser) = &self.playlist_parser {
                if let Err(e) = parser.process_playlist_object(obj, task) {
                    warn!(path = %obj.location, "playlist parsing failed: {e}");
                }
            }
        }
    }

    /// Parcourt un répertoire et importe tout son contenu.
    pub(crate) fn add_recursive(
        &self,
        path: &Path,
        rootpath: &Path,
        hidden: bool,
        task: Option<&Task>,
    ) -> Result<()> {
        let mut settings = crate::setting::ScanSettings::from_autoscan(
            self.get_autoscan_covering(path),
            self.default_hidden,
            self.default_follow_symlinks,
        );
        settings.merge_tweaks(&self.tweaks, path);

        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for entry in entries {
            self.check_shutdown()?;
            if let Some(task) = task {
                task.checkpoint()?;
            }
            if !hidden && is_hidden_name(&entry) {
                continue;
            }
            if entry == self.config_file {
                continue;
            }
            if !settings.follow_symlinks && entry.is_symlink() {
                continue;
            }

            let result = if entry.is_dir() {
                self.add_recursive(&entry, rootpath, hidden, task)
            } else {
                self._add_file(&entry, rootpath, false, hidden, task)
                    .map(|_| ())
            };
            // a broken entry never aborts the walk
            if let Err(e) = result {
                if e.is_silent() {
                    return Err(e);
                }
                warn!(path = %entry.display(), "skipping entry: {e}");
            }
        }
        Ok(())
    }

    /// Construit l'objet CDS correspondant à un chemin disque.
    ///
    /// Retourne `None` quand le fichier est ignoré par configuration.
    pub(crate) fn create_object_from_file(
        &self,
        path: &Path,
        allow_fifo: bool,
    ) -> Result<Option<CdsObject>> {
        let metadata = std::fs::metadata(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                ContentError::InvalidArgument(format!("bad path: {}", path.display()))
            })?;

        if metadata.is_dir() {
            // containers are materialised by the database, this marker
            // only tells the caller what the path is
            let mut container = CdsObject::container(file_name);
            container.location = path.to_string_lossy().to_string();
            return Ok(Some(container));
        }

        if !metadata.is_file() && !(allow_fifo && is_fifo(&metadata)) {
            return Err(ContentError::InvalidArgument(format!(
                "unsupported file type: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let mimetype = self
            .extension_to_mimetype(&extension)
            .unwrap_or_else(|| DEFAULT_MIMETYPE.to_string());

        let mut upnp = self.mimetype_to_upnpclass(&mimetype);
        if upnp.is_none()
            && self.contenttype_for_mimetype(&mimetype).as_deref() == Some("ogg")
        {
            // an ogg container is video when it carries a theora stream
            upnp = Some(if is_theora(path) {
                upnp_class::VIDEO_ITEM.to_string()
            } else {
                upnp_class::MUSIC_TRACK.to_string()
            });
        }

        let mut item = CdsObject::item(file_name);
        item.location = path.to_string_lossy().to_string();
        item.mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        item.size_on_disk = metadata.len();
        item.mimetype = Some(mimetype);
        item.upnp_class = upnp.unwrap_or_else(|| upnp_class::ITEM.to_string());

        self.metadata.fill_metadata(&mut item);
        Ok(Some(item))
    }

    /// Ajoute un objet et propage les notifications de containers.
    pub fn add_object(&self, obj: &mut CdsObject) -> Result<()> {
        debug!(parent = obj.parent_id, title = %obj.title, "adding object");
        self.database().add_object(obj)?;

        self.update_manager().container_changed(obj.parent_id);
        if let Ok(1) = self.database().get_child_count(obj.parent_id) {
            // the parent just got its first child, its own entry changed
            if let Ok(parent) = self.database().load_object(obj.parent_id) {
                self.update_manager().container_changed(parent.parent_id);
            }
        }
        if obj.is_container() {
            self.sessions().container_changed_ui(obj.parent_id);
        }
        if !obj.is_virtual() && obj.kind.is_pure_item() {
            self.bump_total_files();
        }
        Ok(())
    }

    /// Ajoute un item virtuel, en matérialisant d'abord l'objet
    /// physique sous-jacent si nécessaire.
    pub fn add_virtual_item(&self, obj: &mut CdsObject, allow_fifo: bool) -> Result<()> {
        obj.validate()
            .map_err(|e| ContentError::InvalidArgument(e.to_string()))?;
        let path = PathBuf::from(&obj.location);
        if self
            .database()
            .find_object_by_path(&path, FileType::Any)?
            .is_none()
        {
            let Some(mut pcdir) = self.create_object_from_file(&path, allow_fifo)? else {
                return Err(ContentError::InvalidArgument(format!(
                    "could not add {}",
                    path.display()
                )));
            };
            if pcdir.is_item() {
                let parent = path.parent().unwrap_or(Path::new("/"));
                pcdir.parent_id = self.ensure_path_existence(parent)?;
                self.add_object(&mut pcdir)?;
                obj.ref_id = pcdir.id;
            }
        }
        self.add_object(obj)
    }

    /// Met à jour un objet, avec propagation facultative.
    pub fn update_object(&self, obj: &CdsObject, send_updates: bool) -> Result<()> {
        self.database().update_object(obj)?;
        if send_updates {
            self.update_manager().container_changed(obj.parent_id);
            if obj.is_container() {
                self.sessions().container_changed_ui(obj.parent_id);
            }
        }
        Ok(())
    }

    /// Matérialise la chaîne `/PC Directory/...` d'un chemin disque et
    /// retourne le container feuille.
    pub fn ensure_path_existence(&self, path: &Path) -> Result<ObjectId> {
        let (leaf, created) = self.database().ensure_path_existence(path)?;
        if let Some(created) = created {
            self.update_manager().container_changed(created);
            self.sessions().container_changed_ui(created);
        }
        Ok(leaf)
    }

    /// Matérialise une chaîne de containers virtuels.
    pub fn add_container_chain(&self, chain: &str, last_class: &str) -> Result<ObjectId> {
        if chain.is_empty() {
            return Err(ContentError::InvalidArgument(
                "add_container_chain called with empty chain".to_string(),
            ));
        }
        let (leaf, created) = self
            .database()
            .add_container_chain(chain, last_class, 0)?;
        if let Some(created) = created {
            self.update_manager().container_changed(created);
            self.sessions().container_changed_ui(created);
        }
        Ok(leaf)
    }

    /// Demande la suppression asynchrone d'un objet.
    ///
    /// Pour un container, les autoscans situés dessous sont retirés et
    /// les importations en attente sous son chemin invalidées avant le
    /// dépôt de la tâche, pour qu'aucun insert fantôme ne suive la
    /// suppression.
    pub fn remove_object_async(&self, object_id: ObjectId, all: bool) -> TaskId {
        let obj = match self.database().load_object(object_id) {
            Ok(obj) => obj,
            Err(e) => {
                debug!(object_id, "cannot remove object no longer in database: {e}");
                return 0;
            }
        };

        if obj.is_container() && !obj.location.is_empty() {
            let path = PathBuf::from(&obj.location);
            self.remove_autoscans_under(&path);
            self.worker_queue().invalidate_add_tasks_under(&path);
        }

        let task = Task::new(
            TaskOwner::ContentManager,
            TaskPayload::RemoveObject { object_id, all },
        )
        .with_description(format!("Removing: {}", obj.title));
        self.add_task(task, false)
    }

    /// Suppression immédiate (corps de la tâche).
    pub(crate) fn _remove_object(&self, object_id: ObjectId, all: bool) -> Result<()> {
        if pmocds::is_forbidden_id(object_id) {
            return Err(ContentError::InvalidArgument(format!(
                "cannot remove reserved container {object_id}"
            )));
        }
        let changed = self.database().remove_object(object_id, all)?;
        self.sessions().containers_changed_ui(&changed.ui);
        self.update_manager().containers_changed(&changed.upnp);
        Ok(())
    }

    /// Supprime l'objet indexé à un chemin, s'il existe (déplacements).
    pub(crate) fn remove_indexed_path(&self, _adir: &pmocds::autoscan::AutoscanDirectory, path: &Path) {
        match self.database().find_object_by_path(path, FileType::Any) {
            Ok(Some(obj)) => {
                self.remove_object_async(obj.id, false);
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), "lookup failed during move: {e}"),
        }
    }
}

/// Le nom de fichier commence-t-il par un point ?
pub(crate) fn is_hidden_name(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_fifo(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_fifo()
}

#[cfg(not(unix))]
fn is_fifo(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Sonde grossière d'un conteneur Ogg : la première page annonce-t-elle
/// un flux theora ?
fn is_theora(path: &Path) -> bool {
    use std::io::Read;
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut header = [0u8; 512];
    let Ok(read) = file.read(&mut header) else {
        return false;
    };
    let header = &header[..read];
    header.starts_with(b"OggS") && header.windows(6).any(|w| w == b"theora")
}
