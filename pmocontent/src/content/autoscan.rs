//! Gestion des enregistrements d'autoscan
//!
//! Enregistrement, remplacement et retrait des autoscans, avec les
//! règles de conservation du curseur de modification et le traitement
//! des chemins persistants disparus.

use super::ContentManager;
use crate::error::{ContentError, Result};
use crate::timer::TimerParameter;
use pmocds::autoscan::{AutoscanDirectory, ScanId, ScanLevel, ScanMode};
use pmocds::{ObjectId, INVALID_OBJECT_ID};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl ContentManager {
    pub fn get_autoscan_directory(
        &self,
        scan_id: ScanId,
        mode: ScanMode,
    ) -> Option<Arc<AutoscanDirectory>> {
        match mode {
            ScanMode::Timed => self.autoscan_timed.lock().unwrap().get(scan_id),
            ScanMode::INotify => self.autoscan_inotify.lock().unwrap().get(scan_id),
        }
    }

    pub fn get_autoscan_by_location(&self, location: &Path) -> Option<Arc<AutoscanDirectory>> {
        self.autoscan_timed
            .lock()
            .unwrap()
            .get_by_location(location)
            .or_else(|| {
                self.autoscan_inotify
                    .lock()
                    .unwrap()
                    .get_by_location(location)
            })
    }

    pub fn get_autoscan_by_object_id(&self, object_id: ObjectId) -> Option<Arc<AutoscanDirectory>> {
        self.autoscan_timed
            .lock()
            .unwrap()
            .get_by_object_id(object_id)
            .or_else(|| {
                self.autoscan_inotify
                    .lock()
                    .unwrap()
                    .get_by_object_id(object_id)
            })
    }

    pub fn autoscan_directories(&self) -> Vec<Arc<AutoscanDirectory>> {
        let mut all = self.autoscan_timed.lock().unwrap().all();
        all.extend(self.autoscan_inotify.lock().unwrap().all());
        all
    }

    /// L'autoscan le plus spécifique couvrant un chemin donné.
    pub(crate) fn get_autoscan_covering(&self, path: &Path) -> Option<Arc<AutoscanDirectory>> {
        self.autoscan_directories()
            .into_iter()
            .filter(|a| path.starts_with(a.location()))
            .max_by_key(|a| a.location().as_os_str().len())
    }

    /// Enregistre un nouvel autoscan ou remplace celui du même chemin.
    pub fn set_autoscan_directory(&self, dir: Arc<AutoscanDirectory>) -> Result<()> {
        let location = dir.location().to_path_buf();
        if !location.is_absolute() {
            return Err(ContentError::InvalidArgument(format!(
                "autoscan location must be absolute: {}",
                location.display()
            )));
        }

        let original = self.get_autoscan_by_location(&location);
        self.check_overlapping(&dir, original.as_deref())?;

        match original {
            None => {
                dir.reset_lmt();
                self.database().add_autoscan_directory(&dir)?;
                self.register_autoscan(&dir)?;
                info!(
                    location = %location.display(),
                    mode = dir.scan_mode().as_str(),
                    "🔍 Autoscan registered"
                );
                self.sessions().container_changed_ui(dir.object_id());
            }
            Some(original) => {
                dir.set_storage_id(original.storage_id());
                dir.set_object_id(original.object_id());

                // cursor survival rules on reconfiguration
                let keep_cursor = !(original.scan_level() == ScanLevel::Full
                    && dir.scan_level() == ScanLevel::Basic)
                    && !(original.scan_level() == ScanLevel::Full
                        && dir.scan_level() == ScanLevel::Full
                        && !original.recursive()
                        && dir.recursive());
                if keep_cursor {
                    dir.set_current_lmt(original.previous_lmt());
                    dir.update_lmt();
                } else {
                    dir.reset_lmt();
                }

                self.disarm_autoscan(&original);
                self.register_autoscan(&dir)?;
                self.database().update_autoscan_directory(&dir)?;
                if original.scan_mode() != dir.scan_mode() {
                    self.sessions().container_changed_ui(dir.object_id());
                }
            }
        }
        Ok(())
    }

    /// Arme un enregistrement déjà persisté (chargement au démarrage).
    pub(crate) fn arm_autoscan(&self, adir: &Arc<AutoscanDirectory>) -> Result<()> {
        self.register_autoscan(adir)
    }

    /// Ajoute l'enregistrement à sa liste et déclenche sa surveillance.
    fn register_autoscan(&self, adir: &Arc<AutoscanDirectory>) -> Result<()> {
        match adir.scan_mode() {
            ScanMode::Timed => {
                self.autoscan_timed.lock().unwrap().add(Arc::clone(adir))?;
                // first scan right away, the timer is re-armed afterwards
                self.rescan_directory(
                    adir.object_id(),
                    adir.scan_id(),
                    ScanMode::Timed,
                    None,
                    true,
                );
            }
            ScanMode::INotify => {
                let Some(inotify) = self.inotify() else {
                    return Err(ContentError::InvalidArgument(
                        "inotify autoscan requested but inotify is not available".to_string(),
                    ));
                };
                self.autoscan_inotify
                    .lock()
                    .unwrap()
                    .add(Arc::clone(adir))?;
                inotify.monitor(Arc::clone(adir));
            }
        }
        Ok(())
    }

    /// Retire l'enregistrement de sa liste et coupe sa surveillance.
    fn disarm_autoscan(&self, adir: &Arc<AutoscanDirectory>) {
        match adir.scan_mode() {
            ScanMode::Timed => {
                let _ = self.timer().remove_subscriber(
                    &self.weak_subscriber(),
                    &TimerParameter::Autoscan {
                        scan_id: adir.scan_id(),
                        mode: ScanMode::Timed,
                    },
                    true,
                );
                self.autoscan_timed.lock().unwrap().remove(adir.scan_id());
            }
            ScanMode::INotify => {
                self.autoscan_inotify
                    .lock()
                    .unwrap()
                    .remove(adir.scan_id());
                if let Some(inotify) = self.inotify() {
                    inotify.unmonitor(Arc::clone(adir));
                }
            }
        }
    }

    /// Retire un autoscan par identifiant de scan.
    pub fn remove_autoscan_directory(&self, scan_id: ScanId, mode: ScanMode) -> Result<()> {
        let adir = self
            .get_autoscan_directory(scan_id, mode)
            .ok_or_else(|| ContentError::NotFound("no such autoscan directory".to_string()))?;
        self.disarm_autoscan(&adir);
        if adir.storage_id() > 0 {
            self.database().remove_autoscan_directory(adir.storage_id())?;
        }
        self.sessions().container_changed_ui(adir.object_id());
        info!(location = %adir.location().display(), "Autoscan removed");
        Ok(())
    }

    /// Retire un autoscan par container lié.
    pub fn remove_autoscan_by_object_id(&self, object_id: ObjectId) -> Result<()> {
        let adir = self
            .get_autoscan_by_object_id(object_id)
            .ok_or_else(|| ContentError::NotFound("object is not an autoscan point".to_string()))?;
        self.remove_autoscan_directory(adir.scan_id(), adir.scan_mode())
    }

    /// Retire un autoscan par chemin.
    pub fn remove_autoscan_by_location(&self, location: &Path) -> Result<()> {
        let adir = self
            .get_autoscan_by_location(location)
            .ok_or_else(|| ContentError::NotFound("location is not an autoscan point".to_string()))?;
        self.remove_autoscan_directory(adir.scan_id(), adir.scan_mode())
    }

    /// Retrait silencieux, pour le watcher (point de départ disparu).
    pub(crate) fn remove_autoscan_record(&self, adir: &Arc<AutoscanDirectory>) {
        if let Err(e) = self.remove_autoscan_directory(adir.scan_id(), adir.scan_mode()) {
            debug!("autoscan record already removed: {e}");
        }
    }

    /// Le chemin d'un autoscan persistant a disparu : le container est
    /// détaché mais l'enregistrement survit.
    pub(crate) fn handle_persistent_autoscan_remove(&self, adir: &Arc<AutoscanDirectory>) {
        if adir.persistent() {
            adir.set_object_id(INVALID_OBJECT_ID);
            if let Err(e) = self.database().update_autoscan_directory(adir) {
                warn!("could not persist detached autoscan: {e}");
            }
        } else {
            self.remove_autoscan_record(adir);
        }
    }

    /// Le chemin d'un autoscan persistant est réapparu : le container
    /// est rematérialisé.
    pub(crate) fn handle_persistent_autoscan_recreate(&self, adir: &Arc<AutoscanDirectory>) {
        match self.ensure_path_existence(adir.location()) {
            Ok(object_id) => {
                adir.set_object_id(object_id);
                if let Err(e) = self.database().update_autoscan_directory(adir) {
                    warn!("could not persist recreated autoscan: {e}");
                }
            }
            Err(e) => warn!(
                location = %adir.location().display(),
                "could not recreate autoscan container: {e}"
            ),
        }
    }

    /// Retire et désarme tous les autoscans situés sous un chemin.
    pub(crate) fn remove_autoscans_under(&self, path: &PathBuf) {
        let removed_timed = self
            .autoscan_timed
            .lock()
            .unwrap()
            .remove_if_subdir(path);
        for (scan_id, adir) in removed_timed {
            let _ = self.timer().remove_subscriber(
                &self.weak_subscriber(),
                &TimerParameter::Autoscan {
                    scan_id,
                    mode: ScanMode::Timed,
                },
                true,
            );
            if adir.storage_id() > 0 {
                let _ = self.database().remove_autoscan_directory(adir.storage_id());
            }
        }
        let removed_watched = self
            .autoscan_inotify
            .lock()
            .unwrap()
            .remove_if_subdir(path);
        for (_, adir) in removed_watched {
            if let Some(inotify) = self.inotify() {
                inotify.unmonitor(Arc::clone(&adir));
            }
            if adir.storage_id() > 0 {
                let _ = self.database().remove_autoscan_directory(adir.storage_id());
            }
        }
    }

    /// Refuse les recouvrements d'autoscans récursifs.
    fn check_overlapping(
        &self,
        dir: &Arc<AutoscanDirectory>,
        replacing: Option<&AutoscanDirectory>,
    ) -> Result<()> {
        for existing in self.autoscan_directories() {
            if let Some(replacing) = replacing {
                if existing.location() == replacing.location() {
                    continue; // being replaced
                }
            }
            if dir.recursive() && existing.location().starts_with(dir.location()) {
                return Err(ContentError::Conflict(format!(
                    "autoscan {} would shadow {}",
                    dir.location().display(),
                    existing.location().display()
                )));
            }
            if existing.recursive() && dir.location().starts_with(existing.location()) {
                return Err(ContentError::Conflict(format!(
                    "autoscan {} is already covered by {}",
                    dir.location().display(),
                    existing.location().display()
                )));
            }
        }
        Ok(())
    }
}
