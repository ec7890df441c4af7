//! Enregistrement d'autoscan
//!
//! Un [`AutoscanDirectory`] décrit un répertoire physique maintenu en
//! phase avec le Content Directory, soit par balayage périodique
//! ([`ScanMode::Timed`]), soit par événements du noyau
//! ([`ScanMode::INotify`]). L'enregistrement est partagé entre le
//! gestionnaire de contenu, le timer et le watcher : les champs qui
//! évoluent pendant la vie du record sont des atomiques.

use crate::{ObjectId, INVALID_OBJECT_ID};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::time::Duration;

/// Identifiant d'un enregistrement d'autoscan au sein de son mode.
pub type ScanId = i32;

/// Identifiant d'autoscan invalide (enregistrement retiré).
pub const INVALID_SCAN_ID: ScanId = -1;

/// Mode de surveillance d'un répertoire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanMode {
    /// Balayage périodique complet du répertoire.
    Timed,
    /// Surveillance par événements inotify.
    INotify,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Timed => "timed",
            ScanMode::INotify => "inotify",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "timed" => Some(ScanMode::Timed),
            "inotify" => Some(ScanMode::INotify),
            _ => None,
        }
    }
}

/// Profondeur d'analyse d'un balayage périodique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanLevel {
    /// Diff d'appartenance uniquement, sans comparaison de mtime.
    Basic,
    /// Diff d'appartenance + ré-import des fichiers modifiés (mtime).
    Full,
}

impl ScanLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanLevel::Basic => "basic",
            ScanLevel::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "basic" => Some(ScanLevel::Basic),
            "full" => Some(ScanLevel::Full),
            _ => None,
        }
    }
}

bitflags! {
    /// Familles de médias qu'un autoscan accepte d'indexer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MediaType: u32 {
        const AUDIO = 0x01;
        const IMAGE = 0x02;
        const VIDEO = 0x04;
    }
}

// sérialisé comme simple masque de bits
impl Serialize for MediaType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(MediaType::from_bits_truncate(u32::deserialize(
            deserializer,
        )?))
    }
}

impl MediaType {
    pub const ANY: MediaType = MediaType::all();

    /// Famille correspondant à une classe UPnP d'item, si identifiable.
    pub fn from_upnp_class(class: &str) -> Option<MediaType> {
        if crate::upnp_class::is_subclass(class, crate::upnp_class::AUDIO_ITEM) {
            Some(MediaType::AUDIO)
        } else if crate::upnp_class::is_subclass(class, crate::upnp_class::IMAGE_ITEM) {
            Some(MediaType::IMAGE)
        } else if crate::upnp_class::is_subclass(class, crate::upnp_class::VIDEO_ITEM) {
            Some(MediaType::VIDEO)
        } else {
            None
        }
    }
}

impl Default for MediaType {
    fn default() -> Self {
        MediaType::ANY
    }
}

/// Un répertoire enregistré pour resynchronisation automatique.
///
/// Les champs de configuration sont figés à la création ; la mise à jour
/// d'un autoscan passe par le remplacement de l'enregistrement. Les
/// compteurs et curseurs, eux, sont partagés entre threads.
#[derive(Debug)]
pub struct AutoscanDirectory {
    location: PathBuf,
    scan_mode: ScanMode,
    scan_level: ScanLevel,
    recursive: bool,
    hidden: bool,
    follow_symlinks: bool,
    interval: Duration,
    retry_count: u32,
    persistent: bool,
    media_type: MediaType,

    /// Identifiant du container CDS lié, `INVALID_OBJECT_ID` tant que le
    /// chemin n'est pas matérialisé.
    object_id: AtomicI64,
    /// Ligne de la table autoscan en base, pour les enregistrements persistés.
    storage_id: AtomicI64,
    scan_id: AtomicI32,
    task_count: AtomicI32,
    active_scan_count: AtomicI32,
    /// Curseur mtime validé par le dernier balayage complet.
    last_modified_previous: AtomicI64,
    /// Curseur mtime en cours d'avancement pendant un balayage.
    last_modified_current: AtomicI64,
}

impl AutoscanDirectory {
    pub fn new(location: impl Into<PathBuf>, scan_mode: ScanMode) -> Self {
        Self {
            location: location.into(),
            scan_mode,
            scan_level: ScanLevel::Full,
            recursive: false,
            hidden: false,
            follow_symlinks: true,
            interval: Duration::from_secs(1800),
            retry_count: 0,
            persistent: false,
            media_type: MediaType::ANY,
            object_id: AtomicI64::new(INVALID_OBJECT_ID),
            storage_id: AtomicI64::new(INVALID_OBJECT_ID),
            scan_id: AtomicI32::new(INVALID_SCAN_ID),
            task_count: AtomicI32::new(0),
            active_scan_count: AtomicI32::new(0),
            last_modified_previous: AtomicI64::new(0),
            last_modified_current: AtomicI64::new(0),
        }
    }

    pub fn with_scan_level(mut self, level: ScanLevel) -> Self {
        self.scan_level = level;
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    pub fn scan_level(&self) -> ScanLevel {
        self.scan_level
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Teste si une classe UPnP est acceptée par le filtre de médias.
    pub fn accepts_class(&self, class: &str) -> bool {
        match MediaType::from_upnp_class(class) {
            Some(mt) => self.media_type.intersects(mt),
            None => true,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id.load(Ordering::SeqCst)
    }

    pub fn set_object_id(&self, id: ObjectId) {
        self.object_id.store(id, Ordering::SeqCst);
    }

    pub fn storage_id(&self) -> i64 {
        self.storage_id.load(Ordering::SeqCst)
    }

    pub fn set_storage_id(&self, id: i64) {
        self.storage_id.store(id, Ordering::SeqCst);
    }

    pub fn scan_id(&self) -> ScanId {
        self.scan_id.load(Ordering::SeqCst)
    }

    pub fn set_scan_id(&self, id: ScanId) {
        self.scan_id.store(id, Ordering::SeqCst);
    }

    /// Invalide l'enregistrement : les balayages en cours s'arrêtent au
    /// prochain point de contrôle.
    pub fn invalidate(&self) {
        self.set_scan_id(INVALID_SCAN_ID);
    }

    pub fn is_valid(&self) -> bool {
        self.scan_id() != INVALID_SCAN_ID
    }

    pub fn task_count(&self) -> i32 {
        self.task_count.load(Ordering::SeqCst)
    }

    pub fn inc_task_count(&self) {
        self.task_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Décrémente le compteur de tâches et retourne la nouvelle valeur.
    pub fn dec_task_count(&self) -> i32 {
        self.task_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn active_scan_count(&self) -> i32 {
        self.active_scan_count.load(Ordering::SeqCst)
    }

    pub fn inc_active_scan_count(&self) {
        self.active_scan_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_active_scan_count(&self) {
        self.active_scan_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Curseur mtime de référence pour le balayage en cours.
    pub fn previous_lmt(&self) -> i64 {
        self.last_modified_previous.load(Ordering::SeqCst)
    }

    /// Avance le curseur courant (jamais en arrière).
    pub fn set_current_lmt(&self, mtime: i64) {
        self.last_modified_current
            .fetch_max(mtime, Ordering::SeqCst);
    }

    pub fn current_lmt(&self) -> i64 {
        self.last_modified_current.load(Ordering::SeqCst)
    }

    /// Valide le curseur courant comme nouvelle référence.
    pub fn update_lmt(&self) {
        let current = self.current_lmt();
        self.last_modified_previous
            .fetch_max(current, Ordering::SeqCst);
    }

    /// Oublie les curseurs (changement de niveau de scan par exemple).
    pub fn reset_lmt(&self) {
        self.last_modified_previous.store(0, Ordering::SeqCst);
        self.last_modified_current.store(0, Ordering::SeqCst);
    }

    /// Projection sérialisable de l'enregistrement, pour la persistance.
    pub fn to_record(&self) -> AutoscanRecord {
        AutoscanRecord {
            location: self.location.clone(),
            scan_mode: self.scan_mode,
            scan_level: self.scan_level,
            recursive: self.recursive,
            hidden: self.hidden,
            follow_symlinks: self.follow_symlinks,
            interval_secs: self.interval.as_secs(),
            retry_count: self.retry_count,
            persistent: self.persistent,
            media_type: self.media_type,
            object_id: self.object_id(),
            storage_id: self.storage_id(),
            last_modified: self.previous_lmt(),
        }
    }

    /// Reconstruit un enregistrement depuis sa projection persistée.
    pub fn from_record(record: &AutoscanRecord) -> Self {
        let adir = AutoscanDirectory::new(record.location.clone(), record.scan_mode)
            .with_scan_level(record.scan_level)
            .with_recursive(record.recursive)
            .with_hidden(record.hidden)
            .with_follow_symlinks(record.follow_symlinks)
            .with_interval(Duration::from_secs(record.interval_secs))
            .with_retry_count(record.retry_count)
            .with_persistent(record.persistent)
            .with_media_type(record.media_type);
        adir.set_object_id(record.object_id);
        adir.set_storage_id(record.storage_id);
        adir.last_modified_previous
            .store(record.last_modified, Ordering::SeqCst);
        adir.last_modified_current
            .store(record.last_modified, Ordering::SeqCst);
        adir
    }
}

/// Forme persistée d'un [`AutoscanDirectory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscanRecord {
    pub location: PathBuf,
    pub scan_mode: ScanMode,
    pub scan_level: ScanLevel,
    pub recursive: bool,
    pub hidden: bool,
    pub follow_symlinks: bool,
    pub interval_secs: u64,
    pub retry_count: u32,
    pub persistent: bool,
    pub media_type: MediaType,
    pub object_id: ObjectId,
    pub storage_id: i64,
    pub last_modified: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lmt_cursor_only_advances() {
        let adir = AutoscanDirectory::new("/tmp/music", ScanMode::Timed);
        adir.set_current_lmt(100);
        adir.set_current_lmt(50);
        assert_eq!(adir.current_lmt(), 100);
        adir.update_lmt();
        assert_eq!(adir.previous_lmt(), 100);
        adir.reset_lmt();
        assert_eq!(adir.previous_lmt(), 0);
    }

    #[test]
    fn task_count_reaches_zero() {
        let adir = AutoscanDirectory::new("/tmp/music", ScanMode::Timed);
        adir.inc_task_count();
        adir.inc_task_count();
        assert_eq!(adir.dec_task_count(), 1);
        assert_eq!(adir.dec_task_count(), 0);
    }

    #[test]
    fn media_type_filter() {
        let adir = AutoscanDirectory::new("/tmp/music", ScanMode::Timed)
            .with_media_type(MediaType::AUDIO);
        assert!(adir.accepts_class(crate::upnp_class::MUSIC_TRACK));
        assert!(!adir.accepts_class(crate::upnp_class::VIDEO_ITEM));
        // unknown classes are never filtered out
        assert!(adir.accepts_class("object.item"));
    }
}
