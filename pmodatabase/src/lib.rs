//! # pmodatabase - Persistance du Content Directory
//!
//! Ce crate définit le contrat [`Database`] par lequel le cœur
//! d'importation lit et écrit tout son état persistant, ainsi que deux
//! implémentations :
//!
//! - [`SqliteDatabase`] : stockage SQLite (rusqlite, embarqué), métadonnées
//!   et ressources sérialisées en JSON
//! - [`MemoryDatabase`] : stockage en mémoire, utilisé par les tests et
//!   comme solution de repli
//!
//! Le contrat est volontairement étroit : CRUD d'objets, résolution de
//! chemins physiques et virtuels, et persistance des enregistrements
//! d'autoscan. La base assure sa propre cohérence concurrente ; le cœur
//! ne tient aucun verrou pendant un appel.

mod memory;
mod removal;
mod sqlite;

pub mod config_ext;

pub use config_ext::DatabaseConfigExt;
pub use memory::MemoryDatabase;
pub use sqlite::SqliteDatabase;

use pmocds::autoscan::{AutoscanDirectory, ScanMode};
use pmocds::{CdsObject, ObjectId};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Erreurs de la couche de persistance.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("object {0} not found")]
    NotFound(ObjectId),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type pour les opérations de persistance.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Filtre de type d'objet pour la résolution par chemin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// N'importe quel objet physique.
    Any,
    /// Items physiques uniquement.
    File,
    /// Containers physiques uniquement.
    Directory,
}

/// Containers dont l'ensemble d'enfants a changé suite à une suppression.
///
/// `upnp` alimente les notifications GENA, `ui` le rafraîchissement de
/// l'interface web (containers supprimés uniquement).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangedContainers {
    pub upnp: Vec<ObjectId>,
    pub ui: Vec<ObjectId>,
}

impl ChangedContainers {
    pub fn is_empty(&self) -> bool {
        self.upnp.is_empty() && self.ui.is_empty()
    }
}

/// Contrat de persistance du Content Directory.
///
/// Toutes les implémentations sont thread-safe ; les identifiants
/// attribués sont stables pour la durée de vie de la base.
pub trait Database: Send + Sync {
    /// Recherche un objet physique par chemin disque.
    fn find_object_by_path(&self, path: &Path, file_type: FileType) -> Result<Option<CdsObject>>;

    /// Charge un objet par identifiant, [`DatabaseError::NotFound`] sinon.
    fn load_object(&self, id: ObjectId) -> Result<CdsObject>;

    /// Insère un objet et lui attribue son identifiant.
    ///
    /// Le parent doit exister. L'unicité du `location` est imposée pour
    /// les objets physiques.
    fn add_object(&self, obj: &mut CdsObject) -> Result<()>;

    /// Met à jour un objet existant.
    fn update_object(&self, obj: &CdsObject) -> Result<()>;

    /// Supprime un objet et sa descendance.
    ///
    /// Les objets virtuels référençant un objet supprimé sont toujours
    /// retirés avec lui. Avec `all`, la suppression d'une copie virtuelle
    /// emporte aussi son original et toutes les autres copies.
    fn remove_object(&self, id: ObjectId, all: bool) -> Result<ChangedContainers>;

    /// Supprime un lot d'objets (et leur descendance), comme
    /// [`Database::remove_object`] avec `all = false`.
    fn remove_objects(&self, ids: &[ObjectId]) -> Result<ChangedContainers>;

    /// Identifiants des enfants d'un container.
    fn get_objects(&self, parent_id: ObjectId, direct_only: bool) -> Result<HashSet<ObjectId>>;

    /// Nombre d'enfants directs d'un container.
    fn get_child_count(&self, parent_id: ObjectId) -> Result<usize>;

    /// Matérialise la chaîne `/PC Directory/...` d'un chemin disque.
    ///
    /// Retourne l'identifiant du container feuille et, si des containers
    /// ont été créés, l'identifiant du premier d'entre eux.
    fn ensure_path_existence(&self, path: &Path) -> Result<(ObjectId, Option<ObjectId>)>;

    /// Matérialise une chaîne de containers virtuels.
    ///
    /// `chain` est un chemin virtuel échappé (voir `pmocds::vpath`).
    /// Idempotent : les préfixes existants sont réutilisés. Si le
    /// container final est nouvellement créé, sa classe est `last_class`
    /// et il référence `last_ref_id` s'il est non nul.
    fn add_container_chain(
        &self,
        chain: &str,
        last_class: &str,
        last_ref_id: ObjectId,
    ) -> Result<(ObjectId, Option<ObjectId>)>;

    /// Identifiants des objets dont le `service_id` commence par `prefix`.
    fn get_service_object_ids(&self, prefix: char) -> Result<Vec<ObjectId>>;

    /// Nombre total d'items physiques indexés.
    fn get_total_files(&self) -> Result<u64>;

    /// Types MIME distincts présents dans la base.
    fn get_mime_types(&self) -> Result<Vec<String>>;

    /// Charge les enregistrements d'autoscan persistés pour un mode.
    fn get_autoscan_list(&self, mode: ScanMode) -> Result<Vec<Arc<AutoscanDirectory>>>;

    /// Remplace les enregistrements persistés d'un mode (appelé à l'arrêt
    /// pour sauver les curseurs de modification).
    fn update_autoscan_list(&self, mode: ScanMode, list: &[Arc<AutoscanDirectory>]) -> Result<()>;

    /// Persiste un nouvel enregistrement et lui attribue son storage id.
    fn add_autoscan_directory(&self, adir: &AutoscanDirectory) -> Result<i64>;

    /// Met à jour un enregistrement persisté (object id, curseur).
    fn update_autoscan_directory(&self, adir: &AutoscanDirectory) -> Result<()>;

    /// Retire un enregistrement persisté.
    fn remove_autoscan_directory(&self, storage_id: i64) -> Result<()>;
}
