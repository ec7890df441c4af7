//! # pmocds - Modèle de données du Content Directory
//!
//! Ce crate définit le modèle de données partagé par la bibliothèque média :
//! les objets du Content Directory Service (containers, items, URLs externes),
//! leurs métadonnées et ressources, ainsi que les enregistrements d'autoscan
//! qui pilotent l'importation.
//!
//! ## Fonctionnalités
//!
//! - **Objets CDS** : [`CdsObject`] avec ses variantes ([`ObjectKind`]),
//!   drapeaux ([`ObjectFlags`]) et validation
//! - **Métadonnées** : clés fermées ([`MetadataKey`]) et dictionnaires ordonnés
//! - **Ressources** : descripteurs de ressources jouables ([`Resource`])
//! - **Autoscan** : enregistrement d'un répertoire surveillé
//!   ([`AutoscanDirectory`]) et réglages par répertoire ([`DirectoryTweak`])
//!
//! Les types sont de simples valeurs (dé)sérialisables ; toute la logique
//! d'importation vit dans `pmocontent`.

mod dictionary;
mod metadata;
mod object;
mod resource;

pub mod autoscan;
pub mod tweak;
pub mod upnp_class;
pub mod vpath;

pub use dictionary::Dictionary;
pub use metadata::MetadataKey;
pub use object::{CdsObject, ObjectError, ObjectFlags, ObjectKind};
pub use resource::{Resource, ResourceAttribute, ResourceHandler};

/// Identifiant d'un objet dans la base de données.
pub type ObjectId = i64;

/// Identifiant du container racine du Content Directory.
pub const ROOT_ID: ObjectId = 0;

/// Identifiant du container "PC Directory" (racine physique).
pub const PC_DIRECTORY_ID: ObjectId = 1;

/// Identifiant invalide (objet absent ou pas encore matérialisé).
pub const INVALID_OBJECT_ID: ObjectId = -1;

/// Clé d'auxdata portant l'horodatage de dernière mise à jour d'un item
/// produit par un service en ligne.
pub const ONLINE_SERVICE_LAST_UPDATE: &str = "ols-last-update";

/// Returns true for the reserved ids that may never be removed.
pub fn is_forbidden_id(id: ObjectId) -> bool {
    id == ROOT_ID || id == PC_DIRECTORY_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_ids() {
        assert!(is_forbidden_id(ROOT_ID));
        assert!(is_forbidden_id(PC_DIRECTORY_ID));
        assert!(!is_forbidden_id(42));
        assert!(!is_forbidden_id(INVALID_OBJECT_ID));
    }
}
