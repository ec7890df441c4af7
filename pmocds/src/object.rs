//! Objet du Content Directory
//!
//! Un [`CdsObject`] est un nœud de l'arbre CDS : container, item physique,
//! item URL ou item actif. Le type est une simple valeur ; la base de
//! données attribue les identifiants et vérifie les invariants de
//! parenté.

use crate::{
    Dictionary, MetadataKey, ObjectId, Resource, upnp_class, INVALID_OBJECT_ID,
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Variante d'un objet CDS. L'ensemble est fermé.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Container,
    Item,
    ExternalUrlItem,
    InternalUrlItem,
    ActiveItem,
}

impl ObjectKind {
    pub fn is_container(&self) -> bool {
        matches!(self, ObjectKind::Container)
    }

    /// Vrai pour toutes les variantes d'item (y compris URLs et actifs).
    pub fn is_item(&self) -> bool {
        !self.is_container()
    }

    /// Item physique sur disque, sans indirection URL.
    pub fn is_pure_item(&self) -> bool {
        matches!(self, ObjectKind::Item)
    }

    pub fn has_location(&self) -> bool {
        !matches!(self, ObjectKind::Container)
    }

    pub fn has_mimetype(&self) -> bool {
        self.is_item()
    }

    pub fn has_children(&self) -> bool {
        self.is_container()
    }

    pub fn has_action_script(&self) -> bool {
        matches!(self, ObjectKind::ActiveItem)
    }
}

bitflags! {
    /// Drapeaux d'un objet CDS.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        const RESTRICTED           = 0x0000_0001;
        const SEARCHABLE           = 0x0000_0002;
        const USE_RESOURCE_REF     = 0x0000_0004;
        const PERSISTENT_CONTAINER = 0x0000_0008;
        const PLAYLIST_REF         = 0x0000_0010;
        const PROXY_URL            = 0x0000_0020;
        const ONLINE_SERVICE       = 0x0000_0040;
        const OGG_THEORA           = 0x0000_0080;
        const PLAYED               = 0x0000_0200;
    }
}

impl Default for ObjectFlags {
    fn default() -> Self {
        ObjectFlags::RESTRICTED
    }
}

// sérialisé comme simple masque de bits
impl Serialize for ObjectFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for ObjectFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ObjectFlags::from_bits_truncate(u32::deserialize(
            deserializer,
        )?))
    }
}

/// Erreur de validation d'un objet.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("object has no title")]
    MissingTitle,

    #[error("object has no upnp class")]
    MissingClass,

    #[error("item {0:?} has no location")]
    MissingLocation(ObjectKind),

    #[error("container cannot reference another object (ref id {0})")]
    ContainerWithRef(ObjectId),
}

/// Un nœud de l'arbre du Content Directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdsObject {
    /// Identifiant attribué par la base, [`INVALID_OBJECT_ID`] avant insertion.
    pub id: ObjectId,
    /// Identifiant du container parent.
    pub parent_id: ObjectId,
    /// Pour une copie virtuelle, identifiant de l'objet physique référencé.
    pub ref_id: ObjectId,
    pub kind: ObjectKind,
    pub title: String,
    pub upnp_class: String,
    /// Chemin absolu sur disque, ou URL pour les items externes.
    pub location: String,
    /// Date de dernière modification (secondes Unix), 0 si inconnue.
    pub mtime: i64,
    /// Taille sur disque en octets (items physiques uniquement).
    pub size_on_disk: u64,
    pub flags: ObjectFlags,
    /// Objet virtuel (créé par le layout, sans fichier propre).
    pub virt: bool,
    pub mimetype: Option<String>,
    /// Identifiant de service en ligne, préfixé par la lettre du service.
    pub service_id: Option<String>,
    pub metadata: Dictionary<MetadataKey>,
    pub auxdata: Dictionary<String>,
    pub resources: Vec<Resource>,
    /// Script d'action (items actifs uniquement).
    pub action: Option<String>,
    /// Etat courant du script d'action.
    pub state: Option<String>,
}

impl CdsObject {
    fn empty(kind: ObjectKind) -> Self {
        Self {
            id: INVALID_OBJECT_ID,
            parent_id: INVALID_OBJECT_ID,
            ref_id: 0,
            kind,
            title: String::new(),
            upnp_class: String::new(),
            location: String::new(),
            mtime: 0,
            size_on_disk: 0,
            flags: ObjectFlags::default(),
            virt: false,
            mimetype: None,
            service_id: None,
            metadata: Dictionary::new(),
            auxdata: Dictionary::new(),
            resources: Vec::new(),
            action: None,
            state: None,
        }
    }

    /// Crée un container avec le titre donné.
    pub fn container(title: impl Into<String>) -> Self {
        let mut obj = Self::empty(ObjectKind::Container);
        obj.title = title.into();
        obj.upnp_class = upnp_class::CONTAINER.to_string();
        obj
    }

    /// Crée un item physique.
    pub fn item(title: impl Into<String>) -> Self {
        let mut obj = Self::empty(ObjectKind::Item);
        obj.title = title.into();
        obj.upnp_class = upnp_class::ITEM.to_string();
        obj
    }

    /// Crée un item pointant vers une URL externe.
    pub fn external_url_item(title: impl Into<String>, url: impl Into<String>) -> Self {
        let mut obj = Self::empty(ObjectKind::ExternalUrlItem);
        obj.title = title.into();
        obj.location = url.into();
        obj.upnp_class = upnp_class::ITEM.to_string();
        obj
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    pub fn is_item(&self) -> bool {
        self.kind.is_item()
    }

    pub fn is_virtual(&self) -> bool {
        self.virt
    }

    pub fn get_flag(&self, flag: ObjectFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: ObjectFlags, value: bool) {
        self.flags.set(flag, value);
    }

    /// Le chemin disque de l'objet. Vide pour les items URL.
    pub fn fs_path(&self) -> &Path {
        Path::new(&self.location)
    }

    pub fn metadata_value(&self, key: MetadataKey) -> Option<&str> {
        self.metadata.get(&key)
    }

    pub fn set_metadata(&mut self, key: MetadataKey, value: impl Into<String>) {
        self.metadata.set(key, value);
    }

    pub fn aux_value(&self, key: &str) -> Option<&str> {
        self.auxdata.get(&key.to_string())
    }

    pub fn set_aux(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.auxdata.set(key.into(), value);
    }

    /// La ressource jouable principale, si l'objet en a une.
    pub fn primary_resource(&self) -> Option<&Resource> {
        self.resources.first()
    }

    /// Vérifie les invariants structurels de l'objet.
    pub fn validate(&self) -> Result<(), ObjectError> {
        if self.title.is_empty() {
            return Err(ObjectError::MissingTitle);
        }
        if self.upnp_class.is_empty() {
            return Err(ObjectError::MissingClass);
        }
        if self.kind.is_container() && self.ref_id != 0 {
            return Err(ObjectError::ContainerWithRef(self.ref_id));
        }
        if self.kind.has_location() && !self.kind.is_container() && self.location.is_empty() {
            return Err(ObjectError::MissingLocation(self.kind));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_never_references() {
        let mut cont = CdsObject::container("Albums");
        cont.ref_id = 7;
        assert!(matches!(
            cont.validate(),
            Err(ObjectError::ContainerWithRef(7))
        ));
    }

    #[test]
    fn item_requires_location() {
        let item = CdsObject::item("track");
        assert!(matches!(
            item.validate(),
            Err(ObjectError::MissingLocation(ObjectKind::Item))
        ));
    }

    #[test]
    fn flags_toggle() {
        let mut obj = CdsObject::container("x");
        assert!(obj.get_flag(ObjectFlags::RESTRICTED));
        obj.set_flag(ObjectFlags::PLAYED, true);
        assert!(obj.get_flag(ObjectFlags::PLAYED));
        obj.set_flag(ObjectFlags::PLAYED, false);
        assert!(!obj.get_flag(ObjectFlags::PLAYED));
    }

    #[test]
    fn valid_item() {
        let mut item = CdsObject::item("song.mp3");
        item.location = "/music/song.mp3".to_string();
        assert!(item.validate().is_ok());
    }
}
