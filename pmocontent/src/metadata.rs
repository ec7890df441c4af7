//! Extraction de métadonnées
//!
//! Le collaborateur [`MetadataExtractor`] remplit les métadonnées et les
//! ressources d'un item fraîchement créé. L'implémentation par défaut
//! ne lit pas le contenu des fichiers : elle pose la date à partir du
//! mtime et fabrique la ressource principale à partir du type MIME et
//! de la taille, les extracteurs taglib/exiv2/ffmpeg étant des greffons
//! externes.

use pmocds::{CdsObject, MetadataKey, Resource, ResourceAttribute, ResourceHandler};

/// Remplisseur de métadonnées d'items.
pub trait MetadataExtractor: Send + Sync {
    fn fill_metadata(&self, item: &mut CdsObject);
}

/// Extracteur minimal sans lecture du contenu.
#[derive(Debug, Default)]
pub struct DefaultMetadataExtractor;

impl MetadataExtractor for DefaultMetadataExtractor {
    fn fill_metadata(&self, item: &mut CdsObject) {
        if item.metadata_value(MetadataKey::Title).is_none() {
            item.set_metadata(MetadataKey::Title, item.title.clone());
        }
        if item.mtime > 0 && item.metadata_value(MetadataKey::Date).is_none() {
            if let Some(date) = chrono::DateTime::from_timestamp(item.mtime, 0) {
                item.set_metadata(MetadataKey::Date, date.format("%Y-%m-%d").to_string());
            }
        }

        if item.primary_resource().is_none() {
            let mut resource = Resource::new(ResourceHandler::Default);
            let mime = item.mimetype.as_deref().unwrap_or("application/octet-stream");
            resource.set_attribute(
                ResourceAttribute::ProtocolInfo,
                format!("http-get:*:{mime}:*"),
            );
            if item.size_on_disk > 0 {
                resource.set_attribute(ResourceAttribute::Size, item.size_on_disk.to_string());
            }
            item.resources.push(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_extractor_builds_primary_resource() {
        let mut item = CdsObject::item("song.mp3");
        item.location = "/m/song.mp3".to_string();
        item.mimetype = Some("audio/mpeg".to_string());
        item.size_on_disk = 2048;
        item.mtime = 1_700_000_000;

        DefaultMetadataExtractor.fill_metadata(&mut item);

        let res = item.primary_resource().unwrap();
        assert_eq!(
            res.attribute(ResourceAttribute::ProtocolInfo),
            Some("http-get:*:audio/mpeg:*")
        );
        assert_eq!(res.attribute(ResourceAttribute::Size), Some("2048"));
        assert!(item.metadata_value(MetadataKey::Date).unwrap().starts_with("2023"));

        // a second pass adds nothing
        DefaultMetadataExtractor.fill_metadata(&mut item);
        assert_eq!(item.resources.len(), 1);
    }
}
