//! Disposition virtuelle
//!
//! Le layout range chaque item physique importé dans les containers
//! virtuels de navigation (/Audio, /Video, /Photos). Il ne crée que des
//! copies : l'item physique reste seul porteur du fichier.

use crate::content::ContentManager;
use crate::error::Result;
use pmocds::{upnp_class, CdsObject, MetadataKey, ObjectId, INVALID_OBJECT_ID};
use std::path::Path;
use tracing::debug;

/// Collaborateur de rangement des items importés.
pub trait Layout: Send + Sync {
    /// Crée les copies virtuelles de `obj` (fraîchement ajouté).
    ///
    /// `rootpath` est la racine d'importation (l'emplacement de
    /// l'autoscan pour un import automatique).
    fn process_cds_object(
        &self,
        content: &ContentManager,
        obj: &CdsObject,
        rootpath: &Path,
    ) -> Result<()>;
}

/// Layout intégré : Audio par artiste/album/genre/année, Vidéo par
/// répertoire, Photos par année.
#[derive(Debug, Default)]
pub struct BuiltinLayout;

impl BuiltinLayout {
    fn add_ref(content: &ContentManager, obj: &CdsObject, parent_id: ObjectId) -> Result<()> {
        let mut copy = obj.clone();
        copy.id = INVALID_OBJECT_ID;
        copy.parent_id = parent_id;
        copy.ref_id = obj.id;
        copy.virt = true;
        content.add_object(&mut copy)?;
        Ok(())
    }

    fn chain_and_ref(
        content: &ContentManager,
        obj: &CdsObject,
        titles: &[&str],
        last_class: &str,
    ) -> Result<()> {
        let chain = pmocds::vpath::join(titles.iter().copied());
        let parent = content.add_container_chain(&chain, last_class)?;
        Self::add_ref(content, obj, parent)
    }

    fn add_audio(&self, content: &ContentManager, obj: &CdsObject) -> Result<()> {
        Self::chain_and_ref(content, obj, &["Audio", "All Audio"], "")?;

        let artist = obj.metadata_value(MetadataKey::Artist).unwrap_or("Unknown");
        let album = obj.metadata_value(MetadataKey::Album);

        match album {
            Some(album) => {
                Self::chain_and_ref(
                    content,
                    obj,
                    &["Audio", "Artists", artist, album],
                    upnp_class::MUSIC_ALBUM,
                )?;
                Self::chain_and_ref(
                    content,
                    obj,
                    &["Audio", "Albums", album],
                    upnp_class::MUSIC_ALBUM,
                )?;
            }
            None => {
                Self::chain_and_ref(content, obj, &["Audio", "Artists", artist, "All Songs"], "")?;
            }
        }

        if let Some(genre) = obj.metadata_value(MetadataKey::Genre) {
            Self::chain_and_ref(
                content,
                obj,
                &["Audio", "Genres", genre],
                upnp_class::MUSIC_GENRE,
            )?;
        }
        if let Some(year) = obj
            .metadata_value(MetadataKey::Date)
            .filter(|d| d.len() >= 4)
            .map(|d| &d[..4])
        {
            Self::chain_and_ref(content, obj, &["Audio", "Year", year], "")?;
        }
        Ok(())
    }

    fn add_video(
        &self,
        content: &ContentManager,
        obj: &CdsObject,
        rootpath: &Path,
    ) -> Result<()> {
        Self::chain_and_ref(content, obj, &["Video", "All Video"], "")?;

        // mirror the on-disk directory structure below the import root
        let relative = obj
            .fs_path()
            .parent()
            .and_then(|p| p.strip_prefix(rootpath).ok());
        if let Some(relative) = relative {
            let mut titles = vec!["Video", "Directories"];
            let components: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            if !components.is_empty() {
                titles.extend(components.iter().map(String::as_str));
                Self::chain_and_ref(content, obj, &titles, "")?;
            }
        }
        Ok(())
    }

    fn add_image(&self, content: &ContentManager, obj: &CdsObject) -> Result<()> {
        Self::chain_and_ref(content, obj, &["Photos", "All Photos"], "")?;
        if let Some(year) = obj
            .metadata_value(MetadataKey::Date)
            .filter(|d| d.len() >= 4)
            .map(|d| &d[..4])
        {
            Self::chain_and_ref(content, obj, &["Photos", "Year", year], "")?;
        }
        Ok(())
    }
}

impl Layout for BuiltinLayout {
    fn process_cds_object(
        &self,
        content: &ContentManager,
        obj: &CdsObject,
        rootpath: &Path,
    ) -> Result<()> {
        debug!(id = obj.id, class = obj.upnp_class, "layout pass");
        if upnp_class::is_subclass(&obj.upnp_class, upnp_class::AUDIO_ITEM) {
            self.add_audio(content, obj)
        } else if upnp_class::is_subclass(&obj.upnp_class, upnp_class::VIDEO_ITEM) {
            self.add_video(content, obj, rootpath)
        } else if upnp_class::is_subclass(&obj.upnp_class, upnp_class::IMAGE_ITEM) {
            self.add_image(content, obj)
        } else {
            debug!(class = obj.upnp_class, "no layout rule for class");
            Ok(())
        }
    }
}
