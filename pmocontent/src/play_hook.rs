//! Marquage des items lus
//!
//! Quand la lecture d'un item démarre, le serveur peut marquer l'objet
//! comme lu : drapeau, préfixe de titre, et mise à jour CDS facultative
//! (certains renderers rechargent brutalement leur liste à chaque
//! notification, d'où l'option de suppression).

use crate::config_ext::MarkPlayedConfig;
use crate::content::ContentManager;
use crate::error::Result;
use pmocds::{ObjectFlags, ObjectId};
use tracing::debug;

/// Crochet de lecture.
pub struct PlayHook {
    config: MarkPlayedConfig,
}

impl PlayHook {
    pub fn new(config: MarkPlayedConfig) -> Self {
        Self { config }
    }

    /// Signale que la lecture de l'objet a démarré.
    pub fn trigger(&self, content: &ContentManager, object_id: ObjectId) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut obj = content.database().load_object(object_id)?;
        if obj.get_flag(ObjectFlags::PLAYED) {
            return Ok(());
        }

        // restrict marking to the configured content types
        if !self.config.content.is_empty() {
            let matches = obj
                .mimetype
                .as_deref()
                .map(|mime| {
                    let group = mime.split('/').next().unwrap_or("");
                    let ct = content.contenttype_for_mimetype(mime);
                    self.config
                        .content
                        .iter()
                        .any(|c| c == group || Some(c.as_str()) == ct.as_deref())
                })
                .unwrap_or(false);
            if !matches {
                return Ok(());
            }
        }

        debug!(id = object_id, "marking item as played");
        obj.set_flag(ObjectFlags::PLAYED, true);
        if !self.config.string.is_empty() && !obj.title.starts_with(&self.config.string) {
            obj.title = format!("{}{}", self.config.string, obj.title);
        }
        content.update_object(&obj, !self.config.suppress_cds_updates)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Context;
    use pmodatabase::{Database, MemoryDatabase};
    use std::sync::Arc;

    fn content() -> (tempfile::TempDir, Arc<ContentManager>) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(
            pmoconfig::Config::load_config(dir.path().to_str().unwrap()).unwrap(),
        );
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        (dir, ContentManager::new(Context::new(config, database)))
    }

    fn hook(enabled: bool) -> PlayHook {
        PlayHook::new(MarkPlayedConfig {
            enabled,
            string: "* ".to_string(),
            suppress_cds_updates: true,
            content: vec!["video".to_string()],
        })
    }

    fn add_video(content: &ContentManager) -> ObjectId {
        let mut obj = pmocds::CdsObject::item("movie.mp4");
        obj.location = "/m/movie.mp4".to_string();
        obj.mimetype = Some("video/mp4".to_string());
        obj.parent_id = pmocds::PC_DIRECTORY_ID;
        content.database().add_object(&mut obj).unwrap();
        obj.id
    }

    #[test]
    fn played_items_are_flagged_and_prefixed_once() {
        let (_dir, content) = content();
        let id = add_video(&content);
        let hook = hook(true);

        hook.trigger(&content, id).unwrap();
        let obj = content.database().load_object(id).unwrap();
        assert!(obj.get_flag(ObjectFlags::PLAYED));
        assert_eq!(obj.title, "* movie.mp4");

        // a second playback changes nothing
        hook.trigger(&content, id).unwrap();
        let obj = content.database().load_object(id).unwrap();
        assert_eq!(obj.title, "* movie.mp4");
    }

    #[test]
    fn disabled_hook_is_inert() {
        let (_dir, content) = content();
        let id = add_video(&content);
        hook(false).trigger(&content, id).unwrap();
        let obj = content.database().load_object(id).unwrap();
        assert!(!obj.get_flag(ObjectFlags::PLAYED));
    }

    #[test]
    fn content_filter_limits_marking() {
        let (_dir, content) = content();
        let mut obj = pmocds::CdsObject::item("song.mp3");
        obj.location = "/m/song.mp3".to_string();
        obj.mimetype = Some("audio/mpeg".to_string());
        obj.parent_id = pmocds::PC_DIRECTORY_ID;
        content.database().add_object(&mut obj).unwrap();

        // only video content is configured for marking
        hook(true).trigger(&content, obj.id).unwrap();
        let reloaded = content.database().load_object(obj.id).unwrap();
        assert!(!reloaded.get_flag(ObjectFlags::PLAYED));
    }
}
