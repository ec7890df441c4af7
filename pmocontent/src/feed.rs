//! Service en ligne générique à base de flux XML
//!
//! Un flux expose un catalogue d'entrées ; chaque entrée devient un
//! item virtuel sous `/Online Services/<nom>`, estampillé du préfixe du
//! service et d'un horodatage de mise à jour qui alimente la purge.

use crate::clock::Clock;
use crate::content::ContentManager;
use crate::error::{ContentError, Result};
use crate::online::OnlineService;
use pmocds::{
    upnp_class, vpath, CdsObject, MetadataKey, ObjectFlags, Resource, ResourceAttribute,
    ResourceHandler, ONLINE_SERVICE_LAST_UPDATE,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Déclaration d'un flux dans la configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    /// Lettre de préfixe des identifiants du service.
    pub prefix: String,
    /// Période de rafraîchissement en secondes (0 : jamais).
    #[serde(default)]
    pub refresh: u64,
    /// Age de purge des items en secondes (0 : pas de purge).
    #[serde(default)]
    pub purge_after: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl FeedConfig {
    pub fn prefix_char(&self) -> char {
        self.prefix.chars().next().unwrap_or('X')
    }
}

// -- document XML du catalogue ----------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename = "catalogue")]
struct FeedDocument {
    #[serde(rename = "entry", default)]
    entries: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(rename = "@id")]
    id: String,
    title: String,
    url: String,
    #[serde(default)]
    mimetype: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(rename = "genre", default)]
    genres: Vec<String>,
    #[serde(rename = "actor", default)]
    actors: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

/// Service en ligne alimenté par un flux XML.
pub struct FeedService {
    config: FeedConfig,
    service_id: String,
    clock: Arc<dyn Clock>,
}

impl FeedService {
    pub fn new(config: FeedConfig, clock: Arc<dyn Clock>) -> Self {
        let service_id = format!("feed-{}", config.name.to_lowercase().replace(' ', "-"));
        Self {
            config,
            service_id,
            clock,
        }
    }

    fn fetch_document(&self) -> Result<String> {
        debug!(url = %self.config.url, "fetching feed catalogue");
        let mut response = ureq::get(self.config.url.as_str())
            .call()
            .map_err(|e| ContentError::other(format!("feed fetch failed: {e}")))?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|e| ContentError::other(format!("feed read failed: {e}")))
    }

    /// Applique un document de catalogue au Content Directory.
    ///
    /// Retourne `true` s'il reste des pages (jamais pour un flux plat).
    pub fn apply_document(&self, document: &str, content: &ContentManager) -> Result<bool> {
        let document: FeedDocument = quick_xml::de::from_str(document)
            .map_err(|e| ContentError::other(format!("feed parse failed: {e}")))?;
        let now = self.clock.now_unix();
        let prefix = self.config.prefix_char();

        // items already present for this service, by service id
        let mut known: HashMap<String, CdsObject> = HashMap::new();
        for id in content.database().get_service_object_ids(prefix)? {
            if let Ok(obj) = content.database().load_object(id) {
                if let Some(sid) = obj.service_id.clone() {
                    known.insert(sid, obj);
                }
            }
        }

        let chain = vpath::join(["Online Services", &self.config.name]);
        let parent_id = content.add_container_chain(&chain, "")?;

        let mut added = 0usize;
        for entry in &document.entries {
            let service_id = format!("{prefix}{}", entry.id);
            match known.remove(&service_id) {
                Some(mut obj) => {
                    // still in the catalogue: refresh its timestamp
                    obj.set_aux(ONLINE_SERVICE_LAST_UPDATE, now.to_string());
                    content.update_object(&obj, false)?;
                }
                None => {
                    let mut obj = self.build_item(entry, content, now);
                    obj.service_id = Some(service_id);
                    obj.parent_id = parent_id;
                    content.add_object(&mut obj)?;
                    added += 1;
                }
            }
        }
        if added > 0 {
            info!(
                service = %self.config.name,
                added, "online items imported from feed"
            );
        }
        Ok(false)
    }

    fn build_item(&self, entry: &FeedEntry, content: &ContentManager, now: i64) -> CdsObject {
        let mut obj = CdsObject::external_url_item(entry.title.clone(), entry.url.clone());
        obj.virt = true;
        obj.mimetype = entry.mimetype.clone();
        obj.set_flag(ObjectFlags::ONLINE_SERVICE, true);
        obj.upnp_class = entry
            .mimetype
            .as_deref()
            .and_then(|m| content.mimetype_to_upnpclass(m))
            .unwrap_or_else(|| upnp_class::ITEM.to_string());

        if let Some(artist) = &entry.artist {
            obj.set_metadata(MetadataKey::Artist, artist.clone());
        }
        if let Some(description) = &entry.description {
            obj.set_metadata(MetadataKey::Description, description.clone());
        }
        if let Some(date) = &entry.date {
            obj.set_metadata(MetadataKey::Date, date.clone());
        }
        // multi-valued tags are carried as one comma separated value
        if !entry.genres.is_empty() {
            obj.set_metadata(MetadataKey::Genre, entry.genres.join(", "));
        }
        if !entry.actors.is_empty() {
            obj.set_metadata(MetadataKey::Actor, entry.actors.join(", "));
        }
        obj.set_aux(ONLINE_SERVICE_LAST_UPDATE, now.to_string());

        let mut resource = Resource::new(ResourceHandler::ExternalUrl);
        let mime = entry.mimetype.as_deref().unwrap_or("application/octet-stream");
        resource.set_attribute(ResourceAttribute::ProtocolInfo, format!("http-get:*:{mime}:*"));
        resource.options.set("url".to_string(), entry.url.clone());
        obj.resources.push(resource);
        obj
    }
}

impl OnlineService for FeedService {
    fn service_name(&self) -> &str {
        &self.config.name
    }

    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn storage_prefix(&self) -> char {
        self.config.prefix_char()
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config.refresh)
    }

    fn item_purge_interval(&self) -> Duration {
        Duration::from_secs(self.config.purge_after)
    }

    fn refresh_service_data(&self, content: &ContentManager) -> Result<bool> {
        let document = match self.fetch_document() {
            Ok(document) => document,
            Err(e) => {
                warn!(service = %self.config.name, "feed refresh failed: {e}");
                return Err(e);
            }
        };
        self.apply_document(&document, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_parsing() {
        let xml = r#"
            <catalogue>
              <entry id="42">
                <title>Some Trailer</title>
                <url>http://cdn.example.com/42.mp4</url>
                <mimetype>video/mp4</mimetype>
                <genre>Action</genre>
                <genre>Drama</genre>
                <actor>A. Lead</actor>
                <actor>B. Support</actor>
                <date>2026-03-01</date>
              </entry>
            </catalogue>"#;
        let document: FeedDocument = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(document.entries.len(), 1);
        let entry = &document.entries[0];
        assert_eq!(entry.id, "42");
        assert_eq!(entry.genres, vec!["Action", "Drama"]);
        assert_eq!(entry.actors.len(), 2);
    }

    #[test]
    fn prefix_char_falls_back() {
        let config = FeedConfig {
            name: "X".into(),
            url: String::new(),
            prefix: String::new(),
            refresh: 0,
            purge_after: 0,
            enabled: true,
        };
        assert_eq!(config.prefix_char(), 'X');
    }
}
