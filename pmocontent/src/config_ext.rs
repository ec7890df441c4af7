//! Extension pour intégrer l'importation dans pmoconfig
//!
//! Ce module fournit le trait `ImportConfigExt` qui expose à
//! `pmoconfig::Config` les options consommées par le cœur
//! d'importation : politique des fichiers cachés, listes d'autoscan,
//! mappings de types MIME, réglages par répertoire, services en ligne.

use crate::feed::FeedConfig;
use pmocds::autoscan::{AutoscanDirectory, MediaType, ScanLevel, ScanMode};
use pmocds::tweak::{DirectoryTweak, DirectoryTweakList};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Mode d'importation lors de la réécriture d'un fichier déjà indexé.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// L'objet existant est supprimé puis le fichier réimporté.
    MediaTomb,
    /// L'objet existant est conservé et mis à jour.
    Gerbera,
}

fn default_true() -> bool {
    true
}

/// Entrée d'autoscan telle que déclarée dans le YAML.
#[derive(Debug, Deserialize)]
struct AutoscanEntry {
    location: PathBuf,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    hidden: bool,
    #[serde(default = "default_true")]
    follow_symlinks: bool,
    #[serde(default)]
    scan_level: Option<String>,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_true")]
    persistent: bool,
}

impl AutoscanEntry {
    fn build(&self, mode: ScanMode) -> Arc<AutoscanDirectory> {
        let level = self
            .scan_level
            .as_deref()
            .and_then(ScanLevel::parse)
            .unwrap_or(ScanLevel::Full);
        let mut adir = AutoscanDirectory::new(self.location.clone(), mode)
            .with_scan_level(level)
            .with_recursive(self.recursive)
            .with_hidden(self.hidden)
            .with_follow_symlinks(self.follow_symlinks)
            .with_retry_count(self.retry_count)
            .with_persistent(self.persistent)
            .with_media_type(MediaType::ANY);
        if let Some(secs) = self.interval {
            adir = adir.with_interval(Duration::from_secs(secs.max(1)));
        }
        Arc::new(adir)
    }
}

/// Options du marquage des items lus.
#[derive(Debug, Clone)]
pub struct MarkPlayedConfig {
    pub enabled: bool,
    pub string: String,
    pub suppress_cds_updates: bool,
    pub content: Vec<String>,
}

/// Trait d'extension exposant les options d'importation.
pub trait ImportConfigExt {
    /// Importer les fichiers et répertoires cachés ?
    fn get_import_hidden_files(&self) -> bool;

    /// Suivre les liens symboliques pendant les parcours ?
    fn get_import_follow_symlinks(&self) -> bool;

    /// Utiliser inotify pour les autoscans qui le demandent ?
    fn get_autoscan_use_inotify(&self) -> bool;

    /// Mode d'importation (mediatomb ou gerbera).
    fn get_import_layout_mode(&self) -> ImportMode;

    /// Fichier magic configuré (la détection par contenu est désactivée
    /// dans cette construction, la valeur n'est que rapportée).
    fn get_magic_file(&self) -> Option<PathBuf>;

    /// Autoscans périodiques déclarés dans la configuration.
    fn get_autoscan_timed_list(&self) -> Vec<Arc<AutoscanDirectory>>;

    /// Autoscans inotify déclarés dans la configuration.
    fn get_autoscan_inotify_list(&self) -> Vec<Arc<AutoscanDirectory>>;

    /// Mapping extension -> type MIME (clés en minuscules).
    fn get_extension_mimetype_map(&self) -> HashMap<String, String>;

    /// Mapping type MIME -> classe UPnP (supporte les entrées `type/*`).
    fn get_mimetype_upnpclass_map(&self) -> HashMap<String, String>;

    /// Mapping type MIME -> content type interne (playlist, ogg...).
    fn get_mimetype_contenttype_map(&self) -> HashMap<String, String>;

    /// Réglages par répertoire.
    fn get_directory_tweaks(&self) -> DirectoryTweakList;

    /// Options de marquage des items lus.
    fn get_mark_played_config(&self) -> MarkPlayedConfig;

    /// Services en ligne de type flux XML déclarés dans la configuration.
    fn get_online_feeds(&self) -> Vec<FeedConfig>;
}

fn string_map(value: serde_yaml::Value) -> HashMap<String, String> {
    serde_yaml::from_value::<HashMap<String, String>>(value).unwrap_or_default()
}

impl ImportConfigExt for pmoconfig::Config {
    fn get_import_hidden_files(&self) -> bool {
        self.get_bool_or(&["import", "hidden_files"], false)
    }

    fn get_import_follow_symlinks(&self) -> bool {
        self.get_bool_or(&["import", "follow_symlinks"], true)
    }

    fn get_autoscan_use_inotify(&self) -> bool {
        self.get_bool_or(&["import", "autoscan", "use_inotify"], true)
    }

    fn get_import_layout_mode(&self) -> ImportMode {
        match self
            .get_string_or(&["import", "layout_mode"], "mediatomb")
            .to_lowercase()
            .as_str()
        {
            "gerbera" => ImportMode::Gerbera,
            "mediatomb" => ImportMode::MediaTomb,
            other => {
                warn!(mode = other, "Unknown import layout mode, using mediatomb");
                ImportMode::MediaTomb
            }
        }
    }

    fn get_magic_file(&self) -> Option<PathBuf> {
        let file = self.get_string_or(&["import", "magic_file"], "");
        if file.is_empty() {
            None
        } else {
            Some(PathBuf::from(file))
        }
    }

    fn get_autoscan_timed_list(&self) -> Vec<Arc<AutoscanDirectory>> {
        autoscan_list(self, "timed", ScanMode::Timed)
    }

    fn get_autoscan_inotify_list(&self) -> Vec<Arc<AutoscanDirectory>> {
        autoscan_list(self, "inotify", ScanMode::INotify)
    }

    fn get_extension_mimetype_map(&self) -> HashMap<String, String> {
        let Ok(value) = self.get_value(&["import", "mappings", "extension_mimetype"]) else {
            return HashMap::new();
        };
        string_map(value)
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect()
    }

    fn get_mimetype_upnpclass_map(&self) -> HashMap<String, String> {
        let Ok(value) = self.get_value(&["import", "mappings", "mimetype_upnpclass"]) else {
            return HashMap::new();
        };
        string_map(value)
    }

    fn get_mimetype_contenttype_map(&self) -> HashMap<String, String> {
        let Ok(value) = self.get_value(&["import", "mappings", "mimetype_contenttype"]) else {
            return HashMap::new();
        };
        string_map(value)
    }

    fn get_directory_tweaks(&self) -> DirectoryTweakList {
        let Ok(value) = self.get_value(&["import", "directory_tweaks"]) else {
            return DirectoryTweakList::default();
        };
        match serde_yaml::from_value::<Vec<DirectoryTweak>>(value) {
            Ok(tweaks) => DirectoryTweakList::new(tweaks),
            Err(e) => {
                warn!("Ignoring malformed directory tweaks: {e}");
                DirectoryTweakList::default()
            }
        }
    }

    fn get_mark_played_config(&self) -> MarkPlayedConfig {
        let base = ["server", "ui", "mark_played_items"];
        let content = self
            .get_value(&[base[0], base[1], base[2], "content"])
            .ok()
            .and_then(|v| serde_yaml::from_value::<Vec<String>>(v).ok())
            .unwrap_or_default();
        MarkPlayedConfig {
            enabled: self.get_bool_or(&[base[0], base[1], base[2], "enabled"], false),
            string: self.get_string_or(&[base[0], base[1], base[2], "string"], "* "),
            suppress_cds_updates: self
                .get_bool_or(&[base[0], base[1], base[2], "suppress_cds_updates"], true),
            content,
        }
    }

    fn get_online_feeds(&self) -> Vec<FeedConfig> {
        let Ok(value) = self.get_value(&["online_content", "feeds"]) else {
            return Vec::new();
        };
        match serde_yaml::from_value::<Vec<FeedConfig>>(value) {
            Ok(feeds) => feeds.into_iter().filter(|f| f.enabled).collect(),
            Err(e) => {
                warn!("Ignoring malformed online feed list: {e}");
                Vec::new()
            }
        }
    }
}

fn autoscan_list(
    config: &pmoconfig::Config,
    key: &str,
    mode: ScanMode,
) -> Vec<Arc<AutoscanDirectory>> {
    let Ok(value) = config.get_value(&["import", "autoscan", key]) else {
        return Vec::new();
    };
    match serde_yaml::from_value::<Vec<AutoscanEntry>>(value) {
        Ok(entries) => entries.iter().map(|e| e.build(mode)).collect(),
        Err(e) => {
            warn!(list = key, "Ignoring malformed autoscan list: {e}");
            Vec::new()
        }
    }
}
