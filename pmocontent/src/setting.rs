//! Réglages effectifs d'une opération d'import
//!
//! Une opération d'import (événement inotify, balayage, ajout manuel)
//! part des réglages de son autoscan ou des valeurs globales, puis les
//! affine avec les réglages par répertoire de la configuration.

use pmocds::autoscan::AutoscanDirectory;
use pmocds::tweak::DirectoryTweakList;
use std::path::Path;
use std::sync::Arc;

/// Réglages effectifs pour un chemin donné.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub adir: Option<Arc<AutoscanDirectory>>,
    pub recursive: bool,
    pub hidden: bool,
    pub follow_symlinks: bool,
}

impl ScanSettings {
    /// Réglages issus d'un autoscan, ou des valeurs globales à défaut.
    pub fn from_autoscan(
        adir: Option<Arc<AutoscanDirectory>>,
        default_hidden: bool,
        default_follow_symlinks: bool,
    ) -> Self {
        match adir {
            Some(adir) => Self {
                recursive: adir.recursive(),
                hidden: adir.hidden(),
                follow_symlinks: adir.follow_symlinks(),
                adir: Some(adir),
            },
            None => Self {
                adir: None,
                recursive: false,
                hidden: default_hidden,
                follow_symlinks: default_follow_symlinks,
            },
        }
    }

    /// Applique le réglage par répertoire le plus spécifique pour `path`.
    pub fn merge_tweaks(&mut self, tweaks: &DirectoryTweakList, path: &Path) {
        let Some(tweak) = tweaks.find(path) else {
            return;
        };
        if let Some(recursive) = tweak.recursive {
            self.recursive = recursive;
        }
        if let Some(hidden) = tweak.hidden {
            self.hidden = hidden;
        }
        if let Some(follow) = tweak.follow_symlinks {
            self.follow_symlinks = follow;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmocds::tweak::DirectoryTweak;

    #[test]
    fn tweak_overrides_autoscan_policy() {
        let mut settings = ScanSettings::from_autoscan(None, false, true);
        let mut tweak = DirectoryTweak::new("/media/hidden");
        tweak.inherit = true;
        tweak.hidden = Some(true);
        let tweaks = DirectoryTweakList::new(vec![tweak]);

        settings.merge_tweaks(&tweaks, Path::new("/media/hidden/sub"));
        assert!(settings.hidden);
        assert!(settings.follow_symlinks);

        let mut other = ScanSettings::from_autoscan(None, false, true);
        other.merge_tweaks(&tweaks, Path::new("/media/visible"));
        assert!(!other.hidden);
    }
}
