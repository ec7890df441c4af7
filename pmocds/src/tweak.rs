//! Réglages par répertoire
//!
//! Un [`DirectoryTweak`] ajuste localement la politique d'importation
//! (fichiers cachés, récursivité, liens symboliques...) pour un
//! sous-arbre donné, indépendamment de l'autoscan qui le couvre.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Surcharges locales de la politique d'importation.
///
/// Seuls les champs renseignés (`Some`) surchargent la politique héritée.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryTweak {
    pub location: PathBuf,
    /// Le réglage s'applique-t-il aussi aux sous-répertoires ?
    #[serde(default)]
    pub inherit: bool,
    pub recursive: Option<bool>,
    pub hidden: Option<bool>,
    pub follow_symlinks: Option<bool>,
    pub case_sensitive: Option<bool>,
}

impl DirectoryTweak {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    /// Le réglage couvre-t-il le chemin donné ?
    pub fn applies_to(&self, path: &Path) -> bool {
        if self.inherit {
            path.starts_with(&self.location)
        } else {
            path == self.location || path.parent() == Some(self.location.as_path())
        }
    }
}

/// Liste ordonnée de réglages ; le réglage le plus profond gagne.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryTweakList {
    tweaks: Vec<DirectoryTweak>,
}

impl DirectoryTweakList {
    pub fn new(mut tweaks: Vec<DirectoryTweak>) -> Self {
        // deepest location first, so the first match is the most specific
        tweaks.sort_by(|a, b| {
            b.location
                .components()
                .count()
                .cmp(&a.location.components().count())
        });
        Self { tweaks }
    }

    pub fn is_empty(&self) -> bool {
        self.tweaks.is_empty()
    }

    /// Retourne le réglage le plus spécifique couvrant `path`.
    pub fn find(&self, path: &Path) -> Option<&DirectoryTweak> {
        self.tweaks.iter().find(|t| t.applies_to(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deepest_tweak_wins() {
        let mut shallow = DirectoryTweak::new("/media");
        shallow.inherit = true;
        shallow.hidden = Some(true);
        let mut deep = DirectoryTweak::new("/media/photos");
        deep.inherit = true;
        deep.hidden = Some(false);

        let list = DirectoryTweakList::new(vec![shallow, deep]);
        let tweak = list.find(Path::new("/media/photos/2024")).unwrap();
        assert_eq!(tweak.hidden, Some(false));
        let tweak = list.find(Path::new("/media/music")).unwrap();
        assert_eq!(tweak.hidden, Some(true));
    }

    #[test]
    fn non_inherit_only_covers_direct_children() {
        let tweak = DirectoryTweak::new("/media/photos");
        assert!(tweak.applies_to(Path::new("/media/photos")));
        assert!(tweak.applies_to(Path::new("/media/photos/img.jpg")));
        assert!(!tweak.applies_to(Path::new("/media/photos/2024/img.jpg")));
    }
}
