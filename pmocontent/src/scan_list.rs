//! Ensemble des autoscans d'un mode
//!
//! Attribue les identifiants de scan (avec recyclage des emplacements
//! libérés) et retrouve un enregistrement par identifiant, chemin ou
//! container lié.

use crate::error::{ContentError, Result};
use pmocds::autoscan::{AutoscanDirectory, ScanId, ScanMode};
use pmocds::ObjectId;
use std::path::Path;
use std::sync::Arc;

/// Liste des autoscans d'un mode donné.
#[derive(Debug)]
pub struct AutoscanList {
    mode: ScanMode,
    slots: Vec<Option<Arc<AutoscanDirectory>>>,
}

impl AutoscanList {
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            slots: Vec::new(),
        }
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Ajoute un enregistrement et lui attribue son identifiant de scan.
    pub fn add(&mut self, adir: Arc<AutoscanDirectory>) -> Result<ScanId> {
        if adir.scan_mode() != self.mode {
            return Err(ContentError::InvalidArgument(format!(
                "autoscan mode mismatch for {}",
                adir.location().display()
            )));
        }
        if self.get_by_location(adir.location()).is_some() {
            return Err(ContentError::Conflict(format!(
                "duplicate autoscan location {}",
                adir.location().display()
            )));
        }
        let slot = self.slots.iter().position(Option::is_none);
        let scan_id = match slot {
            Some(index) => {
                self.slots[index] = Some(Arc::clone(&adir));
                index as ScanId
            }
            None => {
                self.slots.push(Some(Arc::clone(&adir)));
                (self.slots.len() - 1) as ScanId
            }
        };
        adir.set_scan_id(scan_id);
        Ok(scan_id)
    }

    pub fn get(&self, scan_id: ScanId) -> Option<Arc<AutoscanDirectory>> {
        if scan_id < 0 {
            return None;
        }
        self.slots.get(scan_id as usize)?.clone()
    }

    pub fn get_by_location(&self, location: &Path) -> Option<Arc<AutoscanDirectory>> {
        self.iter().find(|a| a.location() == location)
    }

    pub fn get_by_object_id(&self, object_id: ObjectId) -> Option<Arc<AutoscanDirectory>> {
        self.iter().find(|a| a.object_id() == object_id)
    }

    /// Retire un enregistrement ; celui-ci est invalidé, ce qui stoppe
    /// les balayages en vol au prochain point de contrôle.
    pub fn remove(&mut self, scan_id: ScanId) -> Option<Arc<AutoscanDirectory>> {
        if scan_id < 0 {
            return None;
        }
        let removed = self.slots.get_mut(scan_id as usize)?.take()?;
        removed.invalidate();
        Some(removed)
    }

    /// Retire tous les enregistrements situés sous `path`.
    ///
    /// Retourne les enregistrements invalidés, accompagnés de
    /// l'identifiant de scan qu'ils portaient encore (nécessaire pour
    /// désabonner leur timer).
    pub fn remove_if_subdir(&mut self, path: &Path) -> Vec<(ScanId, Arc<AutoscanDirectory>)> {
        let mut removed = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(adir) = slot {
                if adir.location().starts_with(path) {
                    let scan_id = adir.scan_id();
                    adir.invalidate();
                    removed.push((scan_id, slot.take().unwrap()));
                }
            }
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<AutoscanDirectory>> + '_ {
        self.slots.iter().filter_map(|s| s.clone())
    }

    pub fn all(&self) -> Vec<Arc<AutoscanDirectory>> {
        self.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adir(path: &str) -> Arc<AutoscanDirectory> {
        Arc::new(AutoscanDirectory::new(path, ScanMode::Timed))
    }

    #[test]
    fn scan_ids_are_recycled() {
        let mut list = AutoscanList::new(ScanMode::Timed);
        let a = list.add(adir("/a")).unwrap();
        let b = list.add(adir("/b")).unwrap();
        assert_ne!(a, b);
        let removed = list.remove(a).unwrap();
        assert!(!removed.is_valid());
        let c = list.add(adir("/c")).unwrap();
        assert_eq!(c, a, "freed slot must be reused");
    }

    #[test]
    fn duplicate_location_conflicts() {
        let mut list = AutoscanList::new(ScanMode::Timed);
        list.add(adir("/a")).unwrap();
        assert!(matches!(
            list.add(adir("/a")),
            Err(ContentError::Conflict(_))
        ));
    }

    #[test]
    fn remove_if_subdir_takes_nested_entries() {
        let mut list = AutoscanList::new(ScanMode::Timed);
        let first = list.add(adir("/media/music")).unwrap();
        list.add(adir("/media/music/incoming")).unwrap();
        list.add(adir("/other")).unwrap();
        let removed = list.remove_if_subdir(Path::new("/media/music"));
        assert_eq!(removed.len(), 2);
        assert_eq!(list.len(), 1);
        assert!(removed.iter().all(|(_, a)| !a.is_valid()));
        // the ids carried out are the pre-invalidation ones
        assert!(removed.iter().any(|(id, _)| *id == first));
    }
}
