//! Base de données en mémoire
//!
//! Implémentation de [`Database`] sur de simples maps en mémoire. Elle
//! sert de doublure dans les tests du cœur d'importation et de solution
//! de repli quand aucun fichier SQLite n'est configuré. La sémantique
//! (cascade, unicité des chemins, chaînes de containers) est strictement
//! celle de [`crate::SqliteDatabase`].

use crate::removal::{plan_removal, ObjRow};
use crate::{ChangedContainers, Database, DatabaseError, FileType, Result};
use pmocds::autoscan::{AutoscanDirectory, AutoscanRecord, ScanMode};
use pmocds::{vpath, CdsObject, ObjectId, INVALID_OBJECT_ID, PC_DIRECTORY_ID, ROOT_ID};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectId, CdsObject>,
    next_id: ObjectId,
    autoscan: Vec<AutoscanRecord>,
    next_storage_id: i64,
}

/// Base en mémoire, thread-safe.
#[derive(Debug)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        let mut inner = Inner {
            next_id: PC_DIRECTORY_ID + 1,
            next_storage_id: 1,
            ..Default::default()
        };

        let mut root = CdsObject::container("Root");
        root.id = ROOT_ID;
        root.parent_id = INVALID_OBJECT_ID;
        root.virt = true;
        inner.objects.insert(ROOT_ID, root);

        let mut pc = CdsObject::container("PC Directory");
        pc.id = PC_DIRECTORY_ID;
        pc.parent_id = ROOT_ID;
        pc.location = "/".to_string();
        inner.objects.insert(PC_DIRECTORY_ID, pc);

        Self {
            inner: Mutex::new(inner),
        }
    }

    fn rows(inner: &Inner) -> Vec<ObjRow> {
        inner
            .objects
            .values()
            .map(|o| ObjRow {
                id: o.id,
                parent_id: o.parent_id,
                ref_id: o.ref_id,
                is_container: o.is_container(),
            })
            .collect()
    }

    fn remove_ids(&self, roots: &[ObjectId], all: bool) -> Result<ChangedContainers> {
        let mut inner = self.inner.lock().unwrap();
        for id in roots {
            if pmocds::is_forbidden_id(*id) {
                return Err(DatabaseError::Invalid(format!(
                    "cannot remove reserved object {id}"
                )));
            }
        }
        let plan = plan_removal(&Self::rows(&inner), roots, all);
        for id in &plan.removed {
            inner.objects.remove(id);
        }
        Ok(plan.changed)
    }

    fn matches(obj: &CdsObject, file_type: FileType) -> bool {
        match file_type {
            FileType::Any => true,
            FileType::File => obj.is_item(),
            FileType::Directory => obj.is_container(),
        }
    }

    fn find_child_container(
        inner: &Inner,
        parent_id: ObjectId,
        title: &str,
        virt: bool,
    ) -> Option<ObjectId> {
        inner
            .objects
            .values()
            .find(|o| {
                o.parent_id == parent_id && o.is_container() && o.virt == virt && o.title == title
            })
            .map(|o| o.id)
    }

    fn insert(inner: &mut Inner, mut obj: CdsObject) -> ObjectId {
        let id = inner.next_id;
        inner.next_id += 1;
        obj.id = id;
        inner.objects.insert(id, obj);
        id
    }
}

impl Database for MemoryDatabase {
    fn find_object_by_path(&self, path: &Path, file_type: FileType) -> Result<Option<CdsObject>> {
        let location = normalize(path);
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .objects
            .values()
            .find(|o| !o.virt && o.location == location && Self::matches(o, file_type))
            .cloned())
    }

    fn load_object(&self, id: ObjectId) -> Result<CdsObject> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&id)
            .cloned()
            .ok_or(DatabaseError::NotFound(id))
    }

    fn add_object(&self, obj: &mut CdsObject) -> Result<()> {
        obj.validate()
            .map_err(|e| DatabaseError::Invalid(e.to_string()))?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.objects.contains_key(&obj.parent_id) {
            return Err(DatabaseError::Invalid(format!(
                "parent {} does not exist",
                obj.parent_id
            )));
        }
        if !obj.virt && !obj.location.is_empty() {
            let duplicate = inner
                .objects
                .values()
                .any(|o| !o.virt && o.location == obj.location);
            if duplicate {
                return Err(DatabaseError::Conflict(format!(
                    "location already indexed: {}",
                    obj.location
                )));
            }
        }
        if obj.ref_id != 0 && !inner.objects.contains_key(&obj.ref_id) {
            return Err(DatabaseError::Invalid(format!(
                "referenced object {} does not exist",
                obj.ref_id
            )));
        }
        obj.id = Self::insert(&mut inner, obj.clone());
        Ok(())
    }

    fn update_object(&self, obj: &CdsObject) -> Result<()> {
        obj.validate()
            .map_err(|e| DatabaseError::Invalid(e.to_string()))?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.objects.contains_key(&obj.id) {
            return Err(DatabaseError::NotFound(obj.id));
        }
        inner.objects.insert(obj.id, obj.clone());
        Ok(())
    }

    fn remove_object(&self, id: ObjectId, all: bool) -> Result<ChangedContainers> {
        self.remove_ids(&[id], all)
    }

    fn remove_objects(&self, ids: &[ObjectId]) -> Result<ChangedContainers> {
        if ids.is_empty() {
            return Ok(ChangedContainers::default());
        }
        self.remove_ids(ids, false)
    }

    fn get_objects(&self, parent_id: ObjectId, direct_only: bool) -> Result<HashSet<ObjectId>> {
        let inner = self.inner.lock().unwrap();
        let mut out: HashSet<ObjectId> = HashSet::new();
        let mut frontier = vec![parent_id];
        while let Some(parent) = frontier.pop() {
            for obj in inner.objects.values().filter(|o| o.parent_id == parent) {
                if out.insert(obj.id) && !direct_only && obj.is_container() {
                    frontier.push(obj.id);
                }
            }
            if direct_only {
                break;
            }
        }
        Ok(out)
    }

    fn get_child_count(&self, parent_id: ObjectId) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .objects
            .values()
            .filter(|o| o.parent_id == parent_id)
            .count())
    }

    fn ensure_path_existence(&self, path: &Path) -> Result<(ObjectId, Option<ObjectId>)> {
        let mut inner = self.inner.lock().unwrap();
        let mut parent = PC_DIRECTORY_ID;
        let mut first_new = None;
        let mut accumulated = PathBuf::from("/");
        for component in Path::new(&normalize(path)).components() {
            let std::path::Component::Normal(name) = component else {
                continue;
            };
            accumulated.push(name);
            let location = accumulated.to_string_lossy().to_string();
            let existing = inner
                .objects
                .values()
                .find(|o| !o.virt && o.is_container() && o.location == location)
                .map(|o| o.id);
            parent = match existing {
                Some(id) => id,
                None => {
                    let mut cont = CdsObject::container(name.to_string_lossy());
                    cont.parent_id = parent;
                    cont.location = location;
                    let id = Self::insert(&mut inner, cont);
                    first_new.get_or_insert(id);
                    id
                }
            };
        }
        Ok((parent, first_new))
    }

    fn add_container_chain(
        &self,
        chain: &str,
        last_class: &str,
        last_ref_id: ObjectId,
    ) -> Result<(ObjectId, Option<ObjectId>)> {
        let titles = vpath::split(chain);
        if titles.is_empty() {
            return Err(DatabaseError::Invalid("empty container chain".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        let mut parent = ROOT_ID;
        let mut first_new = None;
        let count = titles.len();
        for (i, title) in titles.iter().enumerate() {
            parent = match Self::find_child_container(&inner, parent, title, true) {
                Some(id) => id,
                None => {
                    let mut cont = CdsObject::container(title.clone());
                    cont.parent_id = parent;
                    cont.virt = true;
                    if i + 1 == count && !last_class.is_empty() {
                        cont.upnp_class = last_class.to_string();
                    }
                    if i + 1 == count && last_ref_id != 0 {
                        // containers never carry a ref id; keep the hint as auxdata
                        cont.set_aux("ref-item", last_ref_id.to_string());
                    }
                    let id = Self::insert(&mut inner, cont);
                    first_new.get_or_insert(id);
                    id
                }
            };
        }
        Ok((parent, first_new))
    }

    fn get_service_object_ids(&self, prefix: char) -> Result<Vec<ObjectId>> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<ObjectId> = inner
            .objects
            .values()
            .filter(|o| {
                o.service_id
                    .as_deref()
                    .map(|sid| sid.starts_with(prefix))
                    .unwrap_or(false)
            })
            .map(|o| o.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn get_total_files(&self) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .objects
            .values()
            .filter(|o| !o.virt && o.kind.is_pure_item())
            .count() as u64)
    }

    fn get_mime_types(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut mimes: Vec<String> = inner
            .objects
            .values()
            .filter_map(|o| o.mimetype.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        mimes.sort();
        Ok(mimes)
    }

    fn get_autoscan_list(&self, mode: ScanMode) -> Result<Vec<Arc<AutoscanDirectory>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .autoscan
            .iter()
            .filter(|r| r.scan_mode == mode)
            .map(|r| Arc::new(AutoscanDirectory::from_record(r)))
            .collect())
    }

    fn update_autoscan_list(&self, mode: ScanMode, list: &[Arc<AutoscanDirectory>]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.autoscan.retain(|r| r.scan_mode != mode);
        for adir in list {
            let mut record = adir.to_record();
            if record.storage_id <= 0 {
                record.storage_id = inner.next_storage_id;
                inner.next_storage_id += 1;
                adir.set_storage_id(record.storage_id);
            }
            inner.autoscan.push(record);
        }
        Ok(())
    }

    fn add_autoscan_directory(&self, adir: &AutoscanDirectory) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.autoscan.iter().any(|r| r.location == adir.location()) {
            return Err(DatabaseError::Conflict(format!(
                "autoscan already registered for {}",
                adir.location().display()
            )));
        }
        let storage_id = inner.next_storage_id;
        inner.next_storage_id += 1;
        adir.set_storage_id(storage_id);
        inner.autoscan.push(adir.to_record());
        Ok(storage_id)
    }

    fn update_autoscan_directory(&self, adir: &AutoscanDirectory) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let storage_id = adir.storage_id();
        match inner
            .autoscan
            .iter_mut()
            .find(|r| r.storage_id == storage_id)
        {
            Some(slot) => {
                *slot = adir.to_record();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(storage_id)),
        }
    }

    fn remove_autoscan_directory(&self, storage_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.autoscan.retain(|r| r.storage_id != storage_id);
        Ok(())
    }
}

/// Normalise un chemin disque en chaîne sans slash final.
pub(crate) fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
