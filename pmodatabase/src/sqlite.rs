//! Base de données SQLite du Content Directory
//!
//! Implémentation de [`Database`] sur rusqlite. Les colonnes structurées
//! (métadonnées, auxdata, ressources) sont sérialisées en JSON ; les
//! identifiants sont les rowids SQLite, la racine et «PC Directory»
//! étant insérés avec leurs identifiants réservés à l'initialisation.

use crate::memory::normalize;
use crate::removal::{plan_removal, ObjRow};
use crate::{ChangedContainers, Database, DatabaseError, FileType, Result};
use pmocds::autoscan::{AutoscanDirectory, AutoscanRecord, MediaType, ScanLevel, ScanMode};
use pmocds::{
    vpath, CdsObject, Dictionary, MetadataKey, ObjectFlags, ObjectId, ObjectKind, Resource,
    INVALID_OBJECT_ID, PC_DIRECTORY_ID, ROOT_ID,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Base SQLite du Content Directory.
///
/// La connexion est protégée par un mutex : la base assure ainsi sa
/// propre sérialisation vis-à-vis des threads du cœur.
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Ouvre (et initialise si nécessaire) la base au chemin donné.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Base SQLite en mémoire, surtout utile pour les tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS objects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER NOT NULL,
                ref_id INTEGER NOT NULL DEFAULT 0,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                upnp_class TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                mtime INTEGER NOT NULL DEFAULT 0,
                size_on_disk INTEGER NOT NULL DEFAULT 0,
                flags INTEGER NOT NULL DEFAULT 0,
                virt INTEGER NOT NULL DEFAULT 0,
                mimetype TEXT,
                service_id TEXT,
                metadata TEXT NOT NULL DEFAULT '[]',
                auxdata TEXT NOT NULL DEFAULT '[]',
                resources TEXT NOT NULL DEFAULT '[]',
                action TEXT,
                state TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_objects_parent ON objects(parent_id);
            CREATE INDEX IF NOT EXISTS idx_objects_location ON objects(location);
            CREATE INDEX IF NOT EXISTS idx_objects_service ON objects(service_id);
            CREATE TABLE IF NOT EXISTS autoscan (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_mode TEXT NOT NULL,
                location TEXT NOT NULL UNIQUE,
                scan_level TEXT NOT NULL,
                recursive INTEGER NOT NULL DEFAULT 0,
                hidden INTEGER NOT NULL DEFAULT 0,
                follow_symlinks INTEGER NOT NULL DEFAULT 1,
                interval INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                persistent INTEGER NOT NULL DEFAULT 0,
                media_type INTEGER NOT NULL DEFAULT 7,
                object_id INTEGER NOT NULL DEFAULT -1,
                last_modified INTEGER NOT NULL DEFAULT 0
            );",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.seed_roots()?;
        Ok(db)
    }

    fn seed_roots(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM objects", [], |r| r.get(0))?;
        if count == 0 {
            debug!("Seeding root containers");
            conn.execute(
                "INSERT INTO objects (id, parent_id, kind, title, upnp_class, virt, flags)
                 VALUES (?1, ?2, 'container', 'Root', 'object.container', 1, ?3)",
                params![ROOT_ID, INVALID_OBJECT_ID, ObjectFlags::RESTRICTED.bits()],
            )?;
            conn.execute(
                "INSERT INTO objects (id, parent_id, kind, title, upnp_class, location, virt, flags)
                 VALUES (?1, ?2, 'container', 'PC Directory', 'object.container', '/', 0, ?3)",
                params![PC_DIRECTORY_ID, ROOT_ID, ObjectFlags::RESTRICTED.bits()],
            )?;
        }
        Ok(())
    }

    fn kind_to_str(kind: ObjectKind) -> &'static str {
        match kind {
            ObjectKind::Container => "container",
            ObjectKind::Item => "item",
            ObjectKind::ExternalUrlItem => "external_url",
            ObjectKind::InternalUrlItem => "internal_url",
            ObjectKind::ActiveItem => "active_item",
        }
    }

    fn kind_from_str(kind: &str) -> ObjectKind {
        match kind {
            "container" => ObjectKind::Container,
            "external_url" => ObjectKind::ExternalUrlItem,
            "internal_url" => ObjectKind::InternalUrlItem,
            "active_item" => ObjectKind::ActiveItem,
            _ => ObjectKind::Item,
        }
    }

    fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<CdsObject> {
        let kind: String = row.get("kind")?;
        let metadata: String = row.get("metadata")?;
        let auxdata: String = row.get("auxdata")?;
        let resources: String = row.get("resources")?;
        let flags: u32 = row.get("flags")?;
        Ok(CdsObject {
            id: row.get("id")?,
            parent_id: row.get("parent_id")?,
            ref_id: row.get("ref_id")?,
            kind: Self::kind_from_str(&kind),
            title: row.get("title")?,
            upnp_class: row.get("upnp_class")?,
            location: row.get("location")?,
            mtime: row.get("mtime")?,
            size_on_disk: row.get::<_, i64>("size_on_disk")? as u64,
            flags: ObjectFlags::from_bits_truncate(flags),
            virt: row.get("virt")?,
            mimetype: row.get("mimetype")?,
            service_id: row.get("service_id")?,
            metadata: serde_json::from_str::<Dictionary<MetadataKey>>(&metadata)
                .unwrap_or_default(),
            auxdata: serde_json::from_str::<Dictionary<String>>(&auxdata).unwrap_or_default(),
            resources: serde_json::from_str::<Vec<Resource>>(&resources).unwrap_or_default(),
            action: row.get("action")?,
            state: row.get("state")?,
        })
    }

    fn load_rows(conn: &Connection) -> Result<Vec<ObjRow>> {
        let mut stmt = conn.prepare("SELECT id, parent_id, ref_id, kind FROM objects")?;
        let rows = stmt
            .query_map([], |row| {
                let kind: String = row.get(3)?;
                Ok(ObjRow {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    ref_id: row.get(2)?,
                    is_container: kind == "container",
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn remove_ids(&self, roots: &[ObjectId], all: bool) -> Result<ChangedContainers> {
        for id in roots {
            if pmocds::is_forbidden_id(*id) {
                return Err(DatabaseError::Invalid(format!(
                    "cannot remove reserved object {id}"
                )));
            }
        }
        let conn = self.conn.lock().unwrap();
        let plan = plan_removal(&Self::load_rows(&conn)?, roots, all);
        {
            let mut stmt = conn.prepare("DELETE FROM objects WHERE id = ?1")?;
            for id in &plan.removed {
                stmt.execute(params![id])?;
            }
        }
        Ok(plan.changed)
    }

    fn insert_object(conn: &Connection, obj: &CdsObject) -> Result<ObjectId> {
        conn.execute(
            "INSERT INTO objects (parent_id, ref_id, kind, title, upnp_class, location,
                                  mtime, size_on_disk, flags, virt, mimetype, service_id,
                                  metadata, auxdata, resources, action, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                obj.parent_id,
                obj.ref_id,
                Self::kind_to_str(obj.kind),
                obj.title,
                obj.upnp_class,
                obj.location,
                obj.mtime,
                obj.size_on_disk as i64,
                obj.flags.bits(),
                obj.virt,
                obj.mimetype,
                obj.service_id,
                serde_json::to_string(&obj.metadata)?,
                serde_json::to_string(&obj.auxdata)?,
                serde_json::to_string(&obj.resources)?,
                obj.action,
                obj.state,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_container_id(
        conn: &Connection,
        parent_id: ObjectId,
        title: &str,
        virt: bool,
    ) -> Result<Option<ObjectId>> {
        let id = conn
            .query_row(
                "SELECT id FROM objects
                 WHERE parent_id = ?1 AND kind = 'container' AND virt = ?2 AND title = ?3",
                params![parent_id, virt, title],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AutoscanRecord> {
        let mode: String = row.get("scan_mode")?;
        let level: String = row.get("scan_level")?;
        let location: String = row.get("location")?;
        let media_type: u32 = row.get("media_type")?;
        Ok(AutoscanRecord {
            location: PathBuf::from(location),
            scan_mode: ScanMode::parse(&mode).unwrap_or(ScanMode::Timed),
            scan_level: ScanLevel::parse(&level).unwrap_or(ScanLevel::Full),
            recursive: row.get("recursive")?,
            hidden: row.get("hidden")?,
            follow_symlinks: row.get("follow_symlinks")?,
            interval_secs: row.get::<_, i64>("interval")? as u64,
            retry_count: row.get::<_, i64>("retry_count")? as u32,
            persistent: row.get("persistent")?,
            media_type: MediaType::from_bits_truncate(media_type),
            object_id: row.get("object_id")?,
            storage_id: row.get("id")?,
            last_modified: row.get("last_modified")?,
        })
    }

    fn insert_autoscan(conn: &Connection, record: &AutoscanRecord) -> Result<i64> {
        conn.execute(
            "INSERT INTO autoscan (scan_mode, location, scan_level, recursive, hidden,
                                   follow_symlinks, interval, retry_count, persistent,
                                   media_type, object_id, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.scan_mode.as_str(),
                record.location.to_string_lossy(),
                record.scan_level.as_str(),
                record.recursive,
                record.hidden,
                record.follow_symlinks,
                record.interval_secs as i64,
                record.retry_count as i64,
                record.persistent,
                record.media_type.bits(),
                record.object_id,
                record.last_modified,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl Database for SqliteDatabase {
    fn find_object_by_path(&self, path: &Path, file_type: FileType) -> Result<Option<CdsObject>> {
        let location = normalize(path);
        let conn = self.conn.lock().unwrap();
        let filter = match file_type {
            FileType::Any => "",
            FileType::File => " AND kind != 'container'",
            FileType::Directory => " AND kind = 'container'",
        };
        let sql = format!(
            "SELECT * FROM objects WHERE virt = 0 AND location = ?1{filter} LIMIT 1"
        );
        let obj = conn
            .query_row(&sql, params![location], Self::row_to_object)
            .optional()?;
        Ok(obj)
    }

    fn load_object(&self, id: ObjectId) -> Result<CdsObject> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM objects WHERE id = ?1",
            params![id],
            Self::row_to_object,
        )
        .optional()?
        .ok_or(DatabaseError::NotFound(id))
    }

    fn add_object(&self, obj: &mut CdsObject) -> Result<()> {
        obj.validate()
            .map_err(|e| DatabaseError::Invalid(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        let parent_exists: bool = conn
            .query_row(
                "SELECT 1 FROM objects WHERE id = ?1",
                params![obj.parent_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !parent_exists {
            return Err(DatabaseError::Invalid(format!(
                "parent {} does not exist",
                obj.parent_id
            )));
        }
        if !obj.virt && !obj.location.is_empty() {
            let duplicate: Option<ObjectId> = conn
                .query_row(
                    "SELECT id FROM objects WHERE virt = 0 AND location = ?1",
                    params![obj.location],
                    |r| r.get(0),
                )
                .optional()?;
            if duplicate.is_some() {
                return Err(DatabaseError::Conflict(format!(
                    "location already indexed: {}",
                    obj.location
                )));
            }
        }
        if obj.ref_id != 0 {
            let target: Option<ObjectId> = conn
                .query_row(
                    "SELECT id FROM objects WHERE id = ?1",
                    params![obj.ref_id],
                    |r| r.get(0),
                )
                .optional()?;
            if target.is_none() {
                return Err(DatabaseError::Invalid(format!(
                    "referenced object {} does not exist",
                    obj.ref_id
                )));
            }
        }
        obj.id = Self::insert_object(&conn, obj)?;
        Ok(())
    }

    fn update_object(&self, obj: &CdsObject) -> Result<()> {
        obj.validate()
            .map_err(|e| DatabaseError::Invalid(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE objects SET parent_id = ?2, ref_id = ?3, kind = ?4, title = ?5,
                                upnp_class = ?6, location = ?7, mtime = ?8, size_on_disk = ?9,
                                flags = ?10, virt = ?11, mimetype = ?12, service_id = ?13,
                                metadata = ?14, auxdata = ?15, resources = ?16,
                                action = ?17, state = ?18
             WHERE id = ?1",
            params![
                obj.id,
                obj.parent_id,
                obj.ref_id,
                Self::kind_to_str(obj.kind),
                obj.title,
                obj.upnp_class,
                obj.location,
                obj.mtime,
                obj.size_on_disk as i64,
                obj.flags.bits(),
                obj.virt,
                obj.mimetype,
                obj.service_id,
                serde_json::to_string(&obj.metadata)?,
                serde_json::to_string(&obj.auxdata)?,
                serde_json::to_string(&obj.resources)?,
                obj.action,
                obj.state,
            ],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(obj.id));
        }
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
        let conn = self.conn.lock().unwrap();
        let mut out = HashSet::new();
        let mut frontier = vec![parent_id];
        let mut stmt = conn.prepare("SELECT id, kind FROM objects WHERE parent_id = ?1")?;
        while let Some(parent) = frontier.pop() {
            let children = stmt
                .query_map(params![parent], |row| {
                    let kind: String = row.get(1)?;
                    Ok((row.get::<_, ObjectId>(0)?, kind == "container"))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (id, is_container) in children {
                if out.insert(id) && !direct_only && is_container {
                    frontier.push(id);
                }
            }
            if direct_only {
                break;
            }
        }
        Ok(out)
    }

    fn get_child_count(&self, parent_id: ObjectId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE parent_id = ?1",
            params![parent_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn ensure_path_existence(&self, path: &Path) -> Result<(ObjectId, Option<ObjectId>)> {
        let conn = self.conn.lock().unwrap();
        let mut parent = PC_DIRECTORY_ID;
        let mut first_new = None;
        let mut accumulated = PathBuf::from("/");
        for component in Path::new(&normalize(path)).components() {
            let std::path::Component::Normal(name) = component else {
                continue;
            };
            accumulated.push(name);
            let location = accumulated.to_string_lossy().to_string();
            let existing: Option<ObjectId> = conn
                .query_row(
                    "SELECT id FROM objects
                     WHERE virt = 0 AND kind = 'container' AND location = ?1",
                    params![location],
                    |r| r.get(0),
                )
                .optional()?;
            parent = match existing {
                Some(id) => id,
                None => {
                    let mut cont = CdsObject::container(name.to_string_lossy());
                    cont.parent_id = parent;
                    cont.location = location;
                    let id = Self::insert_object(&conn, &cont)?;
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
        let conn = self.conn.lock().unwrap();
        let mut parent = ROOT_ID;
        let mut first_new = None;
        let count = titles.len();
        for (i, title) in titles.iter().enumerate() {
            parent = match Self::find_container_id(&conn, parent, title, true)? {
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
                    let id = Self::insert_object(&conn, &cont)?;
                    first_new.get_or_insert(id);
                    id
                }
            };
        }
        Ok((parent, first_new))
    }

    fn get_service_object_ids(&self, prefix: char) -> Result<Vec<ObjectId>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("{prefix}%");
        let mut stmt =
            conn.prepare("SELECT id FROM objects WHERE service_id LIKE ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![pattern], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn get_total_files(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE virt = 0 AND kind = 'item'",
            [],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_mime_types(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT mimetype FROM objects WHERE mimetype IS NOT NULL ORDER BY mimetype",
        )?;
        let mimes = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mimes)
    }

    fn get_autoscan_list(&self, mode: ScanMode) -> Result<Vec<Arc<AutoscanDirectory>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM autoscan WHERE scan_mode = ?1 ORDER BY id")?;
        let records = stmt
            .query_map(params![mode.as_str()], Self::record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records
            .iter()
            .map(|r| Arc::new(AutoscanDirectory::from_record(r)))
            .collect())
    }

    fn update_autoscan_list(&self, mode: ScanMode, list: &[Arc<AutoscanDirectory>]) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM autoscan WHERE scan_mode = ?1",
                params![mode.as_str()],
            )?;
            for adir in list {
                let storage_id = Self::insert_autoscan(&conn, &adir.to_record())?;
                adir.set_storage_id(storage_id);
            }
        }
        Ok(())
    }

    fn add_autoscan_directory(&self, adir: &AutoscanDirectory) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM autoscan WHERE location = ?1",
                params![adir.location().to_string_lossy()],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(DatabaseError::Conflict(format!(
                "autoscan already registered for {}",
                adir.location().display()
            )));
        }
        let storage_id = Self::insert_autoscan(&conn, &adir.to_record())?;
        adir.set_storage_id(storage_id);
        Ok(storage_id)
    }

    fn update_autoscan_directory(&self, adir: &AutoscanDirectory) -> Result<()> {
        let record = adir.to_record();
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE autoscan SET scan_mode = ?2, location = ?3, scan_level = ?4,
                                 recursive = ?5, hidden = ?6, follow_symlinks = ?7,
                                 interval = ?8, retry_count = ?9, persistent = ?10,
                                 media_type = ?11, object_id = ?12, last_modified = ?13
             WHERE id = ?1",
            params![
                record.storage_id,
                record.scan_mode.as_str(),
                record.location.to_string_lossy(),
                record.scan_level.as_str(),
                record.recursive,
                record.hidden,
                record.follow_symlinks,
                record.interval_secs as i64,
                record.retry_count as i64,
                record.persistent,
                record.media_type.bits(),
                record.object_id,
                record.last_modified,
            ],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(record.storage_id));
        }
        Ok(())
    }

    fn remove_autoscan_directory(&self, storage_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM autoscan WHERE id = ?1", params![storage_id])?;
        Ok(())
    }
}
