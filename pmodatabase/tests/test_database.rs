use pmocds::autoscan::{AutoscanDirectory, ScanMode};
use pmocds::{vpath, CdsObject, ObjectFlags, PC_DIRECTORY_ID, ROOT_ID};
use pmodatabase::{Database, DatabaseError, FileType, MemoryDatabase, SqliteDatabase};
use std::path::Path;
use std::sync::Arc;

fn backends() -> Vec<(&'static str, Arc<dyn Database>)> {
    vec![
        ("memory", Arc::new(MemoryDatabase::new()) as Arc<dyn Database>),
        (
            "sqlite",
            Arc::new(SqliteDatabase::open_in_memory().unwrap()) as Arc<dyn Database>,
        ),
    ]
}

fn new_item(path: &str) -> CdsObject {
    let mut item = CdsObject::item(Path::new(path).file_name().unwrap().to_string_lossy());
    item.location = path.to_string();
    item.mimetype = Some("audio/mpeg".to_string());
    item
}

#[test]
fn roots_are_seeded() {
    for (name, db) in backends() {
        let root = db.load_object(ROOT_ID).unwrap();
        assert!(root.is_container(), "{name}");
        let pc = db.load_object(PC_DIRECTORY_ID).unwrap();
        assert_eq!(pc.parent_id, ROOT_ID, "{name}");
    }
}

#[test]
fn add_and_find_by_path() {
    for (name, db) in backends() {
        let (parent, _) = db.ensure_path_existence(Path::new("/music")).unwrap();
        let mut item = new_item("/music/song.mp3");
        item.parent_id = parent;
        db.add_object(&mut item).unwrap();
        assert!(item.id > 0, "{name}");

        let found = db
            .find_object_by_path(Path::new("/music/song.mp3"), FileType::File)
            .unwrap()
            .expect("item should be found");
        assert_eq!(found.id, item.id, "{name}");
        assert_eq!(found.mimetype.as_deref(), Some("audio/mpeg"), "{name}");

        // directory filter must not match the item
        assert!(db
            .find_object_by_path(Path::new("/music/song.mp3"), FileType::Directory)
            .unwrap()
            .is_none());

        // physical locations are unique
        let mut dup = new_item("/music/song.mp3");
        dup.parent_id = parent;
        assert!(matches!(
            db.add_object(&mut dup),
            Err(DatabaseError::Conflict(_))
        ));
    }
}

#[test]
fn ensure_path_existence_is_idempotent() {
    for (name, db) in backends() {
        let (leaf1, created1) = db.ensure_path_existence(Path::new("/a/b/c")).unwrap();
        assert!(created1.is_some(), "{name}");
        let (leaf2, created2) = db.ensure_path_existence(Path::new("/a/b/c")).unwrap();
        assert_eq!(leaf1, leaf2, "{name}");
        assert!(created2.is_none(), "{name}");
        // prefix reuse
        let (leaf3, _) = db.ensure_path_existence(Path::new("/a/b")).unwrap();
        let c = db.load_object(leaf1).unwrap();
        assert_eq!(c.parent_id, leaf3, "{name}");
    }
}

#[test]
fn container_chain_is_idempotent_and_escaped() {
    for (name, db) in backends() {
        let chain = vpath::join(["Audio", "Artists", "AC/DC"]);
        let (leaf1, created1) = db
            .add_container_chain(&chain, "object.container.person.musicArtist", 0)
            .unwrap();
        assert!(created1.is_some(), "{name}");
        let (leaf2, created2) = db.add_container_chain(&chain, "", 0).unwrap();
        assert_eq!(leaf1, leaf2, "{name}");
        assert!(created2.is_none(), "{name}");

        let leaf = db.load_object(leaf1).unwrap();
        assert_eq!(leaf.title, "AC/DC", "{name}");
        assert_eq!(leaf.upnp_class, "object.container.person.musicArtist");
        assert!(leaf.virt);
    }
}

#[test]
fn remove_container_cascades() {
    for (name, db) in backends() {
        let (dir, _) = db.ensure_path_existence(Path::new("/beta/sub")).unwrap();
        let mut item = new_item("/beta/sub/x.jpg");
        item.parent_id = dir;
        db.add_object(&mut item).unwrap();

        let (beta, _) = db.ensure_path_existence(Path::new("/beta")).unwrap();
        let changed = db.remove_object(dir, false).unwrap();
        assert!(changed.upnp.contains(&beta), "{name}");
        assert!(changed.ui.contains(&beta), "{name}");
        assert!(matches!(
            db.load_object(item.id),
            Err(DatabaseError::NotFound(_))
        ));
        assert!(db
            .find_object_by_path(Path::new("/beta/sub/x.jpg"), FileType::Any)
            .unwrap()
            .is_none());
    }
}

#[test]
fn virtual_copy_is_removed_with_original() {
    for (name, db) in backends() {
        let (parent, _) = db.ensure_path_existence(Path::new("/music")).unwrap();
        let mut item = new_item("/music/t.mp3");
        item.parent_id = parent;
        db.add_object(&mut item).unwrap();

        let (vparent, _) = db
            .add_container_chain(&vpath::join(["Audio", "All Audio"]), "", 0)
            .unwrap();
        let mut copy = item.clone();
        copy.id = pmocds::INVALID_OBJECT_ID;
        copy.parent_id = vparent;
        copy.ref_id = item.id;
        copy.virt = true;
        db.add_object(&mut copy).unwrap();

        db.remove_object(item.id, false).unwrap();
        assert!(
            matches!(db.load_object(copy.id), Err(DatabaseError::NotFound(_))),
            "{name}: dangling reference"
        );
    }
}

#[test]
fn forbidden_ids_are_refused() {
    for (_, db) in backends() {
        assert!(db.remove_object(ROOT_ID, false).is_err());
        assert!(db.remove_object(PC_DIRECTORY_ID, true).is_err());
    }
}

#[test]
fn service_ids_and_mime_types() {
    for (name, db) in backends() {
        let (parent, _) = db.ensure_path_existence(Path::new("/m")).unwrap();
        let mut item = new_item("/m/a.mp3");
        item.parent_id = parent;
        item.service_id = Some("T1234".to_string());
        item.set_flag(ObjectFlags::ONLINE_SERVICE, true);
        db.add_object(&mut item).unwrap();

        assert_eq!(db.get_service_object_ids('T').unwrap(), vec![item.id]);
        assert!(db.get_service_object_ids('S').unwrap().is_empty(), "{name}");
        assert_eq!(db.get_mime_types().unwrap(), vec!["audio/mpeg".to_string()]);
        assert_eq!(db.get_total_files().unwrap(), 1, "{name}");
    }
}

#[test]
fn autoscan_records_roundtrip() {
    for (name, db) in backends() {
        let adir = Arc::new(
            AutoscanDirectory::new("/media/music", ScanMode::Timed)
                .with_recursive(true)
                .with_persistent(true),
        );
        let storage_id = db.add_autoscan_directory(&adir).unwrap();
        assert!(storage_id > 0, "{name}");

        // duplicate location is a conflict
        let dup = Arc::new(AutoscanDirectory::new("/media/music", ScanMode::Timed));
        assert!(matches!(
            db.add_autoscan_directory(&dup),
            Err(DatabaseError::Conflict(_))
        ));

        adir.set_object_id(42);
        adir.set_current_lmt(1000);
        adir.update_lmt();
        db.update_autoscan_directory(&adir).unwrap();

        let list = db.get_autoscan_list(ScanMode::Timed).unwrap();
        assert_eq!(list.len(), 1, "{name}");
        assert_eq!(list[0].object_id(), 42);
        assert_eq!(list[0].previous_lmt(), 1000);
        assert!(list[0].persistent());

        db.remove_autoscan_directory(storage_id).unwrap();
        assert!(db.get_autoscan_list(ScanMode::Timed).unwrap().is_empty());
    }
}
