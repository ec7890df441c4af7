use pmocds::autoscan::{AutoscanDirectory, ScanMode};
use pmocds::ObjectId;
use pmocontent::inotify::{FakeWatchHandle, FakeWatchSource, FsEventMask};
use pmocontent::{ContentManager, Context, UpdateSink};
use pmodatabase::{Database, FileType, MemoryDatabase};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingSink {
    ids: Mutex<Vec<ObjectId>>,
}

impl RecordingSink {
    fn seen(&self) -> Vec<ObjectId> {
        self.ids.lock().unwrap().clone()
    }
}

impl UpdateSink for RecordingSink {
    fn containers_changed(&self, ids: &[ObjectId]) {
        self.ids.lock().unwrap().extend_from_slice(ids);
    }
}

struct Harness {
    _dir: TempDir,
    media: std::path::PathBuf,
    content: Arc<ContentManager>,
    watch: FakeWatchHandle,
    sink: Arc<RecordingSink>,
}

fn setup() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join("media");
    std::fs::create_dir_all(&media).unwrap();
    let config_dir = dir.path().join("config");
    let config = Arc::new(
        pmoconfig::Config::load_config(config_dir.to_str().unwrap()).unwrap(),
    );
    let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let sink = Arc::new(RecordingSink::default());
    let (source, watch) = FakeWatchSource::new();
    let context = Context::new(config, database)
        .with_update_sink(sink.clone())
        .with_watch_source(Box::new(source));
    let content = ContentManager::new(context);
    content.start().unwrap();
    Harness {
        _dir: dir,
        media,
        content,
        watch,
        sink,
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn wait_idle(content: &ContentManager) {
    assert!(
        wait_until(Duration::from_secs(5), || content.task_list().is_empty()),
        "task queues did not drain"
    );
}

fn register_inotify_autoscan(
    h: &Harness,
    location: &Path,
    recursive: bool,
    persistent: bool,
) -> Arc<AutoscanDirectory> {
    let adir = Arc::new(
        AutoscanDirectory::new(location, ScanMode::INotify)
            .with_recursive(recursive)
            .with_persistent(persistent),
    );
    h.content.set_autoscan_directory(adir.clone()).unwrap();
    adir
}

#[test]
fn new_file_in_watched_directory_is_imported() {
    let h = setup();
    register_inotify_autoscan(&h, &h.media, true, false);

    assert!(
        wait_until(Duration::from_secs(5), || h.watch.is_watched(&h.media)),
        "start point watch missing"
    );
    wait_idle(&h.content);

    // the start point invariant holds
    let inotify = h.content.inotify().unwrap();
    let snapshot = inotify.snapshot();
    assert!(snapshot
        .iter()
        .any(|w| w.path == h.media && w.start_point.as_deref() == Some(h.media.as_path())));

    // a file appears and is closed
    std::fs::write(h.media.join("a.mp3"), b"ID3 tune").unwrap();
    h.watch
        .emit(&h.media, FsEventMask::CLOSE_WRITE, Some("a.mp3"));

    assert!(wait_until(Duration::from_secs(5), || {
        h.content
            .database()
            .find_object_by_path(&h.media.join("a.mp3"), FileType::File)
            .unwrap()
            .is_some()
    }));
    let obj = h
        .content
        .database()
        .find_object_by_path(&h.media.join("a.mp3"), FileType::File)
        .unwrap()
        .unwrap();
    assert!(obj.kind.is_item());
    assert_eq!(obj.mimetype.as_deref(), Some("audio/mpeg"));

    h.content.shutdown();
}

#[test]
fn created_directory_is_watched_recursively() {
    let h = setup();
    register_inotify_autoscan(&h, &h.media, true, false);
    assert!(wait_until(Duration::from_secs(5), || h
        .watch
        .is_watched(&h.media)));
    wait_idle(&h.content);

    let sub = h.media.join("incoming");
    std::fs::create_dir_all(&sub).unwrap();
    h.watch.emit(
        &h.media,
        FsEventMask::CREATE.union(FsEventMask::IS_DIR),
        Some("incoming"),
    );

    assert!(
        wait_until(Duration::from_secs(5), || h.watch.is_watched(&sub)),
        "new subdirectory must join the watch table"
    );

    // the new wd is tracked as a descendant of the start point
    let inotify = h.content.inotify().unwrap();
    let sub_wd = h.watch.wd_for(&sub).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        inotify
            .snapshot()
            .iter()
            .any(|w| w.path == h.media && w.descendants.contains(&sub_wd))
    }));

    h.content.shutdown();
}

#[test]
fn recursive_delete_removes_subtree_and_notifies_once() {
    let h = setup();
    let sub = h.media.join("sub");
    std::fs::create_dir_all(&sub).unwrap();
    std::fs::write(sub.join("x.jpg"), b"jpeg").unwrap();

    register_inotify_autoscan(&h, &h.media, true, false);
    assert!(wait_until(Duration::from_secs(5), || h.watch.is_watched(&sub)));
    // the initial rescan indexes the tree
    assert!(wait_until(Duration::from_secs(5), || {
        h.content
            .database()
            .find_object_by_path(&sub.join("x.jpg"), FileType::File)
            .unwrap()
            .is_some()
    }));
    wait_idle(&h.content);

    let sub_obj = h
        .content
        .database()
        .find_object_by_path(&sub, FileType::Directory)
        .unwrap()
        .expect("sub must be indexed");
    let media_obj = h
        .content
        .database()
        .find_object_by_path(&h.media, FileType::Directory)
        .unwrap()
        .unwrap();
    h.sink.seen(); // ignore what import produced
    let before: Vec<ObjectId> = h.sink.seen();

    // the tree disappears from disk
    let sub_wd = h.watch.wd_for(&sub).unwrap();
    std::fs::remove_dir_all(&sub).unwrap();
    h.watch.emit(
        &h.media,
        FsEventMask::DELETE.union(FsEventMask::IS_DIR),
        Some("sub"),
    );
    h.watch.emit_wd(sub_wd, FsEventMask::DELETE_SELF, None);
    h.watch.emit_wd(sub_wd, FsEventMask::IGNORED, None);

    assert!(wait_until(Duration::from_secs(5), || {
        h.content
            .database()
            .find_object_by_path(&sub, FileType::Any)
            .unwrap()
            .is_none()
    }));
    wait_idle(&h.content);
    assert!(h
        .content
        .database()
        .find_object_by_path(&sub.join("x.jpg"), FileType::Any)
        .unwrap()
        .is_none());
    assert!(h.content.database().load_object(sub_obj.id).is_err());

    // the parent container was notified exactly once
    h.content.update_manager().flush();
    let after = h.sink.seen();
    let new_events: Vec<ObjectId> = after[before.len()..].to_vec();
    assert_eq!(
        new_events.iter().filter(|id| **id == media_obj.id).count(),
        1,
        "parent must appear exactly once in the update set"
    );

    h.content.shutdown();
}

#[test]
fn renamed_start_point_drops_the_autoscan() {
    let h = setup();
    let gamma = h.media.join("gamma");
    std::fs::create_dir_all(&gamma).unwrap();
    std::fs::write(gamma.join("movie.mp4"), b"mp4").unwrap();

    register_inotify_autoscan(&h, &gamma, true, false);
    assert!(wait_until(Duration::from_secs(5), || h
        .watch
        .is_watched(&gamma)));
    assert!(wait_until(Duration::from_secs(5), || {
        h.content
            .database()
            .find_object_by_path(&gamma.join("movie.mp4"), FileType::File)
            .unwrap()
            .is_some()
    }));
    wait_idle(&h.content);

    // mv gamma gamma2
    let gamma2 = h.media.join("gamma2");
    std::fs::rename(&gamma, &gamma2).unwrap();
    let gamma_wd = h.watch.wd_for(&gamma).unwrap();
    h.watch.emit_wd(gamma_wd, FsEventMask::MOVE_SELF, None);

    // the autoscan record goes away entirely
    assert!(wait_until(Duration::from_secs(5), || h
        .content
        .get_autoscan_by_location(&gamma)
        .is_none()));
    wait_idle(&h.content);

    // no indexed leftovers, no ghost imports
    assert!(h
        .content
        .database()
        .find_object_by_path(&gamma, FileType::Any)
        .unwrap()
        .is_none());
    assert!(h
        .content
        .database()
        .find_object_by_path(&gamma.join("movie.mp4"), FileType::Any)
        .unwrap()
        .is_none());

    // the start point watch was torn down
    assert!(wait_until(Duration::from_secs(5), || !h
        .watch
        .is_watched(&gamma)));

    h.content.shutdown();
}

#[test]
fn missing_persistent_path_installs_placeholder_and_recovers() {
    let h = setup();
    let missing = h.media.join("missing");

    let adir = register_inotify_autoscan(&h, &missing, true, true);

    // the nearest existing ancestor carries the placeholder
    let inotify = h.content.inotify().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        inotify
            .snapshot()
            .iter()
            .any(|w| w.path == h.media && w.non_existing.contains(&missing))
    }));
    assert!(!h.watch.is_watched(&missing));

    // the path appears
    std::fs::create_dir_all(&missing).unwrap();
    h.watch.emit(
        &h.media,
        FsEventMask::CREATE.union(FsEventMask::IS_DIR),
        Some("missing"),
    );

    // the placeholder becomes a real start point and a rescan ran
    assert!(wait_until(Duration::from_secs(5), || h
        .watch
        .is_watched(&missing)));
    assert!(wait_until(Duration::from_secs(5), || {
        inotify
            .snapshot()
            .iter()
            .any(|w| w.path == missing && w.start_point.as_deref() == Some(missing.as_path()))
    }));
    wait_idle(&h.content);
    assert!(adir.object_id() > 0, "container must be rematerialised");
    assert!(wait_until(Duration::from_secs(5), || {
        inotify
            .snapshot()
            .iter()
            .all(|w| w.non_existing.is_empty())
    }));

    h.content.shutdown();
}

#[test]
fn deleted_file_is_removed_from_the_database() {
    let h = setup();
    std::fs::write(h.media.join("b.mp3"), b"ID3").unwrap();
    register_inotify_autoscan(&h, &h.media, true, false);
    assert!(wait_until(Duration::from_secs(5), || {
        h.content
            .database()
            .find_object_by_path(&h.media.join("b.mp3"), FileType::File)
            .unwrap()
            .is_some()
    }));
    wait_idle(&h.content);

    std::fs::remove_file(h.media.join("b.mp3")).unwrap();
    h.watch.emit(&h.media, FsEventMask::DELETE, Some("b.mp3"));

    assert!(wait_until(Duration::from_secs(5), || {
        h.content
            .database()
            .find_object_by_path(&h.media.join("b.mp3"), FileType::Any)
            .unwrap()
            .is_none()
    }));

    h.content.shutdown();
}

#[test]
fn rewritten_file_is_reimported() {
    let h = setup();
    let song = h.media.join("c.mp3");
    std::fs::write(&song, b"ID3 v1").unwrap();
    register_inotify_autoscan(&h, &h.media, true, false);
    assert!(wait_until(Duration::from_secs(5), || {
        h.content
            .database()
            .find_object_by_path(&song, FileType::File)
            .unwrap()
            .is_some()
    }));
    wait_idle(&h.content);
    let first = h
        .content
        .database()
        .find_object_by_path(&song, FileType::File)
        .unwrap()
        .unwrap();

    std::fs::write(&song, b"ID3 v2 rewritten").unwrap();
    h.watch.emit(&h.media, FsEventMask::CLOSE_WRITE, Some("c.mp3"));

    // mediatomb import mode: the object is replaced
    assert!(wait_until(Duration::from_secs(5), || {
        match h
            .content
            .database()
            .find_object_by_path(&song, FileType::File)
            .unwrap()
        {
            Some(obj) => obj.id != first.id,
            None => false,
        }
    }));

    h.content.shutdown();
}
