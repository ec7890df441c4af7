use pmocds::autoscan::{AutoscanDirectory, ScanLevel, ScanMode};
use pmocds::{ObjectId, INVALID_OBJECT_ID};
use pmocontent::{
    ContentManager, Context, FeedConfig, FeedService, FixedClock, OnlineService, TaskType,
    UpdateSink,
};
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
    sink: Arc<RecordingSink>,
    clock: Arc<FixedClock>,
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
    let clock = Arc::new(FixedClock::new(0));
    let sink = Arc::new(RecordingSink::default());
    let context = Context::new(config, database)
        .with_clock(clock.clone())
        .with_update_sink(sink.clone());
    let content = ContentManager::new(context);
    Harness {
        _dir: dir,
        media,
        content,
        sink,
        clock,
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

#[test]
fn timed_scan_imports_new_files() {
    let h = setup();
    std::fs::write(h.media.join("a.mp3"), b"ID3 song").unwrap();
    std::fs::write(h.media.join("skip.xyz"), b"???").unwrap();
    h.content.start().unwrap();

    let adir = Arc::new(
        AutoscanDirectory::new(&h.media, ScanMode::Timed)
            .with_recursive(true)
            .with_interval(Duration::from_secs(3600)),
    );
    h.content.set_autoscan_directory(adir.clone()).unwrap();
    wait_idle(&h.content);

    let found = h
        .content
        .database()
        .find_object_by_path(&h.media.join("a.mp3"), FileType::File)
        .unwrap()
        .expect("a.mp3 should be indexed");
    assert!(found.kind.is_item());
    assert_eq!(found.mimetype.as_deref(), Some("audio/mpeg"));
    assert!(found.id > 0);

    // the unknown extension was still imported, with the default type
    let other = h
        .content
        .database()
        .find_object_by_path(&h.media.join("skip.xyz"), FileType::File)
        .unwrap()
        .expect("unknown extensions fall back to the default mimetype");
    assert_eq!(other.mimetype.as_deref(), Some("application/octet-stream"));

    // the autoscan is bound to a materialised container
    assert!(adir.object_id() > 0);

    h.content.shutdown();
}

#[test]
fn timed_full_scan_reimports_changed_files() {
    let h = setup();
    let song = h.media.join("song.flac");
    std::fs::write(&song, b"fLaC v1").unwrap();
    h.content.start().unwrap();

    let adir = Arc::new(
        AutoscanDirectory::new(&h.media, ScanMode::Timed)
            .with_scan_level(ScanLevel::Full)
            .with_interval(Duration::from_secs(3600)),
    );
    h.content.set_autoscan_directory(adir.clone()).unwrap();
    wait_idle(&h.content);

    let first = h
        .content
        .database()
        .find_object_by_path(&song, FileType::File)
        .unwrap()
        .unwrap();
    let cursor_after_first = adir.previous_lmt();
    assert!(cursor_after_first > 0);

    // mtime has one second resolution, make sure the rewrite moves it
    std::thread::sleep(Duration::from_millis(1100));
    std::fs::write(&song, b"fLaC v2, longer content").unwrap();

    h.content
        .rescan_directory(adir.object_id(), adir.scan_id(), ScanMode::Timed, None, false);
    wait_idle(&h.content);

    let second = h
        .content
        .database()
        .find_object_by_path(&song, FileType::File)
        .unwrap()
        .expect("changed file must be re-imported");
    assert_ne!(first.id, second.id, "layout pass must run again");
    assert!(adir.previous_lmt() > cursor_after_first, "cursor must advance");

    h.content.shutdown();
}

#[test]
fn basic_rescan_is_a_noop_for_unchanged_files() {
    let h = setup();
    let song = h.media.join("track.mp3");
    std::fs::write(&song, b"ID3").unwrap();
    h.content.start().unwrap();

    let adir = Arc::new(
        AutoscanDirectory::new(&h.media, ScanMode::Timed)
            .with_scan_level(ScanLevel::Basic)
            .with_interval(Duration::from_secs(3600)),
    );
    h.content.set_autoscan_directory(adir.clone()).unwrap();
    wait_idle(&h.content);

    let first = h
        .content
        .database()
        .find_object_by_path(&song, FileType::File)
        .unwrap()
        .unwrap();

    h.content
        .rescan_directory(adir.object_id(), adir.scan_id(), ScanMode::Timed, None, false);
    wait_idle(&h.content);

    let second = h
        .content
        .database()
        .find_object_by_path(&song, FileType::File)
        .unwrap()
        .unwrap();
    assert_eq!(first.id, second.id);

    h.content.shutdown();
}

#[test]
fn vanished_files_are_removed_by_the_next_scan() {
    let h = setup();
    let song = h.media.join("gone.mp3");
    std::fs::write(&song, b"ID3").unwrap();
    h.content.start().unwrap();

    let adir = Arc::new(
        AutoscanDirectory::new(&h.media, ScanMode::Timed)
            .with_interval(Duration::from_secs(3600)),
    );
    h.content.set_autoscan_directory(adir.clone()).unwrap();
    wait_idle(&h.content);
    assert!(h
        .content
        .database()
        .find_object_by_path(&song, FileType::File)
        .unwrap()
        .is_some());

    std::fs::remove_file(&song).unwrap();
    h.content
        .rescan_directory(adir.object_id(), adir.scan_id(), ScanMode::Timed, None, false);
    wait_idle(&h.content);

    assert!(h
        .content
        .database()
        .find_object_by_path(&song, FileType::File)
        .unwrap()
        .is_none());

    h.content.shutdown();
}

#[test]
fn ensure_path_existence_is_idempotent_and_notifies_once() {
    let h = setup();
    let deep = h.media.join("x/y");
    std::fs::create_dir_all(&deep).unwrap();

    let first = h.content.ensure_path_existence(&deep).unwrap();
    h.content.update_manager().flush();
    let notified_once = h.sink.seen().len();
    assert!(notified_once > 0);

    let second = h.content.ensure_path_existence(&deep).unwrap();
    h.content.update_manager().flush();
    assert_eq!(first, second);
    assert_eq!(h.sink.seen().len(), notified_once, "no second notification");
}

#[test]
fn container_chain_is_idempotent() {
    let h = setup();
    let chain = "/Audio/Albums/Test";
    let first = h.content.add_container_chain(chain, "").unwrap();
    let second = h.content.add_container_chain(chain, "").unwrap();
    assert_eq!(first, second);
    assert!(h.content.add_container_chain("", "").is_err());
}

#[test]
fn hidden_files_and_config_are_not_imported() {
    let h = setup();
    std::fs::write(h.media.join(".hidden.mp3"), b"ID3").unwrap();
    let id = h
        .content
        .add_file_sync(&h.media.join(".hidden.mp3"), &h.media, false, false)
        .unwrap();
    assert_eq!(id, INVALID_OBJECT_ID);

    // with the hidden policy on, the file is imported
    let id = h
        .content
        .add_file_sync(&h.media.join(".hidden.mp3"), &h.media, false, true)
        .unwrap();
    assert!(id > 0);
}

#[test]
fn remove_object_invalidates_pending_add_tasks_under_path() {
    let h = setup();
    let eps = h.media.join("eps");
    let big = eps.join("big");
    std::fs::create_dir_all(&big).unwrap();
    std::fs::write(big.join("movie.mp4"), b"mp4").unwrap();

    // index the directory tree synchronously, without the worker
    h.content
        .add_file_sync(&big.join("movie.mp4"), &h.media, false, false)
        .unwrap();
    let eps_obj = h
        .content
        .database()
        .find_object_by_path(&eps, FileType::Directory)
        .unwrap()
        .unwrap();

    // queue a recursive import, then remove its target before it runs
    h.content
        .add_file(big.as_path(), true, true, true)
        .unwrap();
    h.content.remove_object_async(eps_obj.id, false);

    // the queued import task was invalidated by path prefix
    let list = h.content.task_list();
    assert!(
        list.iter().all(|t| t.task_type() != TaskType::AddFile),
        "pending add task must be invalid"
    );

    // let the worker drain: the no-op add must leave nothing behind
    h.content.start().unwrap();
    wait_idle(&h.content);
    assert!(h
        .content
        .database()
        .find_object_by_path(&eps, FileType::Any)
        .unwrap()
        .is_none());
    assert!(h
        .content
        .database()
        .find_object_by_path(&big.join("movie.mp4"), FileType::Any)
        .unwrap()
        .is_none());

    h.content.shutdown();
}

#[test]
fn removing_container_unregisters_child_autoscans() {
    let h = setup();
    let sub = h.media.join("watched");
    std::fs::create_dir_all(&sub).unwrap();
    h.content.start().unwrap();

    let adir = Arc::new(
        AutoscanDirectory::new(&sub, ScanMode::Timed)
            .with_interval(Duration::from_secs(3600)),
    );
    h.content.set_autoscan_directory(adir).unwrap();
    wait_idle(&h.content);
    assert!(h.content.get_autoscan_by_location(&sub).is_some());

    let media_obj = h
        .content
        .database()
        .find_object_by_path(&h.media, FileType::Directory)
        .unwrap()
        .unwrap();
    h.content.remove_object_async(media_obj.id, false);
    wait_idle(&h.content);

    assert!(h.content.get_autoscan_by_location(&sub).is_none());
    h.content.shutdown();
}

#[test]
fn overlapping_recursive_autoscans_are_refused() {
    let h = setup();
    let sub = h.media.join("inner");
    std::fs::create_dir_all(&sub).unwrap();
    h.content.start().unwrap();

    let outer = Arc::new(
        AutoscanDirectory::new(&h.media, ScanMode::Timed)
            .with_recursive(true)
            .with_interval(Duration::from_secs(3600)),
    );
    h.content.set_autoscan_directory(outer).unwrap();
    wait_idle(&h.content);

    let inner = Arc::new(
        AutoscanDirectory::new(&sub, ScanMode::Timed).with_interval(Duration::from_secs(3600)),
    );
    let result = h.content.set_autoscan_directory(inner);
    assert!(result.is_err(), "nested autoscan must be refused");

    h.content.shutdown();
}

// -- services en ligne ------------------------------------------------------

struct StubService {
    purge: Duration,
}

impl OnlineService for StubService {
    fn service_name(&self) -> &str {
        "Stub"
    }

    fn service_id(&self) -> &str {
        "stub"
    }

    fn storage_prefix(&self) -> char {
        'S'
    }

    fn refresh_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn item_purge_interval(&self) -> Duration {
        self.purge
    }

    fn refresh_service_data(&self, _content: &ContentManager) -> pmocontent::Result<bool> {
        Ok(false) // nothing new, single page
    }
}

#[test]
fn stale_online_items_are_purged_after_refresh() {
    let h = setup();
    h.content.start().unwrap();
    h.content
        .register_online_service(Arc::new(StubService {
            purge: Duration::from_secs(3600),
        }))
        .unwrap();

    // seed one service item, last updated at t = 0
    let parent = h.content.add_container_chain("/Online Services/Stub", "").unwrap();
    let mut item = pmocds::CdsObject::external_url_item("X", "http://example.com/x");
    item.virt = true;
    item.parent_id = parent;
    item.service_id = Some("S-x".to_string());
    item.set_aux(pmocds::ONLINE_SERVICE_LAST_UPDATE, "0");
    h.content.database().add_object(&mut item).unwrap();

    // a refresh cycle at t = 7200 must drop the stale item
    h.clock.set(7200);
    h.content
        .fetch_online_content("stub", false, true, true)
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        h.content
            .database()
            .load_object(item.id)
            .is_err()
    }));

    h.content.shutdown();
}

#[test]
fn feed_document_creates_and_refreshes_items() {
    let h = setup();
    let feed = FeedService::new(
        FeedConfig {
            name: "Trailers".to_string(),
            url: "http://unused.example/feed.xml".to_string(),
            prefix: "T".to_string(),
            refresh: 0,
            purge_after: 3600,
            enabled: true,
        },
        h.clock.clone() as Arc<dyn pmocontent::Clock>,
    );

    let xml = r#"
        <catalogue>
          <entry id="1">
            <title>First</title>
            <url>http://cdn.example/1.mp4</url>
            <mimetype>video/mp4</mimetype>
            <genre>Action</genre>
            <genre>Sci-Fi</genre>
            <actor>Lead</actor>
            <actor>Support</actor>
          </entry>
        </catalogue>"#;

    h.clock.set(100);
    feed.apply_document(xml, &h.content).unwrap();

    let ids = h.content.database().get_service_object_ids('T').unwrap();
    assert_eq!(ids.len(), 1);
    let obj = h.content.database().load_object(ids[0]).unwrap();
    assert_eq!(obj.service_id.as_deref(), Some("T1"));
    assert_eq!(
        obj.metadata_value(pmocds::MetadataKey::Genre),
        Some("Action, Sci-Fi")
    );
    assert_eq!(
        obj.metadata_value(pmocds::MetadataKey::Actor),
        Some("Lead, Support")
    );
    assert_eq!(
        obj.aux_value(pmocds::ONLINE_SERVICE_LAST_UPDATE),
        Some("100")
    );

    // a second pass refreshes the stamp instead of duplicating
    h.clock.set(200);
    feed.apply_document(xml, &h.content).unwrap();
    let ids = h.content.database().get_service_object_ids('T').unwrap();
    assert_eq!(ids.len(), 1);
    let obj = h.content.database().load_object(ids[0]).unwrap();
    assert_eq!(
        obj.aux_value(pmocds::ONLINE_SERVICE_LAST_UPDATE),
        Some("200")
    );
}

#[test]
fn layout_builds_audio_chains() {
    let h = setup();
    let song = h.media.join("tune.mp3");
    std::fs::write(&song, b"ID3").unwrap();

    let id = h
        .content
        .add_file_sync(&song, &h.media, false, false)
        .unwrap();
    assert!(id > 0);

    // the item has at least one virtual copy under /Audio/All Audio
    let all_audio = h.content.add_container_chain("/Audio/All Audio", "").unwrap();
    let children = h
        .content
        .database()
        .get_objects(all_audio, true)
        .unwrap();
    assert_eq!(children.len(), 1);
    let copy = h
        .content
        .database()
        .load_object(*children.iter().next().unwrap())
        .unwrap();
    assert_eq!(copy.ref_id, id);
    assert!(copy.is_virtual());
}

#[test]
fn path_lookup_ignores_trailing_slash(){
    let h = setup();
    let sub = h.media.join("dir");
    std::fs::create_dir_all(&sub).unwrap();
    h.content.ensure_path_existence(&sub).unwrap();
    let with_slash = format!("{}/", sub.display());
    let found = h
        .content
        .database()
        .find_object_by_path(Path::new(&with_slash), FileType::Directory)
        .unwrap();
    assert!(found.is_some());
}
