//! Gestionnaire de contenu
//!
//! La façade du cœur d'importation. Le gestionnaire possède le timer,
//! les deux files de tâches, le watcher inotify, les autoscans et les
//! services en ligne ; toute mutation du Content Directory passe par
//! lui, et presque toujours par une tâche.

mod autoscan;
mod import;
mod online;
mod scan;

use crate::clock::{Clock, SystemClock};
use crate::config_ext::{ImportConfigExt, ImportMode};
use crate::error::{ContentError, Result};
use crate::executor::{Executor, ExecutorRegistry};
use crate::inotify::{AutoscanInotify, FsWatchSource};
use crate::layout::{BuiltinLayout, Layout};
use crate::metadata::{DefaultMetadataExtractor, MetadataExtractor};
use crate::online::OnlineServiceList;
use crate::playlist::PlaylistParser;
use crate::processor::TaskRunner;
use crate::scan_list::AutoscanList;
use crate::session::SessionManager;
use crate::task::{Task, TaskId, TaskOwner, TaskPayload};
use crate::timer::{Timer, TimerParameter, TimerSubscriber};
use crate::update::{NullUpdateSink, UpdateManager, UpdateSink};
use pmocds::autoscan::{ScanId, ScanMode};
use pmocds::tweak::DirectoryTweakList;
use pmodatabase::Database;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Période de vidage de l'accumulateur de notifications UPnP.
const UPDATE_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// Les collaborateurs du cœur, assemblés par le point d'entrée.
pub struct Context {
    pub config: Arc<pmoconfig::Config>,
    pub database: Arc<dyn Database>,
    pub clock: Arc<dyn Clock>,
    pub layout: Option<Arc<dyn Layout>>,
    pub metadata: Arc<dyn MetadataExtractor>,
    pub playlist_parser: Option<Arc<dyn PlaylistParser>>,
    pub update_sink: Arc<dyn UpdateSink>,
    pub watch_source: Option<Box<dyn FsWatchSource>>,
}

impl Context {
    /// Contexte avec les collaborateurs par défaut.
    pub fn new(config: Arc<pmoconfig::Config>, database: Arc<dyn Database>) -> Self {
        Self {
            config,
            database,
            clock: Arc::new(SystemClock),
            layout: Some(Arc::new(BuiltinLayout)),
            metadata: Arc::new(DefaultMetadataExtractor),
            playlist_parser: None,
            update_sink: Arc::new(NullUpdateSink),
            watch_source: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_update_sink(mut self, sink: Arc<dyn UpdateSink>) -> Self {
        self.update_sink = sink;
        self
    }

    pub fn with_watch_source(mut self, source: Box<dyn FsWatchSource>) -> Self {
        self.watch_source = Some(source);
        self
    }

    pub fn with_layout(mut self, layout: Option<Arc<dyn Layout>>) -> Self {
        self.layout = layout;
        self
    }
}

/// La façade du cœur d'importation.
pub struct ContentManager {
    pub(crate) config: Arc<pmoconfig::Config>,
    database: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    timer: Arc<Timer>,
    worker: TaskRunner,
    task_processor: TaskRunner,
    pub(crate) autoscan_timed: Mutex<AutoscanList>,
    pub(crate) autoscan_inotify: Mutex<AutoscanList>,
    inotify: Mutex<Option<Arc<AutoscanInotify>>>,
    watch_source: Mutex<Option<Box<dyn FsWatchSource>>>,
    pub(crate) services: OnlineServiceList,
    update: Arc<UpdateManager>,
    sessions: Arc<SessionManager>,
    pub(crate) layout: Option<Arc<dyn Layout>>,
    pub(crate) metadata: Arc<dyn MetadataExtractor>,
    pub(crate) playlist_parser: Option<Arc<dyn PlaylistParser>>,
    executors: ExecutorRegistry,
    total_files: AtomicU64,
    shutdown_flag: Arc<AtomicBool>,

    // options d'importation figées au démarrage
    pub(crate) ext_mime: HashMap<String, String>,
    pub(crate) mime_class: HashMap<String, String>,
    pub(crate) mime_contenttype: HashMap<String, String>,
    pub(crate) tweaks: DirectoryTweakList,
    pub(crate) import_mode: ImportMode,
    pub(crate) default_hidden: bool,
    pub(crate) default_follow_symlinks: bool,
    use_inotify: bool,
    pub(crate) config_file: PathBuf,
    self_ref: Weak<ContentManager>,
}

impl ContentManager {
    /// Assemble le gestionnaire. Les threads ne démarrent qu'avec
    /// [`ContentManager::start`].
    pub fn new(ctx: Context) -> Arc<Self> {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let config = ctx.config;
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            ext_mime: config.get_extension_mimetype_map(),
            mime_class: config.get_mimetype_upnpclass_map(),
            mime_contenttype: config.get_mimetype_contenttype_map(),
            tweaks: config.get_directory_tweaks(),
            import_mode: config.get_import_layout_mode(),
            default_hidden: config.get_import_hidden_files(),
            default_follow_symlinks: config.get_import_follow_symlinks(),
            use_inotify: config.get_autoscan_use_inotify(),
            config_file: PathBuf::from(config.get_config_file()),
            config,
            database: ctx.database,
            clock: ctx.clock,
            timer: Timer::new(),
            worker: TaskRunner::new(),
            task_processor: TaskRunner::new(),
            autoscan_timed: Mutex::new(AutoscanList::new(ScanMode::Timed)),
            autoscan_inotify: Mutex::new(AutoscanList::new(ScanMode::INotify)),
            inotify: Mutex::new(None),
            watch_source: Mutex::new(ctx.watch_source),
            services: OnlineServiceList::new(),
            update: UpdateManager::new(ctx.update_sink),
            sessions: Arc::new(SessionManager::new()),
            layout: ctx.layout,
            metadata: ctx.metadata,
            playlist_parser: ctx.playlist_parser,
            executors: ExecutorRegistry::new(Arc::clone(&shutdown_flag)),
            total_files: AtomicU64::new(0),
            shutdown_flag,
        })
    }

    /// Lien faible vers soi, pour les abonnements timer et le watcher.
    pub(crate) fn weak_self(&self) -> Weak<ContentManager> {
        self.self_ref.clone()
    }

    pub(crate) fn weak_subscriber(&self) -> Weak<dyn TimerSubscriber> {
        self.self_ref.clone() as Weak<dyn TimerSubscriber>
    }

    /// Démarre les threads du cœur et arme les autoscans connus.
    pub fn start(&self) -> Result<()> {
        info!("🗂️  Starting content manager...");
        self.timer.start();
        self.timer.add_subscriber(
            self.weak_subscriber(),
            UPDATE_FLUSH_INTERVAL,
            TimerParameter::FlushUpdates,
            false,
            true,
        )?;

        let weak = self.weak_self();
        self.worker.start("pmo-content", move |task| {
            match weak.upgrade() {
                Some(content) => content.run_task(task),
                None => Err(ContentError::ShuttingDown),
            }
        });
        let weak = self.weak_self();
        self.task_processor.start("pmo-taskproc", move |task| {
            match weak.upgrade() {
                Some(content) => content.run_service_task(task),
                None => Err(ContentError::ShuttingDown),
            }
        });

        // inotify watcher, when available and enabled
        if self.use_inotify {
            if let Some(source) = self.watch_source.lock().unwrap().take() {
                let options = crate::inotify::manager_options(self);
                let inotify = AutoscanInotify::start(self.weak_self(), source, options);
                *self.inotify.lock().unwrap() = Some(inotify);
            } else {
                warn!("Inotify requested but no watch source available");
            }
        }

        if let Some(magic_file) = self.config.get_magic_file() {
            warn!(
                file = %magic_file.display(),
                "Content sniffing is not compiled in, the magic file is ignored"
            );
        }

        self.load_autoscans()?;

        // initial accounting pass
        self.add_task(
            Task::new(TaskOwner::ContentManager, TaskPayload::LoadAccounting)
                .with_description("Initializing statistics"),
            false,
        );
        Ok(())
    }

    /// Arrêt ordonné : plus aucune tâche nouvelle, fin des tâches non
    /// annulables en vol, threads joints, exécuteurs tués.
    pub fn shutdown(&self) {
        info!("🗂️  Shutting down content manager...");
        self.shutdown_flag.store(true, Ordering::SeqCst);

        // persist the scan cursors before the threads go away
        debug!("Updating last_modified data for autoscans in database");
        for adir in self.autoscan_inotify.lock().unwrap().iter() {
            if let Ok(metadata) = std::fs::metadata(adir.location()) {
                if let Ok(mtime) = metadata.modified() {
                    if let Ok(secs) = mtime.duration_since(std::time::UNIX_EPOCH) {
                        adir.set_current_lmt(secs.as_secs() as i64);
                    }
                }
            }
            adir.update_lmt();
        }
        let timed = self.autoscan_timed.lock().unwrap().all();
        if let Err(e) = self.database.update_autoscan_list(ScanMode::Timed, &timed) {
            error!("Failed to persist timed autoscans: {e}");
        }
        let inotify_list = self.autoscan_inotify.lock().unwrap().all();
        if let Err(e) = self
            .database
            .update_autoscan_list(ScanMode::INotify, &inotify_list)
        {
            error!("Failed to persist inotify autoscans: {e}");
        }

        if let Some(inotify) = self.inotify.lock().unwrap().take() {
            inotify.shutdown();
        }
        self.timer.shutdown();
        self.worker.shutdown();
        self.task_processor.shutdown();
        self.executors.kill_all();
        self.update.flush();
        info!("🗂️  Content manager stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    pub(crate) fn check_shutdown(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(ContentError::ShuttingDown);
        }
        Ok(())
    }

    // -- accès aux collaborateurs -------------------------------------------

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn update_manager(&self) -> &Arc<UpdateManager> {
        &self.update
    }

    pub fn inotify(&self) -> Option<Arc<AutoscanInotify>> {
        self.inotify.lock().unwrap().clone()
    }

    pub fn total_files(&self) -> u64 {
        self.total_files.load(Ordering::SeqCst)
    }

    pub(crate) fn set_total_files(&self, total: u64) {
        self.total_files.store(total, Ordering::SeqCst);
    }

    pub(crate) fn bump_total_files(&self) {
        self.total_files.fetch_add(1, Ordering::SeqCst);
    }

    // -- mappings -----------------------------------------------------------

    pub fn extension_to_mimetype(&self, extension: &str) -> Option<String> {
        self.ext_mime.get(&extension.to_lowercase()).cloned()
    }

    /// Classe UPnP d'un type MIME, avec repli sur l'entrée `type/*`.
    pub fn mimetype_to_upnpclass(&self, mimetype: &str) -> Option<String> {
        if let Some(class) = self.mime_class.get(mimetype) {
            return Some(class.clone());
        }
        let group = mimetype.split('/').next()?;
        self.mime_class.get(&format!("{group}/*")).cloned()
    }

    pub fn contenttype_for_mimetype(&self, mimetype: &str) -> Option<String> {
        self.mime_contenttype.get(mimetype).cloned()
    }

    // -- tâches -------------------------------------------------------------

    /// Dépose une tâche sur la file du gestionnaire. Pendant l'arrêt, la
    /// tâche est refusée.
    pub fn add_task(&self, task: Task, low_priority: bool) -> TaskId {
        if self.is_shutting_down() {
            debug!("Task refused, server is shutting down");
            return 0;
        }
        self.worker.queue().enqueue(task, low_priority)
    }

    pub(crate) fn add_processor_task(&self, task: Task, low_priority: bool) -> TaskId {
        if self.is_shutting_down() {
            return 0;
        }
        self.task_processor.queue().enqueue(task, low_priority)
    }

    /// Invalide une tâche (et ses tâches filles) chez son propriétaire.
    pub fn invalidate_task(&self, task_id: TaskId, owner: TaskOwner) {
        match owner {
            TaskOwner::ContentManager => self.worker.queue().invalidate(task_id),
            TaskOwner::TaskProcessor => self.task_processor.queue().invalidate(task_id),
        }
    }

    pub fn get_current_task(&self) -> Option<Task> {
        self.worker.queue().current_task()
    }

    /// Instantané des deux files : tâche courante d'abord.
    pub fn task_list(&self) -> Vec<Task> {
        let mut list = self.worker.queue().task_list();
        list.extend(self.task_processor.queue().task_list());
        list
    }

    pub(crate) fn worker_queue(&self) -> &Arc<crate::task::TaskQueue> {
        self.worker.queue()
    }

    /// Exécute une tâche de la file du gestionnaire.
    fn run_task(&self, task: &Task) -> Result<()> {
        match task.payload().clone() {
            TaskPayload::AddFile {
                path,
                rootpath,
                recursive,
                hidden,
            } => {
                self._add_file(&path, &rootpath, recursive, hidden, Some(task))
                    .map(|_| ())
            }
            TaskPayload::RemoveObject { object_id, all } => self._remove_object(object_id, all),
            TaskPayload::LoadAccounting => self._load_accounting(),
            TaskPayload::RescanDirectory {
                object_id,
                scan_id,
                scan_mode,
            } => self.run_rescan_task(object_id, scan_id, scan_mode, task),
            TaskPayload::FetchOnlineContent {
                service_id,
                unscheduled,
            } => {
                // hand over to the task processor queue
                let forwarded = Task::new(
                    TaskOwner::TaskProcessor,
                    TaskPayload::FetchOnlineContent {
                        service_id,
                        unscheduled,
                    },
                )
                .with_description(task.description().to_string())
                .with_parent(task.id())
                .with_cancellable(task.is_cancellable());
                self.add_processor_task(forwarded, false);
                Ok(())
            }
        }
    }

    fn run_rescan_task(
        &self,
        object_id: pmocds::ObjectId,
        scan_id: ScanId,
        scan_mode: ScanMode,
        task: &Task,
    ) -> Result<()> {
        let Some(adir) = self.get_autoscan_directory(scan_id, scan_mode) else {
            return Ok(());
        };
        let result = self._rescan_directory(object_id, &adir, task);
        if adir.dec_task_count() == 0 {
            adir.update_lmt();
            if adir.is_valid() {
                if let Err(e) = self.database.update_autoscan_directory(&adir) {
                    debug!("Could not persist autoscan cursor: {e}");
                }
                if adir.scan_mode() == ScanMode::Timed {
                    let _ = self.timer.add_subscriber(
                        self.weak_subscriber(),
                        adir.interval(),
                        TimerParameter::Autoscan {
                            scan_id: adir.scan_id(),
                            mode: ScanMode::Timed,
                        },
                        true,
                        true,
                    );
                }
            }
        }
        result
    }

    fn _load_accounting(&self) -> Result<()> {
        let total = self.database.get_total_files()?;
        self.set_total_files(total);
        debug!(total, "Accounting reloaded");
        Ok(())
    }

    // -- exécuteurs ---------------------------------------------------------

    pub fn register_executor(&self, executor: &Arc<dyn Executor>) {
        self.executors.register(executor);
    }

    pub fn unregister_executor(&self, executor: &Arc<dyn Executor>) {
        self.executors.unregister(executor);
    }

    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }

    // -- chargement initial -------------------------------------------------

    fn load_autoscans(&self) -> Result<()> {
        for mode in [ScanMode::Timed, ScanMode::INotify] {
            let stored = self.database.get_autoscan_list(mode)?;
            for adir in stored {
                if let Err(e) = self.arm_autoscan(&adir) {
                    warn!(
                        location = %adir.location().display(),
                        "Could not arm stored autoscan: {e}"
                    );
                }
            }
        }
        let configured = self
            .config
            .get_autoscan_timed_list()
            .into_iter()
            .chain(self.config.get_autoscan_inotify_list());
        for adir in configured {
            if self.get_autoscan_by_location(adir.location()).is_some() {
                continue; // already armed from the database
            }
            if let Err(e) = self.set_autoscan_directory(adir.clone()) {
                warn!(
                    location = %adir.location().display(),
                    "Could not register configured autoscan: {e}"
                );
            }
        }
        let timed = self.autoscan_timed.lock().unwrap().len();
        let watched = self.autoscan_inotify.lock().unwrap().len();
        info!("✅ {timed} timed and {watched} inotify autoscan(s) armed");
        Ok(())
    }
}

impl TimerSubscriber for ContentManager {
    fn timer_notify(&self, parameter: &TimerParameter) {
        match parameter {
            TimerParameter::Autoscan { scan_id, mode } => {
                let Some(adir) = self.get_autoscan_directory(*scan_id, *mode) else {
                    return;
                };
                self.rescan_directory(adir.object_id(), *scan_id, *mode, None, true);
            }
            TimerParameter::OnlineContent { service_id } => {
                if let Err(e) = self.fetch_online_content(service_id, true, true, false) {
                    warn!(service = %service_id, "Scheduled online refresh failed: {e}");
                }
            }
            TimerParameter::FlushUpdates => self.update.flush(),
        }
    }
}
