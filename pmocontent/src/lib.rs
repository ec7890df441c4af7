//! # pmocontent - Cœur d'importation de la bibliothèque média
//!
//! Ce crate maintient le Content Directory en phase avec le système de
//! fichiers et les services en ligne. Il regroupe :
//!
//! - **ContentManager** : la façade du cœur ([`ContentManager`]), qui
//!   possède le timer, les files de tâches, le watcher inotify, les
//!   autoscans et les services en ligne
//! - **Tâches** : file sérialisée à deux priorités avec invalidation
//!   ([`task`], [`processor`])
//! - **Autoscan** : balayages périodiques ([`content`]) et surveillance
//!   inotify ([`inotify`])
//! - **Services en ligne** : rafraîchissement paginé et purge des items
//!   périmés ([`online`], [`feed`])
//! - **Propagation des mises à jour** : accumulateurs par session pour
//!   GENA et l'interface web ([`update`], [`session`])
//!
//! ## Threads et verrous
//!
//! Un thread par file de tâches, un thread pour le timer, un thread pour
//! le watcher inotify. Chaque structure partagée (files, listes
//! d'autoscan, table des watches, accumulateurs) a son propre mutex,
//! jamais tenu pendant un appel à la base de données ni pendant
//! l'exécution d'un callback.

pub mod clock;
pub mod config_ext;
pub mod content;
pub mod error;
pub mod executor;
pub mod feed;
pub mod inotify;
pub mod layout;
pub mod metadata;
pub mod online;
pub mod play_hook;
pub mod playlist;
pub mod processor;
pub mod scan_list;
pub mod session;
pub mod setting;
pub mod task;
pub mod timer;
pub mod update;

pub use clock::{Clock, FixedClock, SystemClock};
pub use content::{ContentManager, Context};
pub use error::{ContentError, Result};
pub use executor::{Executor, ProcessExecutor};
pub use feed::{FeedConfig, FeedService};
pub use layout::{BuiltinLayout, Layout};
pub use metadata::{DefaultMetadataExtractor, MetadataExtractor};
pub use online::OnlineService;
pub use playlist::PlaylistParser;
pub use session::SessionManager;
pub use task::{Task, TaskOwner, TaskPayload, TaskType};
pub use timer::{Timer, TimerParameter, TimerSubscriber};
pub use update::{UpdateManager, UpdateSink};
