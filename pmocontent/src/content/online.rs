//! Rafraîchissement des services en ligne
//!
//! Les tâches de rafraîchissement tournent sur la file du task
//! processor pour ne pas bloquer les importations locales. Un cycle
//! terminé déclenche la purge des items périmés puis le réarmement du
//! timer du service.

use super::ContentManager;
use crate::error::{ContentError, Result};
use crate::online::{OnlineService, RegisteredService};
use crate::task::{Task, TaskOwner, TaskPayload};
use crate::timer::TimerParameter;
use pmocds::ONLINE_SERVICE_LAST_UPDATE;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl ContentManager {
    /// Enregistre un service en ligne et arme son premier
    /// rafraîchissement.
    pub fn register_online_service(&self, service: Arc<dyn OnlineService>) -> Result<()> {
        let service_id = service.service_id().to_string();
        let refresh = service.refresh_interval();
        self.services.register(service)?;
        info!(service = %service_id, "📡 Online service registered");
        if !refresh.is_zero() {
            self.timer().add_subscriber(
                self.weak_subscriber(),
                refresh,
                TimerParameter::OnlineContent {
                    service_id: service_id.clone(),
                },
                true,
                true,
            )?;
        }
        Ok(())
    }

    /// Demande un cycle de rafraîchissement d'un service.
    pub fn fetch_online_content(
        &self,
        service_id: &str,
        low_priority: bool,
        cancellable: bool,
        unscheduled: bool,
    ) -> Result<()> {
        let Some(registered) = self.services.get(service_id) else {
            return Err(ContentError::NotFound(format!(
                "online service '{service_id}' is not registered"
            )));
        };
        registered.inc_task_count();
        let task = Task::new(
            TaskOwner::ContentManager,
            TaskPayload::FetchOnlineContent {
                service_id: service_id.to_string(),
                unscheduled,
            },
        )
        .with_description(format!(
            "Updating content from {}",
            registered.service().service_name()
        ))
        .with_cancellable(cancellable);
        self.add_task(task, low_priority);
        Ok(())
    }

    /// Exécute une tâche de la file du task processor.
    pub(crate) fn run_service_task(&self, task: &Task) -> Result<()> {
        let TaskPayload::FetchOnlineContent {
            service_id,
            unscheduled,
        } = task.payload().clone()
        else {
            debug!("unexpected task on the task processor queue");
            return Ok(());
        };
        let Some(registered) = self.services.get(&service_id) else {
            debug!(service = %service_id, "service vanished before refresh");
            return Ok(());
        };

        let result = self.run_service_refresh(&registered, task, unscheduled);

        if registered.dec_task_count() == 0 {
            let refresh = registered.service().refresh_interval();
            if !refresh.is_zero() && !unscheduled {
                let _ = self.timer().add_subscriber(
                    self.weak_subscriber(),
                    refresh,
                    TimerParameter::OnlineContent {
                        service_id: service_id.clone(),
                    },
                    true,
                    true,
                );
            }
        }
        result
    }

    fn run_service_refresh(
        &self,
        registered: &Arc<RegisteredService>,
        task: &Task,
        unscheduled: bool,
    ) -> Result<()> {
        self.check_shutdown()?;
        let service = registered.service();
        let more = service.refresh_service_data(self)?;

        if more && task.is_valid() {
            debug!(
                service = service.service_name(),
                "scheduling another refresh page"
            );
            if !service.refresh_interval().is_zero() || unscheduled {
                registered.inc_task_count();
                let next = Task::new(
                    TaskOwner::TaskProcessor,
                    TaskPayload::FetchOnlineContent {
                        service_id: service.service_id().to_string(),
                        unscheduled,
                    },
                )
                .with_description(task.description().to_string())
                .with_parent(task.parent_id())
                .with_cancellable(task.is_cancellable());
                self.add_processor_task(next, true);
            }
        } else {
            self.cleanup_online_service_objects(registered)?;
        }
        Ok(())
    }

    /// Purge les items du service plus vieux que son intervalle de
    /// purge.
    pub(crate) fn cleanup_online_service_objects(
        &self,
        registered: &Arc<RegisteredService>,
    ) -> Result<()> {
        let service = registered.service();
        debug!(
            service = service.service_name(),
            "finished fetch cycle"
        );
        let purge = service.item_purge_interval();
        if purge.is_zero() {
            return Ok(());
        }

        let now = self.clock().now_unix();
        let ids = self
            .database()
            .get_service_object_ids(service.storage_prefix())?;
        let mut purged = 0usize;
        for object_id in ids {
            let Ok(obj) = self.database().load_object(object_id) else {
                continue;
            };
            let Some(last_update) = obj
                .aux_value(ONLINE_SERVICE_LAST_UPDATE)
                .and_then(|v| v.parse::<i64>().ok())
            else {
                continue;
            };
            if now - last_update > purge.as_secs() as i64 {
                debug!(title = %obj.title, "purging stale online item");
                if let Err(e) = self._remove_object(object_id, false) {
                    warn!(object_id, "failed to purge online item: {e}");
                } else {
                    purged += 1;
                }
            }
        }
        if purged > 0 {
            info!(
                service = service.service_name(),
                purged, "stale online items purged"
            );
        }
        Ok(())
    }
}
