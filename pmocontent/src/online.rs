//! Services en ligne
//!
//! Un service en ligne alimente le Content Directory en items virtuels
//! tirés d'un catalogue distant. Le rafraîchissement est paginé : tant
//! que le service annonce une suite, une nouvelle tâche est replanifiée
//! en priorité basse. A la fin d'un cycle, les items dont l'horodatage
//! de mise à jour est plus vieux que l'intervalle de purge du service
//! sont retirés.

use crate::content::ContentManager;
use crate::error::{ContentError, Result};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Capacités d'un service en ligne.
pub trait OnlineService: Send + Sync {
    /// Nom lisible du service.
    fn service_name(&self) -> &str;

    /// Identifiant stable du service (paramètre de timer).
    fn service_id(&self) -> &str;

    /// Lettre préfixant les identifiants des items du service, afin que
    /// deux services ne puissent pas entrer en collision.
    fn storage_prefix(&self) -> char;

    /// Période de rafraîchissement ; zéro désactive la replanification.
    fn refresh_interval(&self) -> Duration;

    /// Age au-delà duquel un item du service est purgé ; zéro désactive
    /// la purge.
    fn item_purge_interval(&self) -> Duration;

    /// Récupère une page du catalogue et crée/actualise les items.
    ///
    /// Retourne `true` s'il reste des pages à récupérer.
    fn refresh_service_data(&self, content: &ContentManager) -> Result<bool>;
}

/// Un service enregistré et son compteur de tâches en vol.
pub struct RegisteredService {
    service: Arc<dyn OnlineService>,
    task_count: AtomicI32,
}

impl RegisteredService {
    pub fn service(&self) -> &Arc<dyn OnlineService> {
        &self.service
    }

    pub fn task_count(&self) -> i32 {
        self.task_count.load(Ordering::SeqCst)
    }

    pub fn inc_task_count(&self) {
        self.task_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_task_count(&self) -> i32 {
        self.task_count.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

/// Liste des services en ligne enregistrés.
#[derive(Default)]
pub struct OnlineServiceList {
    services: Mutex<Vec<Arc<RegisteredService>>>,
}

impl OnlineServiceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un service. L'identifiant et le préfixe doivent être
    /// uniques.
    pub fn register(&self, service: Arc<dyn OnlineService>) -> Result<()> {
        let mut services = self.services.lock().unwrap();
        if services
            .iter()
            .any(|s| s.service.service_id() == service.service_id())
        {
            return Err(ContentError::Conflict(format!(
                "online service '{}' already registered",
                service.service_id()
            )));
        }
        if services
            .iter()
            .any(|s| s.service.storage_prefix() == service.storage_prefix())
        {
            return Err(ContentError::Conflict(format!(
                "storage prefix '{}' already taken",
                service.storage_prefix()
            )));
        }
        services.push(Arc::new(RegisteredService {
            service,
            task_count: AtomicI32::new(0),
        }));
        Ok(())
    }

    pub fn get(&self, service_id: &str) -> Option<Arc<RegisteredService>> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.service.service_id() == service_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<RegisteredService>> {
        self.services.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.services.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(char, &'static str);

    impl OnlineService for Dummy {
        fn service_name(&self) -> &str {
            "Dummy"
        }

        fn service_id(&self) -> &str {
            self.1
        }

        fn storage_prefix(&self) -> char {
            self.0
        }

        fn refresh_interval(&self) -> Duration {
            Duration::ZERO
        }

        fn item_purge_interval(&self) -> Duration {
            Duration::ZERO
        }

        fn refresh_service_data(&self, _content: &ContentManager) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn prefixes_and_ids_are_unique() {
        let list = OnlineServiceList::new();
        list.register(Arc::new(Dummy('T', "one"))).unwrap();
        assert!(matches!(
            list.register(Arc::new(Dummy('T', "two"))),
            Err(ContentError::Conflict(_))
        ));
        assert!(matches!(
            list.register(Arc::new(Dummy('S', "one"))),
            Err(ContentError::Conflict(_))
        ));
        list.register(Arc::new(Dummy('S', "two"))).unwrap();
        assert!(list.get("one").is_some());
        assert!(list.get("missing").is_none());
    }
}
