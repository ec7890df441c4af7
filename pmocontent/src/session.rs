//! Sessions de l'interface web
//!
//! Chaque session accumule les containers dont l'arborescence affichée
//! doit être rafraîchie. Au-delà d'un plafond, l'accumulateur est
//! remplacé par le marqueur «tout» ; l'interrogation vide
//! l'accumulateur.

use pmocds::{ObjectId, INVALID_OBJECT_ID};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Plafond d'identifiants retenus par session.
const MAX_UI_UPDATE_IDS: usize = 10;

#[derive(Debug)]
struct Session {
    id: String,
    ui_update_ids: HashSet<ObjectId>,
    update_all: bool,
}

impl Session {
    fn container_changed(&mut self, object_id: ObjectId) {
        if self.update_all || object_id == INVALID_OBJECT_ID {
            return;
        }
        self.ui_update_ids.insert(object_id);
        if self.ui_update_ids.len() >= MAX_UI_UPDATE_IDS {
            self.ui_update_ids.clear();
            self.update_all = true;
        }
    }

    fn take_update_ids(&mut self) -> String {
        if self.update_all {
            self.update_all = false;
            return "all".to_string();
        }
        let mut ids: Vec<ObjectId> = self.ui_update_ids.drain().collect();
        ids.sort_unstable();
        ids.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Gestionnaire des sessions de l'interface web.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<Vec<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ouvre une session et retourne son identifiant.
    pub fn new_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        debug!(session = %id, "New UI session");
        self.sessions.lock().unwrap().push(Session {
            id: id.clone(),
            ui_update_ids: HashSet::new(),
            update_all: false,
        });
        id
    }

    pub fn remove_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().retain(|s| s.id != session_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Signale à toutes les sessions qu'un container a changé.
    pub fn container_changed_ui(&self, object_id: ObjectId) {
        let mut sessions = self.sessions.lock().unwrap();
        for session in sessions.iter_mut() {
            session.container_changed(object_id);
        }
    }

    /// Variante par lot de [`SessionManager::container_changed_ui`].
    pub fn containers_changed_ui(&self, object_ids: &[ObjectId]) {
        let mut sessions = self.sessions.lock().unwrap();
        for session in sessions.iter_mut() {
            if session.update_all {
                continue;
            }
            if session.ui_update_ids.len() + object_ids.len() >= MAX_UI_UPDATE_IDS {
                session.ui_update_ids.clear();
                session.update_all = true;
            } else {
                for id in object_ids {
                    session.container_changed(*id);
                }
            }
        }
    }

    /// Rend les identifiants accumulés d'une session («all» ou CSV) et
    /// vide son accumulateur.
    pub fn get_ui_update_ids(&self, session_id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .map(Session::take_update_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_returns_csv_and_clears() {
        let manager = SessionManager::new();
        let session = manager.new_session();
        manager.container_changed_ui(3);
        manager.container_changed_ui(1);
        manager.container_changed_ui(3);
        assert_eq!(manager.get_ui_update_ids(&session).unwrap(), "1,3");
        assert_eq!(manager.get_ui_update_ids(&session).unwrap(), "");
    }

    #[test]
    fn overflow_collapses_to_all_exactly_once() {
        let manager = SessionManager::new();
        let session = manager.new_session();
        for id in 0..MAX_UI_UPDATE_IDS as ObjectId + 3 {
            manager.container_changed_ui(id + 1);
        }
        assert_eq!(manager.get_ui_update_ids(&session).unwrap(), "all");
        assert_eq!(manager.get_ui_update_ids(&session).unwrap(), "");
    }

    #[test]
    fn batch_overflow_collapses_too() {
        let manager = SessionManager::new();
        let session = manager.new_session();
        let ids: Vec<ObjectId> = (1..=MAX_UI_UPDATE_IDS as ObjectId).collect();
        manager.containers_changed_ui(&ids);
        assert_eq!(manager.get_ui_update_ids(&session).unwrap(), "all");
    }

    #[test]
    fn unknown_session_yields_none() {
        let manager = SessionManager::new();
        assert!(manager.get_ui_update_ids("nope").is_none());
    }
}
