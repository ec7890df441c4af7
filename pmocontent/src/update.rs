//! Propagation des mises à jour UPnP
//!
//! Les identifiants de containers dont l'ensemble d'enfants a changé
//! sont accumulés puis transmis par lots au collaborateur d'événements
//! UPnP (GENA). Le vidage est déclenché par le timer ou dès que
//! l'accumulateur grossit trop.

use pmocds::{ObjectId, INVALID_OBJECT_ID};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Taille d'accumulateur au-delà de laquelle on vide sans attendre le
/// timer.
const FLUSH_THRESHOLD: usize = 32;

/// Collaborateur recevant les notifications de containers modifiés.
pub trait UpdateSink: Send + Sync {
    fn containers_changed(&self, ids: &[ObjectId]);
}

/// Puits de notifications inactif.
#[derive(Debug, Default)]
pub struct NullUpdateSink;

impl UpdateSink for NullUpdateSink {
    fn containers_changed(&self, _ids: &[ObjectId]) {}
}

/// Accumulateur des containers modifiés côté UPnP.
pub struct UpdateManager {
    sink: Arc<dyn UpdateSink>,
    pending: Mutex<Vec<ObjectId>>,
}

impl UpdateManager {
    pub fn new(sink: Arc<dyn UpdateSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Enregistre un container modifié. Les identifiants invalides sont
    /// ignorés, les doublons absorbés.
    pub fn container_changed(&self, id: ObjectId) {
        if id == INVALID_OBJECT_ID {
            return;
        }
        let flush = {
            let mut pending = self.pending.lock().unwrap();
            if !pending.contains(&id) {
                debug!(id, "container changed");
                pending.push(id);
            }
            pending.len() >= FLUSH_THRESHOLD
        };
        if flush {
            self.flush();
        }
    }

    /// Enregistre un lot de containers modifiés.
    pub fn containers_changed(&self, ids: &[ObjectId]) {
        for id in ids {
            self.container_changed(*id);
        }
    }

    /// Transmet l'accumulateur au collaborateur et le vide.
    pub fn flush(&self) {
        let batch: Vec<ObjectId> = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if !batch.is_empty() {
            debug!(count = batch.len(), "flushing container updates");
            self.sink.containers_changed(&batch);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<ObjectId>>>,
    }

    impl UpdateSink for RecordingSink {
        fn containers_changed(&self, ids: &[ObjectId]) {
            self.batches.lock().unwrap().push(ids.to_vec());
        }
    }

    #[test]
    fn duplicates_and_invalid_ids_are_absorbed() {
        let sink = Arc::new(RecordingSink::default());
        let updates = UpdateManager::new(sink.clone() as Arc<dyn UpdateSink>);
        updates.container_changed(5);
        updates.container_changed(5);
        updates.container_changed(INVALID_OBJECT_ID);
        assert_eq!(updates.pending_count(), 1);
        updates.flush();
        assert_eq!(*sink.batches.lock().unwrap(), vec![vec![5]]);
        // flushing an empty accumulator stays silent
        updates.flush();
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn threshold_triggers_immediate_flush() {
        let sink = Arc::new(RecordingSink::default());
        let updates = UpdateManager::new(sink.clone() as Arc<dyn UpdateSink>);
        for id in 0..FLUSH_THRESHOLD as ObjectId + 1 {
            updates.container_changed(id + 1);
        }
        assert!(!sink.batches.lock().unwrap().is_empty());
    }
}
