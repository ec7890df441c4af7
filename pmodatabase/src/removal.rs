//! Calcul des suppressions en cascade
//!
//! La logique de cascade est la même pour toutes les implémentations :
//! descendance des containers, copies virtuelles entraînées par leur
//! original, et option `all` qui remonte d'une copie vers l'original.
//! Elle est isolée ici sur un instantané minimal des lignes pour être
//! testable sans base.

use crate::ChangedContainers;
use pmocds::ObjectId;
use std::collections::{HashMap, HashSet};

/// Projection minimale d'un objet pour le calcul de cascade.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjRow {
    pub id: ObjectId,
    pub parent_id: ObjectId,
    pub ref_id: ObjectId,
    pub is_container: bool,
}

/// Résultat d'un plan de suppression.
#[derive(Debug, Default)]
pub(crate) struct RemovalPlan {
    /// Tous les identifiants à retirer de la base.
    pub removed: HashSet<ObjectId>,
    /// Containers survivants dont l'ensemble d'enfants change.
    pub changed: ChangedContainers,
}

/// Calcule l'ensemble des objets emportés par la suppression de `roots`.
pub(crate) fn plan_removal(rows: &[ObjRow], roots: &[ObjectId], all: bool) -> RemovalPlan {
    let by_id: HashMap<ObjectId, &ObjRow> = rows.iter().map(|r| (r.id, r)).collect();
    let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
    let mut referrers: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
    for row in rows {
        children.entry(row.parent_id).or_default().push(row.id);
        if row.ref_id != 0 {
            referrers.entry(row.ref_id).or_default().push(row.id);
        }
    }

    let mut removed: HashSet<ObjectId> = HashSet::new();
    let mut stack: Vec<ObjectId> = roots.to_vec();

    // with `all`, removing a virtual copy also removes its original
    if all {
        for id in roots {
            if let Some(row) = by_id.get(id) {
                if row.ref_id != 0 {
                    stack.push(row.ref_id);
                }
            }
        }
    }

    while let Some(id) = stack.pop() {
        if !removed.insert(id) || !by_id.contains_key(&id) {
            continue;
        }
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().copied());
        }
        // referencing copies never outlive their target
        if let Some(refs) = referrers.get(&id) {
            stack.extend(refs.iter().copied());
        }
    }
    removed.retain(|id| by_id.contains_key(id));

    let mut upnp: Vec<ObjectId> = Vec::new();
    let mut ui: Vec<ObjectId> = Vec::new();
    for id in &removed {
        let row = by_id[id];
        if removed.contains(&row.parent_id) {
            continue;
        }
        if !upnp.contains(&row.parent_id) {
            upnp.push(row.parent_id);
        }
        if row.is_container && !ui.contains(&row.parent_id) {
            ui.push(row.parent_id);
        }
    }
    upnp.sort_unstable();
    ui.sort_unstable();

    RemovalPlan {
        removed,
        changed: ChangedContainers { upnp, ui },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: ObjectId, parent_id: ObjectId, ref_id: ObjectId, is_container: bool) -> ObjRow {
        ObjRow {
            id,
            parent_id,
            ref_id,
            is_container,
        }
    }

    #[test]
    fn container_removal_takes_descendants() {
        // 0 -> 10 (dir) -> 11 (item), 12 (dir) -> 13 (item)
        let rows = vec![
            row(10, 0, 0, true),
            row(11, 10, 0, false),
            row(12, 10, 0, true),
            row(13, 12, 0, false),
        ];
        let plan = plan_removal(&rows, &[10], false);
        assert_eq!(plan.removed, HashSet::from([10, 11, 12, 13]));
        assert_eq!(plan.changed.upnp, vec![0]);
        assert_eq!(plan.changed.ui, vec![0]);
    }

    #[test]
    fn virtual_copies_follow_their_original() {
        // physical item 20, virtual copy 30 elsewhere
        let rows = vec![row(20, 1, 0, false), row(30, 5, 20, false)];
        let plan = plan_removal(&rows, &[20], false);
        assert_eq!(plan.removed, HashSet::from([20, 30]));
        assert_eq!(plan.changed.upnp, vec![1, 5]);
        assert!(plan.changed.ui.is_empty());
    }

    #[test]
    fn all_removes_original_from_a_copy() {
        let rows = vec![
            row(20, 1, 0, false),
            row(30, 5, 20, false),
            row(31, 6, 20, false),
        ];
        // without `all`, only the one copy goes
        let plan = plan_removal(&rows, &[30], false);
        assert_eq!(plan.removed, HashSet::from([30]));
        // with `all`, the original and every other copy go too
        let plan = plan_removal(&rows, &[30], true);
        assert_eq!(plan.removed, HashSet::from([20, 30, 31]));
    }
}
