use hashbrown::HashMap;

use indexcore_common::{DocId, Mutation, ProcessedDocument};

/// The minimal equivalent of a mutation sequence on a single document id.
enum DocState {
    /// A solitary `Insert` with no preceding `Delete` in this batch.
    Insert(ProcessedDocument),
    Delete,
    /// A `Delete` immediately followed by a (possibly repeated) `Insert`.
    DeleteInsert(ProcessedDocument),
}

/// The result of coalescing one instance's drained mutation queue:
/// inserts in first-seen order, and the set of ids to delete first.
pub struct Coalesced {
    pub inserts: Vec<ProcessedDocument>,
    pub deletes: HashMap<DocId, ()>,
}

impl Coalesced {
    /// `std::collections::HashSet` to match `Index::id_intersection`'s
    /// signature directly, without a conversion at every call site.
    pub fn delete_ids(&self) -> std::collections::HashSet<DocId> {
        self.deletes.keys().copied().collect()
    }
}

/// Collapses a mutation stream into the minimal sequence per document id:
///
/// - `Insert(d)` after a `Delete(d)` in the same batch stays `[Delete, Insert]`.
/// - `Delete(d)` following a solitary `Insert(d)` cancels both (net nothing).
/// - `Delete(d)` following `[Delete, Insert(d)]` collapses to `[Delete]`.
/// - Any other sequence keeps only the latest operation.
pub fn coalesce(mutations: Vec<Mutation>) -> Coalesced {
    let mut order: Vec<DocId> = Vec::new();
    let mut states: HashMap<DocId, DocState> = HashMap::new();

    for mutation in mutations {
        let id = mutation.doc_id();
        if !order.contains(&id) {
            order.push(id);
        }

        let prev = states.remove(&id);
        let next = match (prev, mutation) {
            (None, Mutation::Insert(doc)) => Some(DocState::Insert(doc)),
            (None, Mutation::Delete(_)) => Some(DocState::Delete),
            (Some(DocState::Insert(_)), Mutation::Insert(doc)) => Some(DocState::Insert(doc)),
            (Some(DocState::Insert(_)), Mutation::Delete(_)) => None,
            (Some(DocState::Delete), Mutation::Delete(_)) => Some(DocState::Delete),
            (Some(DocState::Delete), Mutation::Insert(doc)) => Some(DocState::DeleteInsert(doc)),
            (Some(DocState::DeleteInsert(_)), Mutation::Delete(_)) => Some(DocState::Delete),
            (Some(DocState::DeleteInsert(_)), Mutation::Insert(doc)) => Some(DocState::DeleteInsert(doc)),
        };

        match next {
            Some(state) => {
                states.insert(id, state);
            }
            None => {
                states.remove(&id);
            }
        }
    }

    let mut inserts = Vec::new();
    let mut deletes = HashMap::new();
    for id in order {
        match states.get(&id) {
            Some(DocState::Insert(doc)) => inserts.push(doc.clone()),
            Some(DocState::Delete) => {
                deletes.insert(id, ());
            }
            Some(DocState::DeleteInsert(doc)) => {
                deletes.insert(id, ());
                inserts.push(doc.clone());
            }
            None => {}
        }
    }

    Coalesced { inserts, deletes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: DocId, text: &str) -> ProcessedDocument {
        ProcessedDocument::new(id, text.to_string())
    }

    #[test]
    fn insert_after_delete_keeps_both() {
        let out = coalesce(vec![Mutation::Delete(1), Mutation::Insert(doc(1, "a"))]);
        assert_eq!(out.deletes.len(), 1);
        assert_eq!(out.inserts.len(), 1);
        assert_eq!(out.inserts[0].text, "a");
    }

    #[test]
    fn delete_after_solitary_insert_cancels_both() {
        let out = coalesce(vec![Mutation::Insert(doc(1, "a")), Mutation::Delete(1)]);
        assert!(out.deletes.is_empty());
        assert!(out.inserts.is_empty());
    }

    #[test]
    fn delete_after_delete_insert_collapses_to_delete() {
        let out = coalesce(vec![
            Mutation::Delete(1),
            Mutation::Insert(doc(1, "a")),
            Mutation::Delete(1),
        ]);
        assert_eq!(out.deletes.len(), 1);
        assert!(out.inserts.is_empty());
    }

    #[test]
    fn delete_insert_delete_insert_keeps_latest_insert() {
        let out = coalesce(vec![
            Mutation::Delete(1),
            Mutation::Insert(doc(1, "stale")),
            Mutation::Delete(1),
            Mutation::Insert(doc(1, "fresh")),
        ]);
        assert_eq!(out.deletes.len(), 1);
        assert_eq!(out.inserts.len(), 1);
        assert_eq!(out.inserts[0].text, "fresh");
    }

    #[test]
    fn unrelated_ids_are_independent_and_order_preserving() {
        let out = coalesce(vec![
            Mutation::Insert(doc(2, "two")),
            Mutation::Insert(doc(1, "one")),
        ]);
        assert_eq!(out.inserts.len(), 2);
        assert_eq!(out.inserts[0].id, 2);
        assert_eq!(out.inserts[1].id, 1);
    }

    #[test]
    fn scenario_s3_delete_insert_collapse_yields_single_remove_then_insert() {
        // Submit Insert(d1), Delete(d1), Insert(d1'). The Insert/Delete pair
        // cancels (d1 was never persisted), leaving a solitary Insert behind.
        let out = coalesce(vec![
            Mutation::Insert(doc(1, "original")),
            Mutation::Delete(1),
            Mutation::Insert(doc(1, "replacement")),
        ]);
        assert!(out.deletes.is_empty());
        assert_eq!(out.inserts.len(), 1);
        assert_eq!(out.inserts[0].text, "replacement");
    }
}
