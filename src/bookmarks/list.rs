//! The locally cached bookmark list.
//!
//! Two writers feed the list: the user's own create/delete results and the live
//! change feed, which echoes those same changes later (or first). Every event is
//! keyed by bookmark id and applied as insert-if-absent / remove-if-present, so any
//! interleaving or duplication of the two paths ends in the same state.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::bookmarks::model::{Bookmark, BookmarkChange};

/// An input to [`BookmarkList::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    /// Result of a full fetch
    Loaded(Vec<Bookmark>),
    /// A row known to exist in the store
    Inserted(Bookmark),
    /// A row known to be gone from the store
    Removed { id: String, user_id: Option<String> },
}

impl From<BookmarkChange> for ListEvent {
    fn from(change: BookmarkChange) -> Self {
        match change {
            BookmarkChange::Inserted(bookmark) => ListEvent::Inserted(bookmark),
            BookmarkChange::Deleted { id, user_id } => ListEvent::Removed { id, user_id },
        }
    }
}

/// Bookmarks of one owner, newest first
#[derive(Debug, Clone)]
pub struct BookmarkList {
    owner: String,
    items: Vec<Bookmark>,
    // Store ids are never reused, so a removed id must not come back from a late
    // insert echo or a fetch that started before the delete.
    removed: HashSet<String>,
    loaded: bool,
}

/// Newest first; ties broken by id so the order is total
fn display_order(a: &Bookmark, b: &Bookmark) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

impl BookmarkList {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            items: Vec::new(),
            removed: HashSet::new(),
            loaded: false,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn items(&self) -> &[Bookmark] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|b| b.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|b| b.id.as_str()).collect()
    }

    /// Apply one event. Returns whether the visible list changed.
    pub fn apply(&mut self, event: ListEvent) -> bool {
        match event {
            ListEvent::Loaded(rows) => {
                self.loaded = true;
                let mut changed = false;
                for row in rows {
                    changed |= self.insert(row);
                }
                changed
            }
            ListEvent::Inserted(row) => self.insert(row),
            ListEvent::Removed { id, user_id } => {
                if user_id.as_deref().map_or(false, |owner| owner != self.owner) {
                    return false;
                }
                let before = self.items.len();
                self.items.retain(|b| b.id != id);
                let changed = self.items.len() != before;
                // Before the first load an unknown id may still be in the pending
                // fetch; after it, only rows we held need remembering.
                if changed || !self.loaded {
                    self.removed.insert(id);
                }
                changed
            }
        }
    }

    fn insert(&mut self, row: Bookmark) -> bool {
        if row.user_id != self.owner {
            log::trace!("Skipping bookmark {} of another owner", row.id);
            return false;
        }
        if self.removed.contains(&row.id) || self.contains(&row.id) {
            return false;
        }
        let at = self
            .items
            .partition_point(|existing| display_order(existing, &row) == Ordering::Less);
        self.items.insert(at, row);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmarks::model::parse_timestamp;

    fn bookmark(id: &str, owner: &str, minute: u32) -> Bookmark {
        Bookmark {
            id: id.to_string(),
            title: format!("title {}", id),
            url: format!("https://example.com/{}", id),
            user_id: owner.to_string(),
            created_at: parse_timestamp(&format!("2024-05-01T10:{:02}:00Z", minute)).unwrap(),
        }
    }

    fn removed(id: &str) -> ListEvent {
        ListEvent::Removed {
            id: id.to_string(),
            user_id: None,
        }
    }

    #[test]
    fn load_orders_newest_first() {
        let mut list = BookmarkList::new("u1");
        list.apply(ListEvent::Loaded(vec![
            bookmark("a", "u1", 1),
            bookmark("c", "u1", 3),
            bookmark("b", "u1", 2),
        ]));
        assert_eq!(list.ids(), vec!["c", "b", "a"]);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut list = BookmarkList::new("u1");
        assert!(list.apply(ListEvent::Inserted(bookmark("a", "u1", 1))));
        assert!(!list.apply(ListEvent::Inserted(bookmark("a", "u1", 1))));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn insert_from_other_owner_is_ignored() {
        let mut list = BookmarkList::new("u1");
        assert!(!list.apply(ListEvent::Inserted(bookmark("x", "u2", 1))));
        assert!(!list.apply(ListEvent::Loaded(vec![bookmark("y", "u2", 2)])));
        assert!(list.is_empty());
    }

    #[test]
    fn removing_unknown_id_is_a_no_op() {
        let mut list = BookmarkList::new("u1");
        list.apply(ListEvent::Inserted(bookmark("a", "u1", 1)));
        assert!(!list.apply(removed("zzz")));
        assert_eq!(list.ids(), vec!["a"]);
    }

    #[test]
    fn unknown_removal_after_load_is_not_remembered() {
        let mut list = BookmarkList::new("u1");
        list.apply(ListEvent::Loaded(vec![bookmark("a", "u1", 1)]));
        assert!(!list.apply(removed("zzz")));
        assert!(!list.apply(ListEvent::Removed {
            id: "a".into(),
            user_id: Some("u2".into()),
        }));
        assert!(list.removed.is_empty());

        assert!(list.apply(removed("a")));
        assert!(list.removed.contains("a"));
    }

    #[test]
    fn removal_before_load_hides_row_from_the_fetch() {
        let mut list = BookmarkList::new("u1");
        assert!(!list.apply(removed("a")));
        assert!(!list.apply(ListEvent::Loaded(vec![bookmark("a", "u1", 1), bookmark("b", "u1", 2)])));
        assert_eq!(list.ids(), vec!["b"]);
    }

    #[test]
    fn double_remove_is_a_no_op() {
        let mut list = BookmarkList::new("u1");
        list.apply(ListEvent::Inserted(bookmark("a", "u1", 1)));
        assert!(list.apply(removed("a")));
        assert!(!list.apply(removed("a")));
        assert!(list.is_empty());
    }

    #[test]
    fn delete_carrying_another_owner_is_ignored() {
        let mut list = BookmarkList::new("u1");
        list.apply(ListEvent::Inserted(bookmark("a", "u1", 1)));
        assert!(!list.apply(ListEvent::Removed {
            id: "a".into(),
            user_id: Some("u2".into()),
        }));
        assert!(list.contains("a"));
    }

    #[test]
    fn late_insert_echo_does_not_resurrect_deleted_row() {
        let mut list = BookmarkList::new("u1");
        list.apply(removed("a"));
        assert!(!list.apply(ListEvent::Inserted(bookmark("a", "u1", 1))));
        assert!(!list.apply(ListEvent::Loaded(vec![bookmark("a", "u1", 1)])));
        assert!(list.is_empty());
    }

    #[test]
    fn load_merges_with_rows_that_arrived_live() {
        let mut list = BookmarkList::new("u1");
        list.apply(ListEvent::Inserted(bookmark("new", "u1", 5)));
        list.apply(ListEvent::Loaded(vec![bookmark("old", "u1", 1), bookmark("new", "u1", 5)]));
        assert_eq!(list.ids(), vec!["new", "old"]);
    }

    #[test]
    fn same_timestamp_orders_by_id() {
        let mut list = BookmarkList::new("u1");
        list.apply(ListEvent::Inserted(bookmark("a", "u1", 1)));
        list.apply(ListEvent::Inserted(bookmark("b", "u1", 1)));
        assert_eq!(list.ids(), vec!["b", "a"]);
    }

    /// Every interleaving of the optimistic path and the echo path of the same
    /// create and delete converges on the store's contents.
    #[test]
    fn interleavings_converge_on_store_contents() {
        let events = vec![
            ListEvent::Inserted(bookmark("a", "u1", 1)), // create result
            ListEvent::Inserted(bookmark("a", "u1", 1)), // realtime echo
            ListEvent::Inserted(bookmark("b", "u1", 2)), // create result
            ListEvent::Inserted(bookmark("b", "u1", 2)), // realtime echo
            removed("a"),                                // delete result
            removed("a"),                                // realtime echo
            ListEvent::Inserted(bookmark("z", "u2", 3)), // foreign insert
        ];

        // Causal order within one id: the delete of `a` only ever happens after the
        // row existed, but either of its two events may arrive first.
        let orders: Vec<Vec<usize>> = vec![
            vec![0, 1, 2, 3, 4, 5, 6],
            vec![1, 0, 3, 2, 5, 4, 6],
            vec![0, 4, 1, 5, 2, 3, 6],
            vec![6, 2, 0, 5, 1, 3, 4],
            vec![4, 5, 0, 1, 2, 3, 6],
            vec![3, 1, 6, 4, 2, 0, 5],
        ];

        for order in orders {
            let mut list = BookmarkList::new("u1");
            for i in &order {
                list.apply(events[*i].clone());
            }
            assert_eq!(list.ids(), vec!["b"], "order {:?}", order);
        }
    }
}
