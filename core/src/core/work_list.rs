use std::collections::{HashSet, VecDeque};

use crate::core::WorkItem;
use crate::http::Person;

/// Ordered, deduplicated list of persons to refresh.
pub struct WorkList {
    queue: VecDeque<WorkItem>,
    seen: HashSet<String>,
}

impl WorkList {
    /// Creates a new, empty `WorkList`.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Builds the work list from fetched persons. Without `force`, persons
    /// that already carry image tags are skipped.
    pub fn from_persons(persons: &[Person], force: bool) -> Self {
        let mut list = Self::new();
        for person in persons {
            if force || person.needs_refresh() {
                list.add(WorkItem::new(person.id.clone(), person.name.clone()));
            }
        }
        list
    }

    /// Adds an item unless one with the same id was already queued.
    pub fn add(&mut self, item: WorkItem) {
        if self.seen.insert(item.id.clone()) {
            self.queue.push_back(item);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn into_items(self) -> Vec<WorkItem> {
        self.queue.into()
    }
}

impl Default for WorkList {
    fn default() -> Self {
        Self::new()
    }
}
