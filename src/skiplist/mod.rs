//! Concurrent ordered map backed by a skip list.
//!
//! Skip lists use probabilistic balancing instead of the strict rebalancing
//! of search trees: every inserted node draws a tower height from a geometric
//! distribution, and searches descend from the tallest level to level 0.
//! Level 0 is a doubly linked chain, which gives cheap bidirectional cursors,
//! and the list keeps a footer reference so seeking to the last element is
//! O(1).
//!
//! Locking is per node (value, forward tower and backward link each have
//! their own `RwLock`) plus one list-level lock for length, level and footer.
//! Structural writers additionally serialize on a writer mutex that readers
//! never touch, so `get` and cursors run alongside inserts and deletes.

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::cmp::Ordering;
use std::sync::{Arc, Weak};

mod cursor;
mod node;

pub use cursor::{Cursor, Iter};
use node::{Link, Node, release_chain};

/// Fraction of nodes with level `i` links that also get level `i + 1` links.
pub const P: f64 = 0.25;

pub const DEFAULT_MAX_LEVEL: usize = 32;

/// Strict total order over keys. Keys comparing `Equal` collapse into one entry.
pub trait Comparator<K>: Send + Sync {
    fn compare(&self, left: &K, right: &K) -> Ordering;
}

/// Natural order of `K`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ascending;

impl<K: Ord> Comparator<K> for Ascending {
    fn compare(&self, left: &K, right: &K) -> Ordering {
        left.cmp(right)
    }
}

/// Reverse of the natural order of `K`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Descending;

impl<K: Ord> Comparator<K> for Descending {
    fn compare(&self, left: &K, right: &K) -> Ordering {
        right.cmp(left)
    }
}

struct ListState<K, V> {
    length: usize,
    /// Highest level currently in use by any tower.
    level: usize,
    footer: Weak<Node<K, V>>,
}

/// Ordered key/value map. See the module docs for the locking discipline.
pub struct SkipList<K, V, C> {
    comparator: C,
    header: Arc<Node<K, V>>,
    state: RwLock<ListState<K, V>>,
    writer: Mutex<()>,
    max_level: usize,
}

impl<K, V, C: Comparator<K>> SkipList<K, V, C> {
    pub fn new(comparator: C) -> Self {
        Self::with_max_level(comparator, DEFAULT_MAX_LEVEL)
    }

    /// A `max_level` of 0 degrades to a plain sorted linked list.
    pub fn with_max_level(comparator: C, max_level: usize) -> Self {
        Self {
            comparator,
            header: Arc::new(Node::header(max_level + 1)),
            state: RwLock::new(ListState {
                length: 0,
                level: 0,
                footer: Weak::new(),
            }),
            writer: Mutex::new(()),
            max_level,
        }
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn len(&self) -> usize {
        self.state.read().length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn less(&self, left: &K, right: &K) -> bool {
        self.comparator.compare(left, right) == Ordering::Less
    }

    fn holds_key(&self, node: &Node<K, V>, key: &K) -> bool {
        node.key()
            .is_some_and(|k| self.comparator.compare(k, key) == Ordering::Equal)
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while level < self.max_level && rng.gen_bool(P) {
            level += 1;
        }
        level
    }

    /// Walk from the top level down to level 0, recording in `path` the last
    /// node before `key` on every level. Returns the level-0 successor of that
    /// position: the first node whose key is not less than `key`.
    pub(crate) fn find_path(&self, key: &K, mut path: Option<&mut [Arc<Node<K, V>>]>) -> Link<K, V> {
        let mut current = Arc::clone(&self.header);
        let top = self.state.read().level;
        for level in (0..=top).rev() {
            while let Some(next) = current.forward(level) {
                let advance = next.key().is_some_and(|k| self.less(k, key));
                if !advance {
                    break;
                }
                current = next;
            }
            if let Some(path) = path.as_deref_mut() {
                path[level] = Arc::clone(&current);
            }
        }
        current.next()
    }

    fn new_path(&self) -> Vec<Arc<Node<K, V>>> {
        vec![Arc::clone(&self.header); self.max_level + 1]
    }

    /// Insert `key`, or replace the value of an equal key. Returns the previous value.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        let _writer = self.writer.lock();
        let mut path = self.new_path();
        if let Some(existing) = self
            .find_path(&key, Some(path.as_mut_slice()))
            .filter(|node| self.holds_key(node, &key))
        {
            return existing.replace_value(value);
        }

        let level = self.random_level();
        let node = Arc::new(Node::new(key, value, level + 1));
        // Fully link the new tower before publishing it to readers.
        for (i, predecessor) in path.iter().enumerate().take(level + 1) {
            node.set_forward(i, predecessor.forward(i));
        }
        let predecessor = &path[0];
        node.set_backward(predecessor.key().is_some().then_some(predecessor));
        for (i, predecessor) in path.iter().enumerate().take(level + 1) {
            predecessor.set_forward(i, Some(Arc::clone(&node)));
        }
        let next = node.next();
        if let Some(next) = &next {
            next.set_backward(Some(&node));
        }

        let mut state = self.state.write();
        state.length += 1;
        state.level = state.level.max(level);
        if next.is_none() {
            state.footer = Arc::downgrade(&node);
        }
        None
    }

    /// Remove `key`. Returns the removed value, or `None` if it was absent.
    pub fn delete(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let _writer = self.writer.lock();
        let mut path = self.new_path();
        let candidate = self
            .find_path(key, Some(path.as_mut_slice()))
            .filter(|node| self.holds_key(node, key))?;

        let previous = candidate.previous();
        let next = candidate.next();
        if let Some(next) = &next {
            next.set_backward(previous.as_ref());
        }
        for (level, predecessor) in path.iter().enumerate().take(candidate.height()) {
            let links_candidate = predecessor
                .forward(level)
                .is_some_and(|n| Arc::ptr_eq(&n, &candidate));
            if links_candidate {
                predecessor.set_forward(level, candidate.forward(level));
            }
        }

        let mut state = self.state.write();
        state.length -= 1;
        if next.is_none() {
            state.footer = previous.as_ref().map(Arc::downgrade).unwrap_or_default();
        }
        while state.level > 0 && self.header.forward(state.level).is_none() {
            state.level -= 1;
        }
        candidate.value()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let _writer = self.writer.lock();
        let first = self.header.next();
        for level in 0..=self.max_level {
            self.header.set_forward(level, None);
        }
        {
            let mut state = self.state.write();
            state.length = 0;
            state.level = 0;
            state.footer = Weak::new();
        }
        release_chain(first);
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.find_path(key, None)
            .filter(|node| self.holds_key(node, key))
            .and_then(|node| node.value())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find_path(key, None)
            .is_some_and(|node| self.holds_key(&node, key))
    }

    /// First entry whose key is `>= min` under the comparator.
    pub fn get_greater_or_equal(&self, min: &K) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let node = self.find_path(min, None)?;
        Some((node.key()?.clone(), node.value()?))
    }

    /// Cursor positioned before the first element.
    pub fn iterator(&self) -> Cursor<'_, K, V, C> {
        Cursor::before(self, Arc::clone(&self.header))
    }

    /// Cursor on the first element `>= key`, or `None` if there is none.
    pub fn seek(&self, key: &K) -> Option<Cursor<'_, K, V, C>> {
        self.find_path(key, None).map(|node| Cursor::at(self, node))
    }

    pub fn seek_to_first(&self) -> Option<Cursor<'_, K, V, C>> {
        self.header.next().map(|node| Cursor::at(self, node))
    }

    pub fn seek_to_last(&self) -> Option<Cursor<'_, K, V, C>> {
        let footer = self.state.read().footer.upgrade()?;
        Some(Cursor::at(self, footer))
    }

    /// Cursor over keys in `[from, to)`, positioned before the first of them.
    pub fn range(&self, from: K, to: K) -> Cursor<'_, K, V, C> {
        let mut path = self.new_path();
        self.find_path(&from, Some(path.as_mut_slice()));
        Cursor::before(self, Arc::clone(&path[0])).bounded(from, to)
    }

    pub fn iter(&self) -> Iter<'_, K, V, C> {
        Iter::new(self.iterator())
    }
}

impl<K, V, C> Drop for SkipList<K, V, C> {
    fn drop(&mut self) {
        let mut forward = self.header.take_forward();
        release_chain(forward.first_mut().and_then(Option::take));
    }
}
