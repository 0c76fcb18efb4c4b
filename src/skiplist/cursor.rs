use std::sync::Arc;

use super::node::Node;
use super::{Comparator, SkipList};

/// Bidirectional cursor over a [`SkipList`].
///
/// A cursor returned by [`SkipList::iterator`] or [`SkipList::range`] starts
/// *before* its first element; call [`Cursor::move_next`] to land on it.
/// Cursors returned by the `seek*` methods start on an element.
///
/// Moving past either end returns `false` and leaves the cursor where it was.
pub struct Cursor<'a, K, V, C> {
    list: &'a SkipList<K, V, C>,
    anchor: Arc<Node<K, V>>,
    positioned: bool,
    lower: Option<K>,
    upper: Option<K>,
}

impl<'a, K, V, C: Comparator<K>> Cursor<'a, K, V, C> {
    pub(crate) fn before(list: &'a SkipList<K, V, C>, anchor: Arc<Node<K, V>>) -> Self {
        Self {
            list,
            anchor,
            positioned: false,
            lower: None,
            upper: None,
        }
    }

    pub(crate) fn at(list: &'a SkipList<K, V, C>, node: Arc<Node<K, V>>) -> Self {
        Self {
            list,
            anchor: node,
            positioned: true,
            lower: None,
            upper: None,
        }
    }

    pub(crate) fn bounded(mut self, lower: K, upper: K) -> Self {
        self.lower = Some(lower);
        self.upper = Some(upper);
        self
    }

    fn below_upper(&self, key: &K) -> bool {
        self.upper
            .as_ref()
            .is_none_or(|upper| self.list.less(key, upper))
    }

    fn above_lower(&self, key: &K) -> bool {
        self.lower
            .as_ref()
            .is_none_or(|lower| !self.list.less(key, lower))
    }

    /// Advance to the next element. Returns `false` at the end of the list or range.
    pub fn move_next(&mut self) -> bool {
        let Some(next) = self.anchor.next() else {
            return false;
        };
        if !next.key().is_some_and(|key| self.below_upper(key)) {
            return false;
        }
        self.anchor = next;
        self.positioned = true;
        true
    }

    /// Step back to the previous element. Returns `false` at the front of the list or range.
    pub fn move_prev(&mut self) -> bool {
        if !self.positioned {
            return false;
        }
        let Some(previous) = self.anchor.previous() else {
            return false;
        };
        if !previous.key().is_some_and(|key| self.above_lower(key)) {
            return false;
        }
        self.anchor = previous;
        true
    }

    /// Reposition on the first element `>= key` (under the list's comparator)
    /// that lies inside this cursor's bounds.
    pub fn seek(&mut self, key: &K) -> bool {
        if !self.above_lower(key) || !self.below_upper(key) {
            return false;
        }
        let Some(node) = self.list.find_path(key, None) else {
            return false;
        };
        if !node.key().is_some_and(|k| self.below_upper(k)) {
            return false;
        }
        self.anchor = node;
        self.positioned = true;
        true
    }

    pub fn key(&self) -> Option<&K> {
        if self.positioned {
            self.anchor.key()
        } else {
            None
        }
    }
}

impl<K: Clone, V: Clone, C: Comparator<K>> Cursor<'_, K, V, C> {
    pub fn value(&self) -> Option<V> {
        if self.positioned {
            self.anchor.value()
        } else {
            None
        }
    }

    pub fn entry(&self) -> Option<(K, V)> {
        Some((self.key()?.clone(), self.value()?))
    }
}

/// Forward iterator yielding cloned `(key, value)` pairs.
pub struct Iter<'a, K, V, C> {
    cursor: Cursor<'a, K, V, C>,
}

impl<'a, K, V, C> Iter<'a, K, V, C> {
    pub(crate) fn new(cursor: Cursor<'a, K, V, C>) -> Self {
        Self { cursor }
    }
}

impl<K: Clone, V: Clone, C: Comparator<K>> Iterator for Iter<'_, K, V, C> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.move_next() {
            self.cursor.entry()
        } else {
            None
        }
    }
}
