use parking_lot::RwLock;
use std::sync::{Arc, Weak};

pub(crate) type Link<K, V> = Option<Arc<Node<K, V>>>;

/// A tower in the skip list. Each piece of mutable state sits behind its own
/// lock so readers only contend with writers touching the same node.
pub(crate) struct Node<K, V> {
    /// `None` only on the header sentinel.
    key: Option<K>,
    value: RwLock<Option<V>>,
    forward: RwLock<Vec<Link<K, V>>>,
    backward: RwLock<Weak<Node<K, V>>>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn header(height: usize) -> Self {
        Self {
            key: None,
            value: RwLock::new(None),
            forward: RwLock::new(vec![None; height]),
            backward: RwLock::new(Weak::new()),
        }
    }

    pub(crate) fn new(key: K, value: V, height: usize) -> Self {
        Self {
            key: Some(key),
            value: RwLock::new(Some(value)),
            forward: RwLock::new(vec![None; height]),
            backward: RwLock::new(Weak::new()),
        }
    }

    pub(crate) fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub(crate) fn height(&self) -> usize {
        self.forward.read().len()
    }

    pub(crate) fn forward(&self, level: usize) -> Link<K, V> {
        self.forward.read().get(level).cloned().flatten()
    }

    pub(crate) fn set_forward(&self, level: usize, link: Link<K, V>) {
        if let Some(slot) = self.forward.write().get_mut(level) {
            *slot = link;
        }
    }

    /// Detach the whole forward tower, leaving the node with no successors.
    pub(crate) fn take_forward(&self) -> Vec<Link<K, V>> {
        std::mem::take(&mut *self.forward.write())
    }

    pub(crate) fn next(&self) -> Link<K, V> {
        self.forward(0)
    }

    pub(crate) fn previous(&self) -> Link<K, V> {
        self.backward.read().upgrade()
    }

    pub(crate) fn set_backward(&self, node: Option<&Arc<Node<K, V>>>) {
        *self.backward.write() = node.map(Arc::downgrade).unwrap_or_default();
    }

    pub(crate) fn replace_value(&self, value: V) -> Option<V> {
        self.value.write().replace(value)
    }
}

impl<K, V: Clone> Node<K, V> {
    pub(crate) fn value(&self) -> Option<V> {
        self.value.read().clone()
    }
}

/// Drop a detached level-0 chain one node at a time. Letting `Arc` drop it
/// would recurse once per node and overflow the stack on deep books.
pub(crate) fn release_chain<K, V>(mut link: Link<K, V>) {
    while let Some(node) = link {
        let mut forward = node.take_forward();
        link = forward.first_mut().and_then(Option::take);
    }
}
