//! Height-balanced ordered map with stable node handles.
//!
//! Nodes live in an arena and are linked by index, with parent links so that
//! cursors can step to the in-order successor or predecessor without a stack.
//! Removing a node relinks its neighbours instead of moving keys between
//! slots, so a [`NodeId`] stays valid until its own node is removed. That
//! allows callers to remove entries while walking the map with
//! [`OrderedMap::next_node`].

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::iter::FusedIterator;
use std::mem;

/// Handle to a node of an [`OrderedMap`].
///
/// The generation counter makes a handle to a removed node resolve to
/// nothing, even after its slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    height: u32,
}

#[derive(Clone)]
struct Slot<K, V> {
    generation: u32,
    links: Links,
    entry: Option<(K, V)>,
}

#[derive(Clone)]
pub struct OrderedMap<K, V> {
    slots: Vec<Slot<K, V>>,
    free: Vec<usize>,
    root: Option<usize>,
    len: usize,
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }
}

impl<K, V> OrderedMap<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes every entry. Handles issued before the call stop resolving.
    pub fn clear(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].entry.is_some() {
                self.release(index);
            }
        }
        self.root = None;
        self.len = 0;
    }

    #[must_use]
    pub fn first_node(&self) -> Option<NodeId> {
        self.root.map(|root| self.node_id(self.min_index(root)))
    }

    #[must_use]
    pub fn last_node(&self) -> Option<NodeId> {
        self.root.map(|root| self.node_id(self.max_index(root)))
    }

    /// In-order successor of `id`, or `None` at the end or for a stale handle.
    #[must_use]
    pub fn next_node(&self, id: NodeId) -> Option<NodeId> {
        let index = self.resolve(id)?;
        self.successor(index).map(|next| self.node_id(next))
    }

    /// In-order predecessor of `id`, or `None` at the start or for a stale handle.
    #[must_use]
    pub fn prev_node(&self, id: NodeId) -> Option<NodeId> {
        let index = self.resolve(id)?;
        self.predecessor(index).map(|prev| self.node_id(prev))
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<(&K, &V)> {
        let index = self.resolve(id)?;
        self.slots[index].entry.as_ref().map(|(key, value)| (key, value))
    }

    pub fn node_value_mut(&mut self, id: NodeId) -> Option<&mut V> {
        let index = self.resolve(id)?;
        self.slots[index].entry.as_mut().map(|(_, value)| value)
    }

    /// Unlinks the node behind `id` and returns its entry.
    ///
    /// Handles to all other nodes remain valid.
    pub fn remove_node(&mut self, id: NodeId) -> Option<(K, V)> {
        let index = self.resolve(id)?;
        Some(self.remove_index(index))
    }

    #[must_use]
    pub fn first(&self) -> Option<(&K, &V)> {
        self.first_node().and_then(|id| self.node(id))
    }

    #[must_use]
    pub fn last(&self) -> Option<(&K, &V)> {
        self.last_node().and_then(|id| self.node(id))
    }

    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: self.nodes(),
        }
    }

    #[must_use]
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    #[must_use]
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    #[must_use]
    pub fn nodes(&self) -> Nodes<'_, K, V> {
        Nodes {
            map: self,
            front: self.root.map(|root| self.min_index(root)),
            back: self.root.map(|root| self.max_index(root)),
            remaining: self.len,
        }
    }

    /// Calls `f` for every entry in key order with mutable access to the value.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&K, &mut V)) {
        let mut cursor = self.root.map(|root| self.min_index(root));
        while let Some(index) = cursor {
            if let Some((key, value)) = self.slots[index].entry.as_mut() {
                f(key, value);
            }
            cursor = self.successor(index);
        }
    }

    fn node_id(&self, index: usize) -> NodeId {
        NodeId {
            index,
            generation: self.slots[index].generation,
        }
    }

    fn resolve(&self, id: NodeId) -> Option<usize> {
        let slot = self.slots.get(id.index)?;
        (slot.generation == id.generation && slot.entry.is_some()).then_some(id.index)
    }

    fn key_at(&self, index: usize) -> &K {
        match &self.slots[index].entry {
            Some((key, _)) => key,
            None => unreachable!("free slot {index} is linked into the tree"),
        }
    }

    fn entry_at(&self, index: usize) -> (&K, &V) {
        match &self.slots[index].entry {
            Some((key, value)) => (key, value),
            None => unreachable!("free slot {index} is linked into the tree"),
        }
    }

    fn height(&self, index: Option<usize>) -> u32 {
        index.map_or(0, |index| self.slots[index].links.height)
    }

    fn balance_of(&self, index: usize) -> i64 {
        let links = self.slots[index].links;
        i64::from(self.height(links.left)) - i64::from(self.height(links.right))
    }

    fn update_height(&mut self, index: usize) {
        let links = self.slots[index].links;
        let height = 1 + self.height(links.left).max(self.height(links.right));
        self.slots[index].links.height = height;
    }

    fn min_index(&self, mut index: usize) -> usize {
        while let Some(left) = self.slots[index].links.left {
            index = left;
        }
        index
    }

    fn max_index(&self, mut index: usize) -> usize {
        while let Some(right) = self.slots[index].links.right {
            index = right;
        }
        index
    }

    fn successor(&self, index: usize) -> Option<usize> {
        if let Some(right) = self.slots[index].links.right {
            return Some(self.min_index(right));
        }
        let mut child = index;
        let mut parent = self.slots[index].links.parent;
        while let Some(up) = parent {
            if self.slots[up].links.left == Some(child) {
                return Some(up);
            }
            child = up;
            parent = self.slots[up].links.parent;
        }
        None
    }

    fn predecessor(&self, index: usize) -> Option<usize> {
        if let Some(left) = self.slots[index].links.left {
            return Some(self.max_index(left));
        }
        let mut child = index;
        let mut parent = self.slots[index].links.parent;
        while let Some(up) = parent {
            if self.slots[up].links.right == Some(child) {
                return Some(up);
            }
            child = up;
            parent = self.slots[up].links.parent;
        }
        None
    }

    fn allocate(&mut self, key: K, value: V, parent: Option<usize>) -> usize {
        let links = Links {
            parent,
            left: None,
            right: None,
            height: 1,
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.links = links;
            slot.entry = Some((key, value));
            index
        } else {
            self.slots.push(Slot {
                generation: 0,
                links,
                entry: Some((key, value)),
            });
            self.slots.len() - 1
        }
    }

    fn release(&mut self, index: usize) -> (K, V) {
        let slot = &mut self.slots[index];
        let Some(entry) = slot.entry.take() else {
            unreachable!("slot {index} released twice");
        };
        slot.generation = slot.generation.wrapping_add(1);
        slot.links = Links::default();
        self.free.push(index);
        entry
    }

    /// Puts `replacement` where `target` hangs below its parent.
    fn transplant(&mut self, target: usize, replacement: Option<usize>) {
        let parent = self.slots[target].links.parent;
        match parent {
            None => self.root = replacement,
            Some(up) => {
                if self.slots[up].links.left == Some(target) {
                    self.slots[up].links.left = replacement;
                } else {
                    self.slots[up].links.right = replacement;
                }
            }
        }
        if let Some(replacement) = replacement {
            self.slots[replacement].links.parent = parent;
        }
    }

    fn rotate_left(&mut self, index: usize) -> usize {
        let Some(pivot) = self.slots[index].links.right else {
            return index;
        };
        let inner = self.slots[pivot].links.left;
        self.slots[index].links.right = inner;
        if let Some(inner) = inner {
            self.slots[inner].links.parent = Some(index);
        }
        self.transplant(index, Some(pivot));
        self.slots[pivot].links.left = Some(index);
        self.slots[index].links.parent = Some(pivot);
        self.update_height(index);
        self.update_height(pivot);
        pivot
    }

    fn rotate_right(&mut self, index: usize) -> usize {
        let Some(pivot) = self.slots[index].links.left else {
            return index;
        };
        let inner = self.slots[pivot].links.right;
        self.slots[index].links.left = inner;
        if let Some(inner) = inner {
            self.slots[inner].links.parent = Some(index);
        }
        self.transplant(index, Some(pivot));
        self.slots[pivot].links.right = Some(index);
        self.slots[index].links.parent = Some(pivot);
        self.update_height(index);
        self.update_height(pivot);
        pivot
    }

    /// Restores heights and balance from `start` up to the root.
    fn rebalance_from(&mut self, start: Option<usize>) {
        let mut cursor = start;
        while let Some(index) = cursor {
            self.update_height(index);
            let balance = self.balance_of(index);
            let links = self.slots[index].links;
            let subtree = if balance > 1 {
                if let Some(left) = links.left {
                    if self.balance_of(left) < 0 {
                        self.rotate_left(left);
                    }
                }
                self.rotate_right(index)
            } else if balance < -1 {
                if let Some(right) = links.right {
                    if self.balance_of(right) > 0 {
                        self.rotate_right(right);
                    }
                }
                self.rotate_left(index)
            } else {
                index
            };
            cursor = self.slots[subtree].links.parent;
        }
    }

    fn remove_index(&mut self, target: usize) -> (K, V) {
        let links = self.slots[target].links;
        let rebalance_start = match (links.left, links.right) {
            (None, right) => {
                self.transplant(target, right);
                links.parent
            }
            (left @ Some(_), None) => {
                self.transplant(target, left);
                links.parent
            }
            (Some(left), Some(right)) => {
                let heir = self.min_index(right);
                let start = if self.slots[heir].links.parent == Some(target) {
                    Some(heir)
                } else {
                    let heir_parent = self.slots[heir].links.parent;
                    let heir_right = self.slots[heir].links.right;
                    self.transplant(heir, heir_right);
                    self.slots[heir].links.right = Some(right);
                    self.slots[right].links.parent = Some(heir);
                    heir_parent
                };
                self.transplant(target, Some(heir));
                self.slots[heir].links.left = Some(left);
                self.slots[left].links.parent = Some(heir);
                start
            }
        };
        self.len -= 1;
        self.rebalance_from(rebalance_start);
        self.release(target)
    }
}

impl<K: Ord, V> OrderedMap<K, V> {
    /// Inserts an entry and returns the previous value stored under `key`.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let mut parent = None;
        let mut attach_left = false;
        let mut cursor = self.root;
        while let Some(index) = cursor {
            let links = self.slots[index].links;
            match key.cmp(self.key_at(index)) {
                Ordering::Less => {
                    parent = Some(index);
                    attach_left = true;
                    cursor = links.left;
                }
                Ordering::Greater => {
                    parent = Some(index);
                    attach_left = false;
                    cursor = links.right;
                }
                Ordering::Equal => {
                    return match self.slots[index].entry.as_mut() {
                        Some((_, existing)) => Some(mem::replace(existing, value)),
                        None => unreachable!("free slot {index} is linked into the tree"),
                    };
                }
            }
        }
        let index = self.allocate(key, value, parent);
        match parent {
            None => self.root = Some(index),
            Some(up) if attach_left => self.slots[up].links.left = Some(index),
            Some(up) => self.slots[up].links.right = Some(index),
        }
        self.len += 1;
        self.rebalance_from(parent);
        None
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find_index(key).map(|index| self.entry_at(index).1)
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find_index(key).map(|index| self.entry_at(index))
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let index = self.find_index(key)?;
        self.slots[index].entry.as_mut().map(|(_, value)| value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find_index(key).is_some()
    }

    /// Handle of the node stored under `key`.
    pub fn get_node<Q>(&self, key: &Q) -> Option<NodeId>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find_index(key).map(|index| self.node_id(index))
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let index = self.find_index(key)?;
        Some(self.remove_index(index))
    }

    /// Greatest entry whose key is less than or equal to `key`.
    pub fn floor<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.neighbor(key, |ord| ord != Ordering::Greater, true)
    }

    /// Smallest entry whose key is greater than or equal to `key`.
    pub fn ceiling<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.neighbor(key, |ord| ord != Ordering::Less, false)
    }

    /// Smallest entry whose key is strictly greater than `key`.
    pub fn greater<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.neighbor(key, |ord| ord == Ordering::Greater, false)
    }

    /// Greatest entry whose key is strictly less than `key`.
    pub fn less<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.neighbor(key, |ord| ord == Ordering::Less, true)
    }

    fn find_index<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cursor = self.root;
        while let Some(index) = cursor {
            let links = self.slots[index].links;
            match key.cmp(self.key_at(index).borrow()) {
                Ordering::Less => cursor = links.left,
                Ordering::Greater => cursor = links.right,
                Ordering::Equal => return Some(index),
            }
        }
        None
    }

    /// Walks from the root towards `key`, remembering the last node whose
    /// ordering relative to `key` satisfies `accept`. With `lower` set the
    /// search looks for the greatest such node, otherwise the smallest.
    fn neighbor<Q>(
        &self,
        key: &Q,
        accept: impl Fn(Ordering) -> bool,
        lower: bool,
    ) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut best = None;
        let mut cursor = self.root;
        while let Some(index) = cursor {
            let links = self.slots[index].links;
            let ord = self.key_at(index).borrow().cmp(key);
            if accept(ord) {
                best = Some(index);
                cursor = if lower { links.right } else { links.left };
            } else {
                cursor = if lower { links.left } else { links.right };
            }
        }
        best.map(|index| self.entry_at(index))
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for OrderedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for OrderedMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K: Ord, V> Extend<(K, V)> for OrderedMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, K, V> IntoIterator for &'a OrderedMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Node handles in key order.
pub struct Nodes<'a, K, V> {
    map: &'a OrderedMap<K, V>,
    front: Option<usize>,
    back: Option<usize>,
    remaining: usize,
}

impl<K, V> Iterator for Nodes<'_, K, V> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.front?;
        self.remaining -= 1;
        self.front = self.map.successor(index);
        Some(self.map.node_id(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> DoubleEndedIterator for Nodes<'_, K, V> {
    fn next_back(&mut self) -> Option<NodeId> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.back?;
        self.remaining -= 1;
        self.back = self.map.predecessor(index);
        Some(self.map.node_id(index))
    }
}

impl<K, V> ExactSizeIterator for Nodes<'_, K, V> {}
impl<K, V> FusedIterator for Nodes<'_, K, V> {}

pub struct Iter<'a, K, V> {
    nodes: Nodes<'a, K, V>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.nodes.next()?;
        let map = self.nodes.map;
        Some(map.entry_at(id.index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.nodes.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Iter<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let id = self.nodes.next_back()?;
        let map = self.nodes.map;
        Some(map.entry_at(id.index))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Keys<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(key, _)| key)
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Values<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, value)| value)
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
