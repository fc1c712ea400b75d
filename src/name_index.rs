//! Name → entry-index lookup (C8), with an original/current split so that
//! renames and deletes can be undone (`unchange`/`discard`) without losing
//! track of what the on-disk archive actually contained.
//!
//! The spec describes this as an open-addressed hash table with djb2
//! hashing and manual fill-ratio-driven resizing; a literal port of that
//! would fight Rust's [`std::collections::HashMap`] for no benefit, so this
//! keeps the *policy* (original/current views, [`NameIndex::delete`] only
//! dropping a name once neither view references it, [`NameIndex::revert`]
//! undoing every pending rename/delete/add at once) and hands the bucket
//! management to the standard hasher.

use std::collections::HashMap;

/// Whether [`NameIndex::add`] should see a name occupied by an entry that's
/// only present in the *original* archive (not yet live under the current
/// view) as free to reuse, the way `file_add` after `delete` is allowed to
/// reclaim a name, but renaming onto an original (unchanged) name that's
/// still live is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddFlags {
    /// The normal case: fail if a live entry already owns the name.
    Default,
    /// Allow replacing whatever the name currently maps to (used to
    /// implement "overwrite" semantics some `file_add` callers want).
    Overwrite,
}

#[derive(Debug, Clone, Default)]
struct Node {
    /// Index into [`crate::archive::Archive::entries`] this name pointed to
    /// when the archive was opened, or `None` if this entry didn't exist
    /// in the on-disk archive.
    original_index: Option<usize>,
    /// Index this name currently, live, points to — `None` if the name was
    /// deleted (or renamed away) since open.
    current_index: Option<usize>,
}

/// The name → entry-index map (C8). One [`Node`] may hold both an
/// `original_index` (what this name resolved to in the archive as opened)
/// and a `current_index` (what it resolves to right now); the two diverge
/// exactly when an entry has been renamed, added, or deleted relative to
/// what was on disk.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    nodes: HashMap<Vec<u8>, Node>,
}

/// Returned by [`NameIndex::add`] when the requested name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameExists;

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` resolved to `index` at archive-open time. Used
    /// only while building the index from a freshly parsed central
    /// directory — never after the archive is live.
    pub fn insert_original(&mut self, name: &[u8], index: usize) {
        let node = self.nodes.entry(name.to_vec()).or_default();
        node.original_index = Some(index);
        node.current_index = Some(index);
    }

    /// Bind `name` to `index` in the current view. Fails with
    /// [`NameExists`] if the name is already live under
    /// [`AddFlags::Default`], unless `flags` is [`AddFlags::Overwrite`].
    pub fn add(&mut self, name: &[u8], index: usize, flags: AddFlags) -> Result<(), NameExists> {
        let node = self.nodes.entry(name.to_vec()).or_default();
        if node.current_index.is_some() && flags == AddFlags::Default {
            return Err(NameExists);
        }
        node.current_index = Some(index);
        Ok(())
    }

    /// Look up the live entry index for `name`, if any.
    pub fn current(&self, name: &[u8]) -> Option<usize> {
        self.nodes.get(name).and_then(|n| n.current_index)
    }

    /// Look up the entry index `name` resolved to when the archive was
    /// opened, if any (regardless of whether it's still live).
    pub fn original(&self, name: &[u8]) -> Option<usize> {
        self.nodes.get(name).and_then(|n| n.original_index)
    }

    /// Clear the current-view binding for `name`. The node itself is only
    /// dropped once it no longer carries an `original_index` either —
    /// otherwise `revert`/`unchange` would have nothing to restore.
    pub fn delete(&mut self, name: &[u8]) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.current_index = None;
            if node.original_index.is_none() {
                self.nodes.remove(name);
            }
        }
    }

    /// Rename: atomically clear `old`'s current binding and bind `new` to
    /// `index`. Fails without changing anything if `new` is already live
    /// (unless it's the same name as `old`, a no-op rename).
    pub fn rename(&mut self, old: &[u8], new: &[u8], index: usize) -> Result<(), NameExists> {
        if old == new {
            return Ok(());
        }
        if self.current(new).is_some() {
            return Err(NameExists);
        }
        self.delete(old);
        self.add(new, index, AddFlags::Default).expect("checked above");
        Ok(())
    }

    /// Undo every pending add/rename/delete: every node's current view is
    /// reset to its original-archive view, dropping nodes that never
    /// existed in the original archive at all. Used by
    /// [`crate::archive::Archive::discard`] and `unchange_all`.
    pub fn revert(&mut self) {
        self.nodes.retain(|_, node| node.original_index.is_some());
        for node in self.nodes.values_mut() {
            node.current_index = node.original_index;
        }
    }

    /// Every name with a live current binding, in arbitrary order — callers
    /// that need a stable order should sort by entry index instead.
    pub fn live_names(&self) -> impl Iterator<Item = (&[u8], usize)> {
        self.nodes
            .iter()
            .filter_map(|(name, node)| node.current_index.map(|idx| (name.as_slice(), idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_lookup() {
        let mut idx = NameIndex::new();
        idx.add(b"a.txt", 0, AddFlags::Default).unwrap();
        assert_eq!(idx.current(b"a.txt"), Some(0));
    }

    #[test]
    fn add_existing_name_fails() {
        let mut idx = NameIndex::new();
        idx.add(b"a.txt", 0, AddFlags::Default).unwrap();
        assert_eq!(idx.add(b"a.txt", 1, AddFlags::Default), Err(NameExists));
    }

    #[test]
    fn delete_then_readd_succeeds() {
        let mut idx = NameIndex::new();
        idx.insert_original(b"a.txt", 0);
        idx.delete(b"a.txt");
        assert_eq!(idx.current(b"a.txt"), None);
        idx.add(b"a.txt", 5, AddFlags::Default).unwrap();
        assert_eq!(idx.current(b"a.txt"), Some(5));
        // the original binding survives for rename-collision bookkeeping
        assert_eq!(idx.original(b"a.txt"), Some(0));
    }

    #[test]
    fn rename_collision_is_rejected() {
        let mut idx = NameIndex::new();
        idx.add(b"a.txt", 0, AddFlags::Default).unwrap();
        idx.add(b"b.txt", 1, AddFlags::Default).unwrap();
        assert_eq!(idx.rename(b"a.txt", b"b.txt", 0), Err(NameExists));
        // the original name is untouched after a rejected rename
        assert_eq!(idx.current(b"a.txt"), Some(0));
    }

    #[test]
    fn revert_restores_original_view() {
        let mut idx = NameIndex::new();
        idx.insert_original(b"a.txt", 0);
        idx.rename(b"a.txt", b"renamed.txt", 0).unwrap();
        idx.add(b"new.txt", 1, AddFlags::Default).unwrap();
        idx.revert();
        assert_eq!(idx.current(b"a.txt"), Some(0));
        assert_eq!(idx.current(b"renamed.txt"), None);
        assert_eq!(idx.current(b"new.txt"), None);
    }
}
