//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Deadprop.
//
// Deadprop is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Deadprop is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Deadprop. If not, see <http://www.gnu.org/licenses/>.

//! Changes staged against a property store but not yet written out.

use std::collections::{btree_map, BTreeMap, BTreeSet};

use super::document::Element;
use super::name::EffectiveKey;

/// Pending writes and removals.
///
/// A key is never in both `modified` and `removed`.
#[derive(Clone, Debug, Default)]
pub struct Overlay {
    modified: BTreeMap<EffectiveKey, Element>,
    removed: BTreeSet<EffectiveKey>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn modified_len(&self) -> usize {
        self.modified.len()
    }

    pub fn removed_len(&self) -> usize {
        self.removed.len()
    }

    pub fn modified(&self, key: &EffectiveKey) -> Option<&Element> {
        self.modified.get(key)
    }

    pub fn is_removed(&self, key: &EffectiveKey) -> bool {
        self.removed.contains(key)
    }

    pub fn stage_set(&mut self, key: EffectiveKey, value: Element) {
        self.removed.remove(&key);
        self.modified.insert(key, value);
    }

    /// Stage the removal of `key`.
    ///
    /// Returns whether `key` had a pending write, which is discarded.
    pub fn stage_remove(&mut self, key: EffectiveKey) -> bool {
        let had_pending_write = self.modified.remove(&key).is_some();
        self.removed.insert(key);
        had_pending_write
    }

    pub fn iter_modified(&self) -> btree_map::Iter<'_, EffectiveKey, Element> {
        self.modified.iter()
    }

    pub fn iter_removed(&self) -> impl Iterator<Item = &EffectiveKey> + '_ {
        self.removed.iter()
    }

    pub fn clear(&mut self) {
        self.modified.clear();
        self.removed.clear();
    }
}
