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

//! Resolution of which owner a property belongs to.
//!
//! Most properties are private to the principal accessing the resource. Two
//! sets of names are treated specially:
//!
//! - *Global* properties are always shared, whoever reads or writes them.
//!
//! - *Shadowable* properties are per-principal, but a principal without its
//!   own copy sees the shared one.

use std::collections::BTreeSet;

use super::attrs::AttributeTable;
use super::document::Element;
use super::name::PropertyName;
use super::store::PropertyStore;
use crate::support::error::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecialProperties {
    pub shadowable: BTreeSet<PropertyName>,
    pub global: BTreeSet<PropertyName>,
}

impl SpecialProperties {
    pub fn is_global(&self, name: &PropertyName) -> bool {
        self.global.contains(name)
    }

    pub fn is_shadowable(&self, name: &PropertyName) -> bool {
        self.shadowable.contains(name)
    }

    /// Whether a shared copy of `name` is visible to principals.
    fn is_visible_shared(&self, name: &PropertyName) -> bool {
        self.is_global(name) || self.is_shadowable(name)
    }
}

/// A view of a `PropertyStore` as seen by its default principal.
pub struct ScopedView<'a, T: AttributeTable> {
    store: &'a mut PropertyStore<T>,
}

impl<T: AttributeTable> PropertyStore<T> {
    pub fn view(&mut self) -> ScopedView<'_, T> {
        ScopedView { store: self }
    }
}

impl<'a, T: AttributeTable> ScopedView<'a, T> {
    /// The owner `name` is written under.
    fn owner(&self, name: &PropertyName) -> Option<String> {
        if self.store.special_properties().is_global(name) {
            None
        } else {
            self.store.default_uid().map(str::to_owned)
        }
    }

    pub fn get(&mut self, name: &PropertyName) -> Result<Element, Error> {
        let owner = self.owner(name);
        let shadowable = self.store.special_properties().is_shadowable(name);

        match self.store.get(name, owner.as_deref()) {
            Err(Error::PropertyNotFound(_)) if shadowable && owner.is_some() => {
                self.store.get(name, None)
            }
            r => r,
        }
    }

    pub fn set(
        &mut self,
        name: PropertyName,
        value: Element,
    ) -> Result<(), Error> {
        let owner = self.owner(&name);
        self.store.set(name, value, owner.as_deref())
    }

    /// Remove the principal's copy of `name`, or the shared copy if `name` is
    /// global.
    ///
    /// Deleting a shadowed property exposes the shared value again.
    pub fn delete(&mut self, name: &PropertyName) -> Result<(), Error> {
        let owner = self.owner(name);
        self.store.delete(name, owner.as_deref())
    }

    /// List every property visible to the principal.
    pub fn list(&self) -> Result<Vec<PropertyName>, Error> {
        let uid = self.store.default_uid();
        let mut names = self.store.list(uid)?;
        if uid.is_none() {
            return Ok(names);
        }

        let special = self.store.special_properties();
        let mut seen: BTreeSet<PropertyName> = names.iter().cloned().collect();
        for name in self.store.list(None)? {
            if special.is_visible_shared(&name) && seen.insert(name.clone()) {
                names.push(name);
            }
        }

        Ok(names)
    }
}
