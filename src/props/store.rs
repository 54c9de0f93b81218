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

//! The dead property store.
//!
//! Properties are kept as extended attributes on the file backing a resource.
//! Changes are staged in an in-memory `Overlay` and only reach the file system
//! on `flush()`. A flush is not atomic: if it fails partway through, whatever
//! was written stays written and the overlay is left intact for the caller to
//! discard.
//!
//! Nothing about the file is cached between calls. The path is asked for anew
//! on every durable access, and the attribute table re-read, so the file may
//! be replaced underneath the store at any time.
//!
//! Reads transparently upgrade old data. A value in a legacy format is staged
//! for rewrite in the current format, and a property stored under a legacy
//! (uncompressed namespace) attribute name is moved to its current name on
//! the spot.

use std::collections::{btree_map, BTreeSet, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use super::attrs::{AttributeTable, XattrTable};
use super::document::Element;
use super::key_codec::{KeyCodec, MAX_ATTRIBUTE_NAME_LEN};
use super::name::{EffectiveKey, PropertyName};
use super::overlay::Overlay;
use super::scope::SpecialProperties;
use super::value_codec::{Format, ValueCodec};
use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;
use crate::support::log_prefix::LogPrefix;

/// Supplies the path of the file properties are stored on.
///
/// This is called on every durable access.
pub trait PathProvider {
    fn path(&self) -> PathBuf;
}

impl<F: Fn() -> PathBuf> PathProvider for F {
    fn path(&self) -> PathBuf {
        self()
    }
}

/// Outcome of `PropertyStore::upgrade()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    /// Properties read.
    pub examined: usize,
    /// Properties whose value was rewritten in the current format.
    pub rewritten: usize,
    /// Properties moved from a legacy attribute name.
    pub renamed: usize,
    /// Legacy attributes removed because the current name already held the
    /// property.
    pub duplicates: usize,
}

/// Diagnostic information about one attribute belonging to the store.
#[derive(Clone, Debug)]
pub struct AttributeInfo {
    pub attribute: String,
    pub size: usize,
    /// The decoded key, or why it could not be decoded.
    pub key: Result<EffectiveKey, String>,
    /// The value format, or why it could not be decoded.
    pub format: Result<Format, String>,
}

struct Loaded {
    value: Element,
    /// `None` if the value came from the overlay.
    format: Option<Format>,
    renamed: bool,
}

pub struct PropertyStore<T: AttributeTable = XattrTable> {
    log_prefix: LogPrefix,
    path_provider: Box<dyn PathProvider>,
    table: T,
    key_codec: KeyCodec,
    value_codec: ValueCodec,
    default_uid: Option<String>,
    special: SpecialProperties,
    overlay: Overlay,
}

impl PropertyStore<XattrTable> {
    /// Create a store over the real extended attributes of whatever file
    /// `path_provider` returns.
    pub fn new(
        default_uid: Option<String>,
        path_provider: impl PathProvider + 'static,
    ) -> Self {
        Self::with_table(default_uid, path_provider, XattrTable)
    }

    /// Create a store over a file that never moves.
    pub fn for_path(default_uid: Option<String>, path: PathBuf) -> Self {
        Self::new(default_uid, move || path.clone())
    }
}

impl<T: AttributeTable> PropertyStore<T> {
    pub fn with_table(
        default_uid: Option<String>,
        path_provider: impl PathProvider + 'static,
        table: T,
    ) -> Self {
        let log_prefix = LogPrefix::new("propstore".to_owned());
        log_prefix.set_uid(default_uid.clone());

        PropertyStore {
            log_prefix,
            path_provider: Box::new(path_provider),
            table,
            key_codec: KeyCodec::default(),
            value_codec: ValueCodec::default(),
            default_uid,
            special: SpecialProperties::default(),
            overlay: Overlay::default(),
        }
    }

    pub fn with_key_codec(mut self, key_codec: KeyCodec) -> Self {
        self.key_codec = key_codec;
        self
    }

    pub fn with_value_codec(mut self, value_codec: ValueCodec) -> Self {
        self.value_codec = value_codec;
        self
    }

    pub fn with_special_properties(mut self, special: SpecialProperties) -> Self {
        self.special = special;
        self
    }

    pub fn default_uid(&self) -> Option<&str> {
        self.default_uid.as_deref()
    }

    pub fn special_properties(&self) -> &SpecialProperties {
        &self.special
    }

    /// Whether there are changes that have not been flushed.
    pub fn is_dirty(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Fetch the value of `name` as owned by `uid`.
    pub fn get(
        &mut self,
        name: &PropertyName,
        uid: Option<&str>,
    ) -> Result<Element, Error> {
        let key = EffectiveKey::new(name.clone(), uid);
        self.validate(&key)?;
        self.load(key).map(|loaded| loaded.value)
    }

    /// Whether `name` exists for `uid`, reading it in the process.
    pub fn contains(
        &mut self,
        name: &PropertyName,
        uid: Option<&str>,
    ) -> Result<bool, Error> {
        match self.get(name, uid) {
            Ok(_) => Ok(true),
            Err(Error::PropertyNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stage `name` to be set to `value` for `uid`.
    pub fn set(
        &mut self,
        name: PropertyName,
        value: Element,
        uid: Option<&str>,
    ) -> Result<(), Error> {
        let key = EffectiveKey::new(name, uid);
        self.validate(&key)?;
        self.overlay.stage_set(key, value);
        Ok(())
    }

    /// Stage the removal of `name` for `uid`.
    ///
    /// Fails with `PropertyNotFound` unless the property has a pending write
    /// or exists durably.
    pub fn delete(
        &mut self,
        name: &PropertyName,
        uid: Option<&str>,
    ) -> Result<(), Error> {
        let key = EffectiveKey::new(name.clone(), uid);
        self.validate(&key)?;

        if self.overlay.modified(&key).is_none() && !self.exists_durably(&key)? {
            return Err(Error::PropertyNotFound(key.name));
        }

        self.overlay.stage_remove(key);
        Ok(())
    }

    /// Iterate the names of properties owned by `uid`, reflecting staged
    /// changes.
    ///
    /// The attribute table is listed when this is called; a missing file
    /// simply has no durable properties. An attribute in the store's part of
    /// the attribute namespace that cannot be decoded ends the iteration with
    /// `MalformedKey`.
    pub fn keys(&self, uid: Option<&str>) -> Result<Keys<'_>, Error> {
        let path = self.resolve_path();
        let durable = self.table.names(&path).ignore_not_found().map_err(
            |e| Error::property_io(path.display(), e),
        )?;

        Ok(Keys {
            codec: self.key_codec,
            overlay: &self.overlay,
            uid: uid.map(str::to_owned),
            durable: durable.into_iter(),
            staged: self.overlay.iter_modified(),
            seen: HashSet::new(),
            failed: false,
        })
    }

    pub fn list(&self, uid: Option<&str>) -> Result<Vec<PropertyName>, Error> {
        self.keys(uid)?.collect()
    }

    /// Every effective key stored durably, regardless of owner or staged
    /// changes.
    pub fn durable_keys(&self) -> Result<Vec<EffectiveKey>, Error> {
        let path = self.resolve_path();
        let mut keys = BTreeSet::new();
        for attr in self.owned_attributes(&path)? {
            keys.insert(self.key_codec.decode(&attr)?);
        }

        Ok(keys.into_iter().collect())
    }

    /// Write all staged changes to the file.
    ///
    /// If the file no longer exists, nothing is done and the changes stay
    /// staged.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.overlay.is_empty() {
            return Ok(());
        }

        let path = self.resolve_path();
        if !self.table.exists(&path) {
            warn!(
                "{} Resource is gone; dropping flush of {} changed and {} \
                 removed properties",
                self.log_prefix,
                self.overlay.modified_len(),
                self.overlay.removed_len(),
            );
            return Ok(());
        }

        for key in self.overlay.iter_removed() {
            for attr in self.attribute_names(key) {
                // Removing a property that isn't there is not an error
                // (RFC 4918 section 9.2)
                self.table
                    .delete(&path, &attr)
                    .map_err(|e| Error::property_io(&attr, e))?;
            }
        }

        for (key, value) in self.overlay.iter_modified() {
            let attr = self.key_codec.encode(key, true);
            if attr.len() > MAX_ATTRIBUTE_NAME_LEN {
                warn!(
                    "{} Attribute name for {} is {} bytes long; the file \
                     system may refuse it",
                    self.log_prefix,
                    key,
                    attr.len(),
                );
            }

            let data = self.value_codec.encode(value)?;
            self.table
                .write(&path, &attr, &data)
                .map_err(|e| Error::property_io(&attr, e))?;
        }

        debug!(
            "{} Flushed {} changed and {} removed properties",
            self.log_prefix,
            self.overlay.modified_len(),
            self.overlay.removed_len(),
        );
        self.overlay.clear();
        Ok(())
    }

    /// Discard all staged changes.
    pub fn abort(&mut self) {
        if !self.overlay.is_empty() {
            debug!(
                "{} Discarding {} changed and {} removed properties",
                self.log_prefix,
                self.overlay.modified_len(),
                self.overlay.removed_len(),
            );
        }
        self.overlay.clear();
    }

    /// Read every durable property, upgrading anything in a legacy format or
    /// under a legacy name, then flush.
    ///
    /// Any changes already staged are flushed along with the upgrades.
    pub fn upgrade(&mut self) -> Result<UpgradeReport, Error> {
        let mut report = UpgradeReport::default();
        for key in self.durable_keys()? {
            if self.overlay.modified(&key).is_some() {
                continue;
            }

            let loaded = match self.load(key.clone()) {
                Ok(loaded) => loaded,
                Err(Error::PropertyNotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            report.examined += 1;
            if loaded.format.map_or(false, Format::is_legacy) {
                report.rewritten += 1;
            }
            if loaded.renamed {
                report.renamed += 1;
            } else if self.remove_legacy_duplicate(&key)? {
                report.duplicates += 1;
            }
        }

        self.flush()?;
        info!(
            "{} Upgrade examined {}, rewrote {}, renamed {}, removed {} \
             duplicates",
            self.log_prefix,
            report.examined,
            report.rewritten,
            report.renamed,
            report.duplicates,
        );
        Ok(report)
    }

    /// Describe every attribute belonging to the store.
    ///
    /// Unlike the other operations, this does not stop at undecodable keys or
    /// values, so it can be used to find damaged properties.
    pub fn inspect(&self) -> Result<Vec<AttributeInfo>, Error> {
        let path = self.resolve_path();
        let mut infos = Vec::new();
        for attribute in self.owned_attributes(&path)? {
            let raw = self.read_attr(&path, &attribute)?.unwrap_or_default();
            let key = self.key_codec.decode(&attribute).map_err(|e| e.to_string());
            let format = self
                .value_codec
                .decode(&attribute, &raw)
                .map(|decoded| decoded.format)
                .map_err(|e| e.to_string());

            infos.push(AttributeInfo {
                attribute,
                size: raw.len(),
                key,
                format,
            });
        }

        Ok(infos)
    }

    fn load(&mut self, key: EffectiveKey) -> Result<Loaded, Error> {
        if let Some(value) = self.overlay.modified(&key) {
            return Ok(Loaded {
                value: value.clone(),
                format: None,
                renamed: false,
            });
        }

        if self.overlay.is_removed(&key) {
            return Err(Error::PropertyNotFound(key.name));
        }

        let path = self.resolve_path();
        let attr = self.key_codec.encode(&key, true);
        let (raw, renamed) = match self.read_attr(&path, &attr)? {
            Some(raw) => (raw, false),
            None => match self.move_legacy_attribute(&path, &key, &attr)? {
                Some(raw) => (raw, true),
                None => return Err(Error::PropertyNotFound(key.name)),
            },
        };

        let decoded = self.value_codec.decode(&attr, &raw)?;
        if decoded.is_legacy() {
            info!(
                "{} Rewriting {} stored in {:?} format",
                self.log_prefix, key, decoded.format,
            );
            self.overlay.stage_set(key, decoded.value.clone());
        }

        Ok(Loaded {
            value: decoded.value,
            format: Some(decoded.format),
            renamed,
        })
    }

    /// Look for `key` under its uncompressed-namespace attribute name. If
    /// found, it is moved to `attr` immediately and its raw value returned.
    fn move_legacy_attribute(
        &self,
        path: &Path,
        key: &EffectiveKey,
        attr: &str,
    ) -> Result<Option<Vec<u8>>, Error> {
        if !self.key_codec.has_alias(&key.name.namespace) {
            return Ok(None);
        }

        let legacy_attr = self.key_codec.encode(key, false);
        let raw = match self.read_attr(path, &legacy_attr)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        if let Err(e) = self
            .table
            .write(path, attr, &raw)
            .and_then(|()| self.table.delete(path, &legacy_attr))
        {
            error!(
                "{} Unable to upgrade property to compressed namespace: {}: {}",
                self.log_prefix, key, e,
            );
            return Err(Error::property_io(&legacy_attr, e));
        }

        info!(
            "{} Moved {} from legacy attribute {:?}",
            self.log_prefix, key, legacy_attr,
        );
        Ok(Some(raw))
    }

    /// Remove the legacy attribute of `key`, which is left over if something
    /// wrote the current name without cleaning up the old one.
    fn remove_legacy_duplicate(&self, key: &EffectiveKey) -> Result<bool, Error> {
        if !self.key_codec.has_alias(&key.name.namespace) {
            return Ok(false);
        }

        let path = self.resolve_path();
        let legacy_attr = self.key_codec.encode(key, false);
        let removed = self
            .table
            .delete(&path, &legacy_attr)
            .map_err(|e| Error::property_io(&legacy_attr, e))?;
        if removed {
            info!(
                "{} Removed stale legacy attribute {:?} of {}",
                self.log_prefix, legacy_attr, key,
            );
        }
        Ok(removed)
    }

    /// Validate `key` as a key this store is able to write.
    fn validate(&self, key: &EffectiveKey) -> Result<(), Error> {
        key.validate()?;
        if self.key_codec.accepts_namespace(&key.name.namespace) {
            Ok(())
        } else {
            Err(Error::InvalidKey(key.name.to_string()))
        }
    }

    fn exists_durably(&self, key: &EffectiveKey) -> Result<bool, Error> {
        let path = self.resolve_path();
        for attr in self.attribute_names(key) {
            if self.read_attr(&path, &attr)?.is_some() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// All attribute names `key` may be stored under, current name first.
    fn attribute_names(&self, key: &EffectiveKey) -> Vec<String> {
        let mut names = vec![self.key_codec.encode(key, true)];
        if self.key_codec.has_alias(&key.name.namespace) {
            names.push(self.key_codec.encode(key, false));
        }
        names
    }

    fn owned_attributes(&self, path: &Path) -> Result<Vec<String>, Error> {
        let names = self
            .table
            .names(path)
            .ignore_not_found()
            .map_err(|e| Error::property_io(path.display(), e))?;

        let mut owned = Vec::new();
        for name in names {
            match owned_name(&self.key_codec, name)? {
                Some(name) => owned.push(name),
                None => continue,
            }
        }
        Ok(owned)
    }

    fn read_attr(
        &self,
        path: &Path,
        attr: &str,
    ) -> Result<Option<Vec<u8>>, Error> {
        self.table
            .read(path, attr)
            .map_err(|e| Error::property_io(attr, e))
    }

    fn resolve_path(&self) -> PathBuf {
        let path = self.path_provider.path();
        self.log_prefix.set_resource(path.display().to_string());
        path
    }
}

impl<T: AttributeTable> fmt::Display for PropertyStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<PropertyStore {}>", self.path_provider.path().display())
    }
}

/// Filter a raw attribute name down to those in `codec`'s part of the
/// attribute namespace.
///
/// A name that is not valid UTF-8 but still appears to carry the prefix is
/// malformed rather than foreign.
fn owned_name(codec: &KeyCodec, name: OsString) -> Result<Option<String>, Error> {
    match name.into_string() {
        Ok(name) if codec.owns(&name) => Ok(Some(name)),
        Ok(_) => Ok(None),
        Err(name) => {
            let lossy = name.to_string_lossy();
            if codec.owns(&lossy) {
                Err(Error::MalformedKey(lossy.into_owned()))
            } else {
                Ok(None)
            }
        }
    }
}

/// Iterator returned by `PropertyStore::keys()`.
///
/// Durable properties come first, then properties that only exist in the
/// overlay. Each name is produced at most once.
pub struct Keys<'a> {
    codec: KeyCodec,
    overlay: &'a Overlay,
    uid: Option<String>,
    durable: std::vec::IntoIter<OsString>,
    staged: btree_map::Iter<'a, EffectiveKey, Element>,
    seen: HashSet<EffectiveKey>,
    failed: bool,
}

impl Iterator for Keys<'_> {
    type Item = Result<PropertyName, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let codec = self.codec;
        for raw in &mut self.durable {
            let key = match owned_name(&codec, raw)
                .and_then(|name| name.map(|n| codec.decode(&n)).transpose())
            {
                Ok(Some(key)) => key,
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };

            if key.uid != self.uid || self.overlay.is_removed(&key) {
                continue;
            }

            if self.seen.insert(key.clone()) {
                return Some(Ok(key.name));
            }
        }

        for (key, _) in &mut self.staged {
            if key.uid == self.uid && !self.seen.contains(key) {
                return Some(Ok(key.name.clone()));
            }
        }

        None
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::super::attrs::memory::MemoryTable;
    use super::super::attrs::test_support::supports_xattrs;
    use super::super::key_codec::NAMESPACE_ALIASES;
    use super::*;

    const TEST_CODEC: KeyCodec = KeyCodec::new("user.", NAMESPACE_ALIASES);
    const RES: &str = "/cal/user01/calendar";
    const CALDAV: &str = "urn:ietf:params:xml:ns:caldav";

    fn store_on(table: &MemoryTable) -> PropertyStore<MemoryTable> {
        PropertyStore::with_table(
            Some("user01".to_owned()),
            || PathBuf::from(RES),
            table.clone(),
        )
        .with_key_codec(TEST_CODEC)
    }

    fn new_table() -> MemoryTable {
        let table = MemoryTable::default();
        table.create(Path::new(RES));
        table
    }

    fn dav(name: &str) -> PropertyName {
        PropertyName::new("DAV:", name)
    }

    fn value(name: &PropertyName, text: &str) -> Element {
        Element::new(name.clone()).with_text(text)
    }

    fn current(value: &Element) -> Vec<u8> {
        ValueCodec::default().encode(value).unwrap()
    }

    fn sorted(mut names: Vec<PropertyName>) -> Vec<PropertyName> {
        names.sort();
        names
    }

    #[test]
    fn set_flush_get() {
        crate::init_test_log();

        let table = new_table();
        let mut store = store_on(&table);
        let name = dav("displayname");

        store.set(name.clone(), value(&name, "Work"), None).unwrap();
        assert!(store.is_dirty());
        assert_eq!(value(&name, "Work"), store.get(&name, None).unwrap());
        // Nothing durable until flushed
        assert!(table.raw_names(Path::new(RES)).is_empty());

        store.flush().unwrap();
        assert!(!store.is_dirty());
        assert_eq!(
            vec!["user.{DAV:}displayname".to_owned()],
            table.raw_names(Path::new(RES))
        );

        let mut fresh = store_on(&table);
        assert_eq!(value(&name, "Work"), fresh.get(&name, None).unwrap());
        assert!(fresh.contains(&name, None).unwrap());
        assert!(!fresh.is_dirty());
    }

    #[test]
    fn overlay_takes_precedence() {
        let table = new_table();
        let name = dav("displayname");
        table.plant(
            Path::new(RES),
            "user.{DAV:}displayname",
            &current(&value(&name, "old")),
        );

        let mut store = store_on(&table);
        store.set(name.clone(), value(&name, "new"), None).unwrap();
        assert_eq!(value(&name, "new"), store.get(&name, None).unwrap());

        store.delete(&name, None).unwrap();
        assert_matches!(
            Err(Error::PropertyNotFound(_)),
            store.get(&name, None)
        );
        assert!(!store.contains(&name, None).unwrap());
        assert!(store.list(None).unwrap().is_empty());
        // Still durable until flushed
        assert!(table
            .raw(Path::new(RES), "user.{DAV:}displayname")
            .is_some());

        store.flush().unwrap();
        assert!(table.raw_names(Path::new(RES)).is_empty());
    }

    #[test]
    fn abort_discards_changes() {
        let table = new_table();
        let name = dav("displayname");
        let other = dav("getcontentlanguage");
        table.plant(
            Path::new(RES),
            "user.{DAV:}displayname",
            &current(&value(&name, "kept")),
        );

        let mut store = store_on(&table);
        store.set(other.clone(), value(&other, "en"), None).unwrap();
        store.delete(&name, None).unwrap();
        store.abort();

        assert!(!store.is_dirty());
        assert_eq!(value(&name, "kept"), store.get(&name, None).unwrap());
        assert_matches!(
            Err(Error::PropertyNotFound(_)),
            store.get(&other, None)
        );
        store.flush().unwrap();
        assert_eq!(1, table.raw_names(Path::new(RES)).len());
    }

    #[test]
    fn uid_scoping() {
        let table = new_table();
        let mut store = store_on(&table);
        let name = PropertyName::new(CALDAV, "calendar-description");

        store.set(name.clone(), value(&name, "shared"), None).unwrap();
        store
            .set(name.clone(), value(&name, "mine"), Some("user01"))
            .unwrap();
        store.flush().unwrap();

        assert_eq!(
            vec![
                "user.user01{CALDAV:}calendar-description".to_owned(),
                "user.{CALDAV:}calendar-description".to_owned(),
            ],
            table.raw_names(Path::new(RES))
        );

        assert_eq!(value(&name, "shared"), store.get(&name, None).unwrap());
        assert_eq!(
            value(&name, "mine"),
            store.get(&name, Some("user01")).unwrap()
        );
        assert_matches!(
            Err(Error::PropertyNotFound(_)),
            store.get(&name, Some("user02"))
        );

        store.delete(&name, Some("user01")).unwrap();
        store.flush().unwrap();
        assert_eq!(value(&name, "shared"), store.get(&name, None).unwrap());
        assert!(store.list(Some("user01")).unwrap().is_empty());
        assert_eq!(vec![name], store.list(None).unwrap());
    }

    #[test]
    fn legacy_values_are_rewritten() {
        crate::init_test_log();

        let table = new_table();
        let text_name = dav("displayname");
        let binary_name = dav("getcontentlanguage");
        table.plant(
            Path::new(RES),
            "user.{DAV:}displayname",
            b"<?xml version='1.0' encoding='UTF-8'?>\
              <displayname xmlns='DAV:'>Legacy</displayname>",
        );
        table.plant(
            Path::new(RES),
            "user.{DAV:}getcontentlanguage",
            &serde_cbor::to_vec(&value(&binary_name, "en")).unwrap(),
        );

        let mut store = store_on(&table);
        assert_eq!(
            value(&text_name, "Legacy"),
            store.get(&text_name, None).unwrap()
        );
        assert_eq!(
            value(&binary_name, "en"),
            store.get(&binary_name, None).unwrap()
        );
        assert!(store.is_dirty());

        store.flush().unwrap();
        for attr in &["user.{DAV:}displayname", "user.{DAV:}getcontentlanguage"]
        {
            let raw = table.raw(Path::new(RES), attr).unwrap();
            assert_eq!(
                Format::Current,
                ValueCodec::default().decode(attr, &raw).unwrap().format
            );
        }

        let mut fresh = store_on(&table);
        fresh.get(&text_name, None).unwrap();
        fresh.get(&binary_name, None).unwrap();
        assert!(!fresh.is_dirty());
    }

    #[test]
    fn legacy_key_is_moved_on_read() {
        let table = new_table();
        let name = PropertyName::new(CALDAV, "calendar-timezone");
        table.plant(
            Path::new(RES),
            "user.{urn:ietf:params:xml:ns:caldav}calendar-timezone",
            &current(&value(&name, "UTC")),
        );

        let mut store = store_on(&table);
        assert_eq!(value(&name, "UTC"), store.get(&name, None).unwrap());
        // The move happens immediately, not at flush
        assert!(!store.is_dirty());
        assert_eq!(
            vec!["user.{CALDAV:}calendar-timezone".to_owned()],
            table.raw_names(Path::new(RES))
        );
    }

    #[test]
    fn legacy_key_move_failure_is_reported() {
        let table = new_table();
        let name = PropertyName::new(CALDAV, "calendar-timezone");
        let legacy = "user.{urn:ietf:params:xml:ns:caldav}calendar-timezone";
        table.plant(Path::new(RES), legacy, &current(&value(&name, "UTC")));
        table.fail_writes_after(0);

        let mut store = store_on(&table);
        match store.get(&name, None) {
            Err(Error::PropertyIo { key, .. }) => assert_eq!(legacy, key),
            r => panic!("Unexpected result: {:?}", r),
        }
        assert!(table.raw(Path::new(RES), legacy).is_some());
    }

    #[test]
    fn delete_requires_existence() {
        let table = new_table();
        let mut store = store_on(&table);
        let name = dav("displayname");

        assert_matches!(
            Err(Error::PropertyNotFound(_)),
            store.delete(&name, None)
        );
        assert!(!store.is_dirty());

        // A pending write is enough
        store.set(name.clone(), value(&name, "x"), None).unwrap();
        store.delete(&name, None).unwrap();
        assert_matches!(
            Err(Error::PropertyNotFound(_)),
            store.get(&name, None)
        );
        store.flush().unwrap();
        assert!(table.raw_names(Path::new(RES)).is_empty());
    }

    #[test]
    fn delete_removes_both_key_forms() {
        let table = new_table();
        let name = PropertyName::new(CALDAV, "calendar-timezone");
        table.plant(
            Path::new(RES),
            "user.{urn:ietf:params:xml:ns:caldav}calendar-timezone",
            &current(&value(&name, "old")),
        );
        table.plant(
            Path::new(RES),
            "user.{CALDAV:}calendar-timezone",
            &current(&value(&name, "new")),
        );
        table.plant(Path::new(RES), "security.selinux", b"context");

        let mut store = store_on(&table);
        assert_eq!(vec![name.clone()], store.list(None).unwrap());

        store.delete(&name, None).unwrap();
        store.flush().unwrap();
        assert_eq!(
            vec!["security.selinux".to_owned()],
            table.raw_names(Path::new(RES))
        );
    }

    #[test]
    fn enumeration_reflects_overlay() {
        let table = new_table();
        let durable = dav("displayname");
        let removed = dav("getcontentlanguage");
        let staged = PropertyName::new(CALDAV, "calendar-color");
        let foreign_uid = dav("owner");

        for (name, attr) in &[
            (&durable, "user.{DAV:}displayname"),
            (&removed, "user.{DAV:}getcontentlanguage"),
            (&foreign_uid, "user.user02{DAV:}owner"),
        ] {
            table.plant(Path::new(RES), attr, &current(&value(name, "v")));
        }
        table.plant(Path::new(RES), "trusted.other", b"x");

        let mut store = store_on(&table);
        store.delete(&removed, None).unwrap();
        store.set(staged.clone(), value(&staged, "#f00"), None).unwrap();
        // Overwriting a durable key must not list it twice
        store.set(durable.clone(), value(&durable, "w"), None).unwrap();

        assert_eq!(
            vec![durable.clone(), staged.clone()],
            sorted(store.list(None).unwrap())
        );
        assert_eq!(vec![foreign_uid], store.list(Some("user02")).unwrap());
        assert!(store.list(Some("user01")).unwrap().is_empty());

        store.flush().unwrap();
        assert_eq!(
            vec![durable, staged],
            sorted(store_on(&table).list(None).unwrap())
        );
    }

    #[test]
    fn missing_file_has_no_properties() {
        let table = MemoryTable::default();
        let mut store = store_on(&table);
        let name = dav("displayname");

        assert!(store.list(None).unwrap().is_empty());
        assert!(store.durable_keys().unwrap().is_empty());
        assert_matches!(
            Err(Error::PropertyNotFound(_)),
            store.get(&name, None)
        );
    }

    #[test]
    fn flush_to_missing_file_keeps_changes() {
        crate::init_test_log();

        let table = MemoryTable::default();
        let mut store = store_on(&table);
        let name = dav("displayname");

        store.set(name.clone(), value(&name, "x"), None).unwrap();
        store.flush().unwrap();
        assert!(store.is_dirty());
        assert!(table.raw_names(Path::new(RES)).is_empty());

        table.create(Path::new(RES));
        store.flush().unwrap();
        assert!(!store.is_dirty());
        assert_eq!(1, table.raw_names(Path::new(RES)).len());
    }

    #[test]
    fn malformed_key_stops_enumeration() {
        let table = new_table();
        let name = dav("displayname");
        table.plant(
            Path::new(RES),
            "user.{DAV:}displayname",
            &current(&value(&name, "v")),
        );
        table.plant(Path::new(RES), "user.garbage", b"x");

        let store = store_on(&table);
        assert_matches!(Err(Error::MalformedKey(_)), store.list(None));
        assert_matches!(Err(Error::MalformedKey(_)), store.durable_keys());

        let mut keys = store.keys(None).unwrap();
        assert_matches!(Some(Err(Error::MalformedKey(_))), keys.next());
        assert!(keys.next().is_none());
    }

    #[test]
    fn corrupt_value_is_reported() {
        let table = new_table();
        table.plant(Path::new(RES), "user.{DAV:}displayname", b"\x00\x01junk");

        let mut store = store_on(&table);
        match store.get(&dav("displayname"), None) {
            Err(Error::CorruptPropertyValue { key, len, .. }) => {
                assert_eq!("user.{DAV:}displayname", key);
                assert_eq!(6, len);
            }
            r => panic!("Unexpected result: {:?}", r),
        }
        assert!(!store.is_dirty());
    }

    #[test]
    fn partial_flush_failure() {
        let table = new_table();
        let mut store = store_on(&table);
        for local in &["a", "b", "c"] {
            let name = dav(local);
            store.set(name.clone(), value(&name, "v"), None).unwrap();
        }

        table.fail_writes_after(1);
        assert_matches!(Err(Error::PropertyIo { .. }), store.flush());
        assert_eq!(1, table.raw_names(Path::new(RES)).len());
        assert!(store.is_dirty());

        store.abort();
        assert!(!store.is_dirty());
    }

    #[test]
    fn failed_removal_is_reported() {
        let table = new_table();
        let name = dav("displayname");
        table.plant(
            Path::new(RES),
            "user.{DAV:}displayname",
            &current(&value(&name, "v")),
        );
        table.fail_deletes();

        let mut store = store_on(&table);
        store.delete(&name, None).unwrap();
        assert_matches!(Err(Error::PropertyIo { .. }), store.flush());
        assert!(store.is_dirty());
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let table = new_table();
        let mut store = store_on(&table);
        let unqualified = PropertyName::new("", "displayname");
        let braced = PropertyName::new("a{b", "c");

        assert_matches!(
            Err(Error::InvalidKey(_)),
            store.set(unqualified.clone(), value(&unqualified, "v"), None)
        );
        assert_matches!(Err(Error::InvalidKey(_)), store.get(&braced, None));
        assert_matches!(
            Err(Error::InvalidKey(_)),
            store.delete(&dav("displayname"), Some("us{er"))
        );
        assert!(!store.is_dirty());
    }

    #[test]
    fn alias_spelled_namespaces_are_rejected() {
        let table = new_table();
        let mut store = store_on(&table);
        let full = PropertyName::new(CALDAV, "x");
        let literal = PropertyName::new("CALDAV:", "x");

        store.set(full.clone(), value(&full, "full"), None).unwrap();
        assert_matches!(
            Err(Error::InvalidKey(_)),
            store.set(literal.clone(), value(&literal, "literal"), None)
        );
        assert_matches!(Err(Error::InvalidKey(_)), store.get(&literal, None));
        assert_matches!(
            Err(Error::InvalidKey(_)),
            store.delete(&literal, None)
        );
        store.flush().unwrap();

        let mut fresh = store_on(&table);
        assert_eq!(vec![full.clone()], fresh.list(None).unwrap());
        assert_eq!(value(&full, "full"), fresh.get(&full, None).unwrap());
    }

    #[test]
    fn upgrade_removes_legacy_duplicates() {
        crate::init_test_log();

        let table = new_table();
        let tz = PropertyName::new(CALDAV, "calendar-timezone");
        let legacy = "user.{urn:ietf:params:xml:ns:caldav}calendar-timezone";
        table.plant(Path::new(RES), legacy, &current(&value(&tz, "old")));
        table.plant(
            Path::new(RES),
            "user.{CALDAV:}calendar-timezone",
            &current(&value(&tz, "new")),
        );

        let mut store = store_on(&table);
        assert_eq!(
            UpgradeReport {
                examined: 1,
                rewritten: 0,
                renamed: 0,
                duplicates: 1,
            },
            store.upgrade().unwrap()
        );
        assert_eq!(
            vec!["user.{CALDAV:}calendar-timezone".to_owned()],
            table.raw_names(Path::new(RES))
        );
        assert_eq!(value(&tz, "new"), store.get(&tz, None).unwrap());
    }

    #[test]
    fn flush_through_dangling_symlink_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("resource");
        std::os::unix::fs::symlink(dir.path().join("gone"), &link).unwrap();

        let mut store = PropertyStore::for_path(None, link);
        let name = dav("displayname");
        store.set(name.clone(), value(&name, "x"), None).unwrap();
        store.flush().unwrap();
        assert!(store.is_dirty());
    }

    #[test]
    fn upgrade_rewrites_everything() {
        let table = new_table();
        let tz = PropertyName::new(CALDAV, "calendar-timezone");
        let fine = dav("getcontentlanguage");
        table.plant(
            Path::new(RES),
            "user.{urn:ietf:params:xml:ns:caldav}calendar-timezone",
            &current(&value(&tz, "UTC")),
        );
        table.plant(
            Path::new(RES),
            "user.user01{DAV:}displayname",
            b"<displayname xmlns='DAV:'>Mine</displayname>",
        );
        table.plant(
            Path::new(RES),
            "user.{DAV:}getcontentlanguage",
            &current(&value(&fine, "en")),
        );

        let mut store = store_on(&table);
        assert_eq!(
            UpgradeReport {
                examined: 3,
                rewritten: 1,
                renamed: 1,
                duplicates: 0,
            },
            store.upgrade().unwrap()
        );
        assert!(!store.is_dirty());

        let infos = store.inspect().unwrap();
        assert_eq!(3, infos.len());
        for info in &infos {
            assert_matches!(Ok(&Format::Current), info.format.as_ref());
        }

        assert_eq!(
            UpgradeReport {
                examined: 3,
                rewritten: 0,
                renamed: 0,
                duplicates: 0,
            },
            store.upgrade().unwrap()
        );
    }

    #[test]
    fn inspect_tolerates_damage() {
        let table = new_table();
        table.plant(Path::new(RES), "user.garbage", b"x");
        table.plant(Path::new(RES), "user.{DAV:}displayname", b"\xFFjunk");
        table.plant(Path::new(RES), "system.other", b"x");

        let infos = store_on(&table).inspect().unwrap();
        assert_eq!(2, infos.len());
        assert_eq!("user.garbage", infos[0].attribute);
        assert!(infos[0].key.is_err());
        assert_eq!("user.{DAV:}displayname", infos[1].attribute);
        assert_eq!(5, infos[1].size);
        assert_eq!(
            EffectiveKey::new(dav("displayname"), None),
            *infos[1].key.as_ref().unwrap()
        );
        assert!(infos[1].format.is_err());
    }

    #[test]
    fn path_is_resolved_on_every_access() {
        let table = MemoryTable::default();
        table.create(Path::new("/a"));
        table.create(Path::new("/b"));
        let current_path = Rc::new(RefCell::new(PathBuf::from("/a")));

        let provider_path = Rc::clone(&current_path);
        let mut store = PropertyStore::with_table(
            None,
            move || provider_path.borrow().clone(),
            table.clone(),
        )
        .with_key_codec(TEST_CODEC);
        assert_eq!("<PropertyStore /a>", store.to_string());

        let name = dav("displayname");
        store.set(name.clone(), value(&name, "v"), None).unwrap();
        *current_path.borrow_mut() = PathBuf::from("/b");
        store.flush().unwrap();

        assert!(table.raw_names(Path::new("/a")).is_empty());
        assert_eq!(1, table.raw_names(Path::new("/b")).len());
        assert_eq!("<PropertyStore /b>", store.to_string());
    }

    #[test]
    fn real_extended_attributes() {
        crate::init_test_log();

        let file = tempfile::NamedTempFile::new().unwrap();
        if !supports_xattrs(file.path()) {
            return;
        }

        let name = PropertyName::new(CALDAV, "calendar-description");
        let mut store =
            PropertyStore::for_path(Some("user01".to_owned()), file.path().to_owned());
        store
            .set(name.clone(), value(&name, "Mine"), Some("user01"))
            .unwrap();
        store.flush().unwrap();

        let mut fresh =
            PropertyStore::for_path(None, file.path().to_owned());
        assert_eq!(
            value(&name, "Mine"),
            fresh.get(&name, Some("user01")).unwrap()
        );
        assert_eq!(vec![name.clone()], fresh.list(Some("user01")).unwrap());
        assert!(fresh.list(None).unwrap().is_empty());

        fresh.delete(&name, Some("user01")).unwrap();
        fresh.flush().unwrap();
        assert!(fresh.list(Some("user01")).unwrap().is_empty());
    }
}
