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

//! Mapping between effective keys and extended attribute names.
//!
//! An attribute name has the form
//!
//! ```text
//! PREFIX [UID] "{" NAMESPACE-OR-ALIAS "}" LOCALNAME
//! ```
//!
//! where everything from the `{` onwards is percent-encoded except for `{`,
//! `}` and `:`. The UID is written as-is.
//!
//! Many file systems limit attribute names to 127 bytes. Since the UID makes
//! the names considerably longer, the namespaces that see heavy use are
//! replaced with short aliases. Properties written before an alias existed
//! are still stored under the full namespace; the store is responsible for
//! finding and upgrading those.

use std::borrow::Cow;

use percent_encoding::{
    percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC,
};

use super::name::{EffectiveKey, PropertyName};
use crate::support::error::Error;

/// Characters left as-is when percent-encoding the `{ns}name` part.
const NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'{')
    .remove(b'}')
    .remove(b':');

/// Attribute names longer than this are rejected by common file systems.
pub const MAX_ATTRIBUTE_NAME_LEN: usize = 127;

/// Prefix distinguishing dead properties from unrelated attributes.
///
/// Linux only permits unprivileged processes to use the `user.` namespace.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const ATTRIBUTE_PREFIX: &str = "user.";
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const ATTRIBUTE_PREFIX: &str = "WebDAV:";

/// Full namespace to alias. Both columns must be unique.
pub const NAMESPACE_ALIASES: &[(&str, &str)] = &[
    ("urn:ietf:params:xml:ns:caldav", "CALDAV:"),
    ("urn:ietf:params:xml:ns:carddav", "CARDDAV:"),
    ("http://calendarserver.org/ns/", "CS:"),
    ("http://cal.me.com/_namespace/", "ME:"),
    ("http://twistedmatrix.com/xml_namespace/dav/", "TD:"),
    ("http://twistedmatrix.com/xml_namespace/dav/private/", "TDP:"),
];

#[derive(Clone, Copy, Debug)]
pub struct KeyCodec {
    prefix: &'static str,
    aliases: &'static [(&'static str, &'static str)],
}

impl Default for KeyCodec {
    fn default() -> Self {
        KeyCodec::new(ATTRIBUTE_PREFIX, NAMESPACE_ALIASES)
    }
}

impl KeyCodec {
    pub const fn new(
        prefix: &'static str,
        aliases: &'static [(&'static str, &'static str)],
    ) -> Self {
        KeyCodec { prefix, aliases }
    }

    /// Whether `name` is in this codec's part of the attribute namespace.
    pub fn owns(&self, name: &str) -> bool {
        name.starts_with(self.prefix)
    }

    /// Whether `namespace` is written under an alias.
    ///
    /// Properties in such namespaces may also exist under the legacy,
    /// uncompressed attribute name.
    pub fn has_alias(&self, namespace: &str) -> bool {
        self.aliases.iter().any(|&(full, _)| full == namespace)
    }

    /// Whether properties in `namespace` can be stored.
    ///
    /// A namespace spelled like an alias would decode as the namespace the
    /// alias stands for, so it is refused.
    pub fn accepts_namespace(&self, namespace: &str) -> bool {
        !self.aliases.iter().any(|&(_, alias)| alias == namespace)
    }

    pub fn compress_namespace<'a>(&self, namespace: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|&&(full, _)| full == namespace)
            .map(|&(_, alias)| alias)
            .unwrap_or(namespace)
    }

    pub fn expand_namespace<'a>(&self, namespace: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|&&(_, alias)| alias == namespace)
            .map(|&(full, _)| full)
            .unwrap_or(namespace)
    }

    /// Produce the attribute name for `key`.
    ///
    /// No truncation is performed; keeping the result under
    /// `MAX_ATTRIBUTE_NAME_LEN` is a matter of maintaining the alias table.
    pub fn encode(&self, key: &EffectiveKey, compress_namespace: bool) -> String {
        let namespace = if compress_namespace {
            self.compress_namespace(&key.name.namespace)
        } else {
            &key.name.namespace
        };

        let qualified = format!("{{{}}}{}", namespace, key.name.name);
        let mut encoded = String::with_capacity(
            self.prefix.len()
                + key.uid.as_ref().map_or(0, String::len)
                + qualified.len(),
        );
        encoded.push_str(self.prefix);
        if let Some(ref uid) = key.uid {
            encoded.push_str(uid);
        }
        encoded.extend(utf8_percent_encode(&qualified, NAME_ENCODE_SET));
        encoded
    }

    /// Parse an attribute name produced by `encode()`.
    ///
    /// Aliases are expanded; unknown namespaces are taken literally.
    pub fn decode(&self, encoded: &str) -> Result<EffectiveKey, Error> {
        let malformed = || Error::MalformedKey(encoded.to_owned());

        let rest = encoded.strip_prefix(self.prefix).ok_or_else(malformed)?;
        let rest: Cow<str> = percent_decode_str(rest)
            .decode_utf8()
            .map_err(|_| malformed())?;

        let open = rest.find('{').ok_or_else(malformed)?;
        let close = rest.find('}').ok_or_else(malformed)?;
        if close < open || close + 1 >= rest.len() {
            return Err(malformed());
        }

        let uid = if 0 == open {
            None
        } else {
            Some(rest[..open].to_owned())
        };
        let namespace = self.expand_namespace(&rest[open + 1..close]);

        Ok(EffectiveKey {
            name: PropertyName::new(namespace, &rest[close + 1..]),
            uid,
        })
    }
}
