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

//! Property names and the effective keys they are stored under.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;
use crate::support::safe_name::{
    is_safe_local_name, is_safe_namespace, is_safe_uid,
};

/// A namespace-qualified property name.
///
/// The `Display` format is Clark notation, `{namespace}name`. `FromStr` does
/// the reverse conversion.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PropertyName {
    pub namespace: String,
    pub name: String,
}

impl PropertyName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        PropertyName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Whether this name may be stored at all.
    pub fn is_valid(&self) -> bool {
        is_safe_namespace(&self.namespace) && is_safe_local_name(&self.name)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidKey(self.to_string()))
        }
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.name)
    }
}

impl fmt::Debug for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <PropertyName as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for PropertyName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidKey(s.to_owned());

        let rest = s.strip_prefix('{').ok_or_else(invalid)?;
        let close = rest.find('}').ok_or_else(invalid)?;
        let name =
            PropertyName::new(&rest[..close], &rest[close + 1..]);
        name.validate()?;
        Ok(name)
    }
}

/// The true identity of a stored property: its name plus the principal that
/// owns it.
///
/// `uid == None` is a property shared by all principals with access to the
/// resource.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EffectiveKey {
    pub name: PropertyName,
    pub uid: Option<String>,
}

impl EffectiveKey {
    pub fn new(name: PropertyName, uid: Option<&str>) -> Self {
        EffectiveKey {
            name,
            uid: uid.map(str::to_owned),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.name.validate()?;
        match self.uid {
            Some(ref uid) if !is_safe_uid(uid) => {
                Err(Error::InvalidKey(format!("{} (uid {:?})", self.name, uid)))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for EffectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.uid {
            Some(ref uid) => write!(f, "{} for {}", self.name, uid),
            None => write!(f, "{}", self.name),
        }
    }
}
