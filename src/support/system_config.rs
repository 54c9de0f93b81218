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

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::props::name::PropertyName;
use crate::props::scope::SpecialProperties;
use crate::support::error::Error;

/// The system-wide configuration for Deadprop.
///
/// This is stored in a file named `deadprop.toml`, typically under
/// `/usr/local/etc/deadprop` or `/etc/deadprop`. Every section is optional.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Which properties are shared between principals.
    #[serde(default)]
    pub scope: ScopeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Property names in Clark notation, e.g.
/// `{http://calendarserver.org/ns/}getctag`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeConfig {
    /// Properties which are per-principal, but which fall back to the shared
    /// value when the principal has not set their own.
    pub shadowable: Vec<String>,

    /// Properties which are always shared by all principals.
    pub global: Vec<String>,
}

impl ScopeConfig {
    /// Add the names from `other` to this configuration.
    pub fn merge(&mut self, other: ScopeConfig) {
        self.shadowable.extend(other.shadowable);
        self.global.extend(other.global);
    }

    /// Parse the configured names.
    ///
    /// A name listed as both shadowable and global is treated as global.
    pub fn special_properties(&self) -> Result<SpecialProperties, Error> {
        let parse = |names: &[String]| {
            names
                .iter()
                .map(|n| n.parse::<PropertyName>())
                .collect::<Result<BTreeSet<_>, _>>()
        };

        let global = parse(&self.global)?;
        let shadowable = parse(&self.shadowable)?
            .into_iter()
            .filter(|n| !global.contains(n))
            .collect();
        Ok(SpecialProperties { shadowable, global })
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A log4rs configuration file.
    ///
    /// If unset and not running interactively, logs go to syslog.
    pub config: Option<PathBuf>,
}
