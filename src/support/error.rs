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

use std::io;

use thiserror::Error;

use crate::props::name::PropertyName;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Property not found: {0}")]
    PropertyNotFound(PropertyName),
    #[error("Invalid property key: {0}")]
    InvalidKey(String),
    #[error("Malformed property attribute name: {0:?}")]
    MalformedKey(String),
    #[error(
        "Invalid property value stored on server: {key} \
         ({len} bytes, starting {snippet})"
    )]
    CorruptPropertyValue {
        key: String,
        len: usize,
        snippet: String,
    },
    #[error("Property store I/O failure on {key}: {source}")]
    PropertyIo {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("Malformed property document: {0}")]
    MalformedDocument(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Wrap an unexpected I/O failure encountered while touching `key`.
    pub fn property_io(key: impl ToString, source: io::Error) -> Self {
        Error::PropertyIo {
            key: key.to_string(),
            source,
        }
    }
}
