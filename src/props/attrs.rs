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

//! Access to the durable attribute table of a file.
//!
//! The store only ever talks to an `AttributeTable`, which keeps the store
//! logic independent of the platform's extended attribute API. Nothing is
//! cached: every call goes back to the file system.

use std::ffi::OsString;
use std::io;
use std::path::Path;

use crate::support::file_ops::IgnoreKinds;

pub trait AttributeTable {
    /// Whether the file at `path` currently exists.
    fn exists(&self, path: &Path) -> bool;

    /// List the names of all attributes on `path`.
    ///
    /// Fails with `NotFound` if `path` does not exist.
    fn names(&self, path: &Path) -> io::Result<Vec<OsString>>;

    /// Read the attribute `name`, or `None` if it or `path` does not exist.
    fn read(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Create or overwrite the attribute `name`.
    fn write(&self, path: &Path, name: &str, value: &[u8]) -> io::Result<()>;

    /// Remove the attribute `name`, returning whether it existed.
    fn delete(&self, path: &Path, name: &str) -> io::Result<bool>;
}

/// Real extended attributes via the OS.
#[derive(Clone, Copy, Debug, Default)]
pub struct XattrTable;

impl AttributeTable for XattrTable {
    fn exists(&self, path: &Path) -> bool {
        // The xattr calls follow symlinks, so a dangling one counts as gone
        path.exists()
    }

    fn names(&self, path: &Path) -> io::Result<Vec<OsString>> {
        Ok(xattr::list(path)?.collect())
    }

    fn read(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
        xattr::get(path, name).ignore_no_attr().ignore_not_found()
    }

    fn write(&self, path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
        xattr::set(path, name, value)
    }

    fn delete(&self, path: &Path, name: &str) -> io::Result<bool> {
        xattr::remove(path, name).map(|()| true).ignore_no_attr()
    }
}
