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

//! Classification of the I/O errors the property store expects to see.

use std::io;

/// The errno reported when an extended attribute does not exist.
///
/// Linux reports `ENODATA`. Darwin and the BSDs have a dedicated `ENOATTR`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const NO_ATTR_ERRNO: i32 = nix::libc::ENODATA;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const NO_ATTR_ERRNO: i32 = nix::libc::ENOATTR;

/// Whether `e` means "no such extended attribute".
pub fn is_no_attr(e: &io::Error) -> bool {
    Some(NO_ATTR_ERRNO) == e.raw_os_error()
}

pub trait IgnoreKinds {
    fn ignore_not_found(self) -> Self;
    fn ignore_no_attr(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }

    fn ignore_no_attr(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if is_no_attr(&e) => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}
