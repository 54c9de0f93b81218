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

//! Constants from `sysexits.h`
//!
//! The command line tool reports failures with these so that scripts driving
//! it can tell a missing property from a damaged one.

use super::error::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }
}

impl From<&Error> for Sysexit {
    fn from(e: &Error) -> Self {
        match *e {
            Error::PropertyNotFound(..) => EX_NOINPUT,
            Error::InvalidKey(..) => EX_USAGE,
            Error::MalformedKey(..)
            | Error::CorruptPropertyValue { .. }
            | Error::MalformedDocument(..) => EX_DATAERR,
            Error::PropertyIo { .. } | Error::Io(..) => EX_IOERR,
            Error::Toml(..) => EX_CONFIG,
        }
    }
}
