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

/// Determine whether the given string is a "safe" property namespace.
///
/// The namespace is stored between `{` and `}` in the attribute name, so it
/// may contain neither brace. Empty namespaces are refused since they cannot
/// be told apart from a malformed key on the way back out.
pub fn is_safe_namespace(ns: &str) -> bool {
    !ns.is_empty()
        && !ns.contains(|c: char| c == '{' || c == '}')
        && !has_control(ns)
}

/// Determine whether the given string is a "safe" property local name.
///
/// Braces are fine here since decoding splits on the first `}`.
pub fn is_safe_local_name(name: &str) -> bool {
    !name.is_empty() && !has_control(name)
}

/// Determine whether the given string can be used as an owner uid.
///
/// The uid is prepended to the attribute name without percent-encoding, but
/// the whole name is percent-decoded when read back. It therefore must not
/// contain `%`, nor anything that would be confused with the start of the
/// namespace.
pub fn is_safe_uid(uid: &str) -> bool {
    !uid.is_empty()
        && !uid.contains(|c: char| c == '{' || c == '}' || c == '%')
        && !has_control(uid)
}

fn has_control(s: &str) -> bool {
    s.contains(|c: char| c < ' ' || c == '\x7F')
}
