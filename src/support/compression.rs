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

//! Provides a façade around the zlib compression used for property values.

use std::io::{self, Write};

use flate2::{Decompress, FlushDecompress, Status};

/// Upper bound on the size of an inflated value.
///
/// Extended attribute values are small on every file system we care about, so
/// anything inflating past this is treated as not being a valid stream.
pub const MAX_INFLATED_SIZE: usize = 8 * 1024 * 1024;

/// Compress `data` into a complete zlib stream.
pub fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2 + 16),
        flate2::Compression::default(),
    );
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress `data`, which must be a complete zlib stream.
///
/// Returns `None` if `data` is not zlib, is truncated, or inflates beyond
/// `MAX_INFLATED_SIZE`. Trailing bytes after the end of the stream are
/// ignored.
pub fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut decompress = Decompress::new(true);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).max(64));

    loop {
        let consumed = decompress.total_in() as usize;
        let produced = decompress.total_out();
        let status = decompress
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Finish)
            .ok()?;

        match status {
            Status::StreamEnd => return Some(out),
            Status::Ok | Status::BufError => {
                if out.len() > MAX_INFLATED_SIZE {
                    return None;
                }

                if out.len() == out.capacity() {
                    out.reserve(out.capacity().max(64));
                } else if decompress.total_in() as usize == consumed
                    && decompress.total_out() == produced
                {
                    // No progress with room to spare; the input ran out
                    // before the end of the stream.
                    return None;
                }
            }
        }
    }
}
