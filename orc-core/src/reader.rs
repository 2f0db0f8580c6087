//! Memory-mapped cursor over one input file, plus the LEB128 decoders built on top of it.

use std::path::Path;

use memmap2::Mmap;

use crate::error::ReaderError;

/// A read-only memory mapping with a cursor into it.
///
/// No bounds checking on the hot read path: the caller must not seek or read past the mapped
/// region. `size()` reports bytes *remaining* from the cursor rather than the mapping's total
/// length, and a seek relative to the end is computed from that remaining-based `size()`; every
/// caller (the container and DWARF readers) is written against this quirk deliberately.
pub struct Reader {
    map: Mmap,
    pos: usize,
}

/// Seek origin for [`Reader::seek`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Reader {
    /// Maps `path` read-only.
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let file = std::fs::File::open(path).map_err(|source| ReaderError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let map = unsafe { Mmap::map(&file) }.map_err(|source| ReaderError::Map {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { map, pos: 0 })
    }

    /// Wraps an in-memory byte buffer as though it had been mapped from a file. Used by tests to
    /// exercise the container/DWARF readers against hand-built fixtures without touching disk.
    #[cfg(test)]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp fixture file");
        std::io::Write::write_all(&mut tmp, &bytes).expect("write temp fixture file");
        Self::open(tmp.path()).expect("map temp fixture file")
    }

    /// Bytes remaining between the cursor and the end of the mapping.
    pub fn size(&self) -> usize {
        self.map.len() - self.pos
    }

    /// Total length of the mapped region, independent of the cursor. Unlike [`Self::size`], this
    /// does not change as the cursor moves. Container code uses this to bound a nested member's or
    /// fat slice's byte range against the whole file.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Direct read-only access to the mapped bytes, for handing to `goblin`'s byte-slice-oriented
    /// Mach-O parser without a copy.
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn tellg(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) {
        self.pos = match whence {
            Whence::Start => offset as usize,
            Whence::Current => (self.pos as i64 + offset) as usize,
            Whence::End => self.size() - offset as usize,
        };
    }

    /// Runs `f` with the cursor temporarily moved to `offset` (from `whence`), restoring the
    /// original position afterward even if `f` panics (the guard's `Drop` runs during unwind).
    pub fn temp_seek<T>(&mut self, offset: i64, whence: Whence, f: impl FnOnce(&mut Self) -> T) -> T {
        struct Restore<'a> {
            reader: &'a mut Reader,
            pos: usize,
        }
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.reader.pos = self.pos;
            }
        }

        let saved = self.pos;
        self.seek(offset, whence);
        let mut guard = Restore { reader: self, pos: saved };
        f(&mut *guard.reader)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), ReaderError> {
        let n = buf.len();
        if n > self.size() {
            return Err(ReaderError::OutOfBounds {
                offset: self.pos,
                requested: n,
                len: self.map.len(),
            });
        }
        buf.copy_from_slice(&self.map[self.pos..self.pos + n]);
        self.pos += n;
        Ok(())
    }

    pub fn get(&mut self) -> Result<u8, ReaderError> {
        if self.size() == 0 {
            return Err(ReaderError::OutOfBounds {
                offset: self.pos,
                requested: 1,
                len: self.map.len(),
            });
        }
        let b = self.map[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Reads bytes up to (not including) the next NUL, advancing the cursor past it.
    pub fn read_c_string(&mut self) -> Result<&[u8], ReaderError> {
        let start = self.pos;
        let rest = &self.map[start..];
        let nul = rest.iter().position(|&b| b == 0).ok_or(ReaderError::OutOfBounds {
            offset: start,
            requested: rest.len() + 1,
            len: self.map.len(),
        })?;
        self.pos = start + nul + 1;
        Ok(&self.map[start..start + nul])
    }

    pub fn read_pod_u8(&mut self) -> Result<u8, ReaderError> {
        self.get()
    }

    pub fn read_pod_u16(&mut self, needs_byteswap: bool) -> Result<u16, ReaderError> {
        let mut buf = [0u8; 2];
        self.read(&mut buf)?;
        let v = u16::from_ne_bytes(buf);
        Ok(if needs_byteswap { v.swap_bytes() } else { v })
    }

    pub fn read_pod_u32(&mut self, needs_byteswap: bool) -> Result<u32, ReaderError> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        let v = u32::from_ne_bytes(buf);
        Ok(if needs_byteswap { v.swap_bytes() } else { v })
    }

    pub fn read_pod_u64(&mut self, needs_byteswap: bool) -> Result<u64, ReaderError> {
        let mut buf = [0u8; 8];
        self.read(&mut buf)?;
        let v = u64::from_ne_bytes(buf);
        Ok(if needs_byteswap { v.swap_bytes() } else { v })
    }
}

/// Decodes an unsigned LEB128 value, keeping only the low 32 bits.
///
/// The cursor always advances by the full encoded length:
/// continuation bytes are consumed even after `shift` has moved past bit 31, they're just discarded
/// rather than shifted into `result` (a Rust shift of 32+ on a `u32` would panic in debug builds, so
/// the shift itself is skipped once `shift >= 32`, not merely masked).
pub fn uleb128(r: &mut Reader) -> Result<u32, ReaderError> {
    let mut result: u32 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = r.get()?;
        if shift < 32 {
            result |= ((byte & 0x7f) as u32) << shift;
        }
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Decodes a signed LEB128 value, keeping only the low 32 bits, sign-extending when the final
/// continuation byte's `0x40` bit is set and the encoding ended before filling all 32 bits.
pub fn sleb128(r: &mut Reader) -> Result<i32, ReaderError> {
    let mut result: u32 = 0;
    let mut shift: u32 = 0;
    let mut sign = false;
    loop {
        let byte = r.get()?;
        if shift < 32 {
            result |= ((byte & 0x7f) as u32) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            sign = byte & 0x40 != 0;
            break;
        }
    }
    if sign && shift < 32 {
        result |= !0u32 << shift;
    }
    Ok(result as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_of(bytes: &[u8]) -> Reader {
        Reader::from_bytes(bytes.to_vec())
    }

    #[test]
    fn uleb128_decodes_multi_byte() {
        // 300 = 0b1_0010_1100 -> LEB bytes 0xAC 0x02
        let mut r = reader_of(&[0xAC, 0x02]);
        assert_eq!(uleb128(&mut r).unwrap(), 300);
        assert_eq!(r.tellg(), 2);
    }

    #[test]
    fn sleb128_sign_extends() {
        // -2 encodes as 0x7e
        let mut r = reader_of(&[0x7e]);
        assert_eq!(sleb128(&mut r).unwrap(), -2);
    }

    #[test]
    fn uleb128_consumes_past_32_bits_without_panicking() {
        // ten continuation bytes, all with the high bit set except the last: decodes past 32 bits
        // of shift but must still consume every byte.
        let bytes = [0xffu8, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut r = reader_of(&bytes);
        let _ = uleb128(&mut r).unwrap();
        assert_eq!(r.tellg(), bytes.len());
    }

    #[test]
    fn temp_seek_restores_position() {
        let mut r = reader_of(&[1, 2, 3, 4, 5]);
        r.seek(2, Whence::Start);
        let value = r.temp_seek(0, Whence::Start, |inner| inner.get().unwrap());
        assert_eq!(value, 1);
        assert_eq!(r.tellg(), 2);
    }
}
