//! Compilation-unit header parsing.

use crate::error::{DwarfError, DwarfErrorKind};
use crate::reader::Reader;

/// The fixed-size header at the start of each `.debug_info` compilation unit.
#[derive(Clone, Copy, Debug)]
pub struct CompilationUnitHeader {
    /// Offset of the first byte after the 4-byte length field, i.e. where `version` begins.
    pub offset: usize,
    /// Length of the unit's body, not counting the 4-byte length field itself.
    pub unit_length: u32,
    pub version: u16,
    pub abbrev_offset: u32,
    pub address_size: u8,
}

impl CompilationUnitHeader {
    /// Offset of the byte immediately past this unit (the length field plus the body).
    pub fn end_offset(&self) -> usize {
        self.offset + self.unit_length as usize
    }
}

/// DWARF64 units declare a length of `0xFFFFFFF0..=0xFFFFFFFF`; this crate does not support them.
const DWARF64_MARKER_MIN: u32 = 0xFFFF_FFF0;

/// Parses one compilation-unit header at `reader`'s current position.
pub fn parse_cu_header(reader: &mut Reader) -> Result<CompilationUnitHeader, DwarfError> {
    let unit_length = reader.read_pod_u32(false)?;
    if unit_length >= DWARF64_MARKER_MIN {
        return Err(DwarfError::new(DwarfErrorKind::Dwarf64Unsupported));
    }
    let offset = reader.tellg();
    let version = reader.read_pod_u16(false)?;
    let abbrev_offset = reader.read_pod_u32(false)?;
    let address_size = reader.read_pod_u8()?;

    Ok(CompilationUnitHeader {
        offset,
        unit_length,
        version,
        abbrev_offset,
        address_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_header() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&11u32.to_ne_bytes()); // unit_length (body only)
        bytes.extend_from_slice(&4u16.to_ne_bytes()); // version
        bytes.extend_from_slice(&0u32.to_ne_bytes()); // abbrev_offset
        bytes.push(8); // address_size

        let mut r = Reader::from_bytes(bytes);
        let header = parse_cu_header(&mut r).unwrap();
        assert_eq!(header.version, 4);
        assert_eq!(header.address_size, 8);
        assert_eq!(header.end_offset(), header.offset + 11);
    }

    #[test]
    fn rejects_dwarf64_length_prefix() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xFFFF_FFFFu32.to_ne_bytes());
        let mut r = Reader::from_bytes(bytes);
        let err = parse_cu_header(&mut r).unwrap_err();
        assert_eq!(err.kind(), DwarfErrorKind::Dwarf64Unsupported);
    }
}
