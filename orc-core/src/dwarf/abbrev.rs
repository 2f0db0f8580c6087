//! `.debug_abbrev` decoding.

use gimli::DwTag;

use crate::error::{DwarfError, DwarfErrorKind};
use crate::reader::{sleb128, uleb128, Reader, Whence};

/// One `(name, form)` pair declared by an abbreviation.
///
/// `implicit_const_value` is only `Some` for `DW_FORM_implicit_const`: DWARF5 stores that form's
/// value inline in the abbreviation table (immediately after the form code, as a SLEB128) rather
/// than in the DIE's own attribute stream, so it has to travel with the abbreviation, not be read
/// again per-DIE.
#[derive(Clone, Copy, Debug)]
pub struct AbbrevAttribute {
    pub name: gimli::DwAt,
    pub form: gimli::DwForm,
    pub implicit_const_value: Option<i64>,
}

/// One entry of `.debug_abbrev`: the shape of every DIE that references `code`.
#[derive(Clone, Debug)]
pub struct Abbreviation {
    pub code: u64,
    pub tag: DwTag,
    pub has_children: bool,
    pub attributes: Vec<AbbrevAttribute>,
}

/// The abbreviations declared for one compilation unit, sorted by `code` for binary-search lookup.
pub struct AbbreviationTable {
    entries: Vec<Abbreviation>,
}

impl AbbreviationTable {
    /// Reads the abbreviation table starting at `reader`'s current position, stopping at the
    /// terminating `(0, 0)` entry.
    pub fn parse(reader: &mut Reader) -> Result<Self, DwarfError> {
        let mut entries = Vec::new();
        loop {
            let code = uleb128(reader)? as u64;
            if code == 0 {
                break;
            }
            let tag = DwTag(uleb128(reader)? as u64);
            let has_children = reader.read_pod_u8()? != 0;

            let mut attributes = Vec::new();
            loop {
                let name = uleb128(reader)? as u64;
                let form = uleb128(reader)? as u64;
                if name == 0 && form == 0 {
                    break;
                }
                let implicit_const_value = if form == gimli::constants::DW_FORM_implicit_const.0 {
                    Some(sleb128(reader)? as i64)
                } else {
                    None
                };
                attributes.push(AbbrevAttribute {
                    name: gimli::DwAt(name),
                    form: gimli::DwForm(form),
                    implicit_const_value,
                });
            }

            entries.push(Abbreviation {
                code,
                tag,
                has_children,
                attributes,
            });
        }

        entries.sort_by_key(|a| a.code);
        Ok(Self { entries })
    }

    /// Looks up the abbreviation for `code` by binary search.
    pub fn lookup(&self, code: u64) -> Result<&Abbreviation, DwarfError> {
        self.entries
            .binary_search_by_key(&code, |a| a.code)
            .map(|i| &self.entries[i])
            .map_err(|_| DwarfError::new(DwarfErrorKind::AbbrevCodeNotFound(code)))
    }
}

/// Seeks `reader` to `offset` (absolute within the file) and parses the abbreviation table there.
pub fn read_abbreviations_at(reader: &mut Reader, offset: usize) -> Result<AbbreviationTable, DwarfError> {
    reader.temp_seek(offset as i64, Whence::Start, AbbreviationTable::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_for_one_abbrev() -> Vec<u8> {
        // code=1, tag=DW_TAG_subprogram(0x2e), has_children=1,
        // attr (DW_AT_name=0x03, DW_FORM_string=0x08), terminator (0,0), table terminator (0).
        vec![1, 0x2e, 1, 0x03, 0x08, 0, 0, 0]
    }

    #[test]
    fn parses_single_abbreviation() {
        let mut r = Reader::from_bytes(bytes_for_one_abbrev());
        let table = AbbreviationTable::parse(&mut r).unwrap();
        let entry = table.lookup(1).unwrap();
        assert_eq!(entry.tag, gimli::constants::DW_TAG_subprogram);
        assert!(entry.has_children);
        assert_eq!(entry.attributes.len(), 1);
        assert_eq!(entry.attributes[0].name, gimli::constants::DW_AT_name);
    }

    #[test]
    fn unknown_code_is_an_error() {
        let mut r = Reader::from_bytes(bytes_for_one_abbrev());
        let table = AbbreviationTable::parse(&mut r).unwrap();
        assert!(table.lookup(99).is_err());
    }
}
