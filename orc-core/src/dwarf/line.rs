//! `.debug_line` file-table extraction.
//!
//! ORC only needs the file table (for resolving `DW_AT_decl_file` and the compile-unit's own name
//! into a qualified path component), never the line-number program itself, so parsing stops the
//! moment the file table is read.

use crate::error::DwarfError;
use crate::reader::{uleb128, Reader};
use crate::string_pool::{empool_str, PoolString};

/// Skips the line-number program header's fixed prologue fields (everything between
/// `unit_length` and the include-directory table), leaving the cursor positioned exactly where
/// [`FileTable::parse`] expects to start.
///
/// This assumes the classic (DWARF ≤ 4) NUL-terminated directory/file-name encoding described by
/// the data model; DWARF5's entry-format-based directory and file tables are a materially different
/// encoding this crate does not special-case, matching the narrower scope the data model describes.
pub fn skip_line_program_header_prologue(reader: &mut Reader) -> Result<u16, DwarfError> {
    let _unit_length = reader.read_pod_u32(false)?;
    let version = reader.read_pod_u16(false)?;
    let _header_length = reader.read_pod_u32(false)?;
    let _minimum_instruction_length = reader.read_pod_u8()?;
    if version >= 4 {
        let _maximum_operations_per_instruction = reader.read_pod_u8()?;
    }
    let _default_is_stmt = reader.read_pod_u8()?;
    let _line_base = reader.read_pod_u8()?;
    let _line_range = reader.read_pod_u8()?;
    let opcode_base = reader.read_pod_u8()?;
    for _ in 0..opcode_base.saturating_sub(1) {
        let _standard_opcode_length = reader.read_pod_u8()?;
    }
    Ok(version)
}

/// `directory + "/" + name`, or just `name` when `directory_index == 0`: one entry per file
/// declared in a compilation unit's line-number program header.
#[derive(Clone)]
pub struct FileTable {
    files: Vec<PoolString>,
    cu_name: PoolString,
}

impl FileTable {
    /// An empty table: every lookup (other than a CU name set afterward) returns the nil handle.
    /// Used when a file carries no `.debug_line` section at all.
    pub fn empty() -> Self {
        Self {
            files: Vec::new(),
            cu_name: PoolString::NIL,
        }
    }

    /// Parses the include-directory and file-name tables starting at `reader`'s current position
    /// (immediately after the line-number program header's fixed fields, which callers are
    /// expected to have already skipped; this crate only ever calls this through
    /// [`crate::dwarf::parser`], which does so).
    pub fn parse(reader: &mut Reader) -> Result<Self, DwarfError> {
        let mut directories = vec![PoolString::NIL]; // index 0 is the CU's own compilation directory
        loop {
            let dir = reader.read_c_string()?;
            if dir.is_empty() {
                break;
            }
            directories.push(empool_str(&String::from_utf8_lossy(dir)));
        }

        let mut files = Vec::new();
        loop {
            let name = reader.read_c_string()?;
            if name.is_empty() {
                break;
            }
            let directory_index = uleb128(reader)?;
            let _mtime = uleb128(reader)?;
            let _length = uleb128(reader)?;

            let name = String::from_utf8_lossy(name);
            let entry = match directories.get(directory_index as usize) {
                Some(dir) if !dir.is_empty() => empool_str(&format!("{dir}/{name}")),
                _ => empool_str(&name),
            };
            files.push(entry);
        }

        Ok(Self {
            files,
            cu_name: PoolString::NIL,
        })
    }

    /// Looks up a file by its 1-based `DW_AT_decl_file` index. Index `0` returns the compile unit's
    /// own name (set via [`Self::set_cu_name`]) rather than "no file": a `decl_file` of `0` in
    /// practice almost never appears on a fatal attribute this engine compares, so either reading is
    /// observationally equivalent for ODRV purposes, but this one folds the CU DIE's name into the
    /// file table rather than discarding it.
    pub fn get(&self, index: u32) -> PoolString {
        if index == 0 {
            return self.cu_name;
        }
        self.files.get(index as usize - 1).copied().unwrap_or(PoolString::NIL)
    }

    /// Records the compile-unit DIE's own `DW_AT_name` as file index `0`, without disturbing the
    /// 1-based indices of entries read from `.debug_line`. Each compilation unit in a file gets its
    /// own clone of the shared file table specifically so this doesn't leak across CUs.
    pub fn set_cu_name(&mut self, name: PoolString) {
        self.cu_name = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_for_one_file() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(b"/usr/include\0"); // one directory
        b.push(0); // end of directory table
        b.extend_from_slice(b"foo.h\0");
        b.push(1); // directory_index = 1
        b.push(0); // mtime
        b.push(0); // length
        b.push(0); // end of file table
        b
    }

    #[test]
    fn resolves_directory_plus_name() {
        let mut r = Reader::from_bytes(bytes_for_one_file());
        let table = FileTable::parse(&mut r).unwrap();
        assert_eq!(table.get(1).as_str(), "/usr/include/foo.h");
    }

    #[test]
    fn index_zero_is_nil() {
        let mut r = Reader::from_bytes(bytes_for_one_file());
        let table = FileTable::parse(&mut r).unwrap();
        assert!(table.get(0).is_empty());
    }

    #[test]
    fn prologue_skip_lands_exactly_on_directory_table() {
        let mut header = Vec::new();
        header.extend_from_slice(&20u32.to_ne_bytes()); // unit_length (not validated here)
        header.extend_from_slice(&4u16.to_ne_bytes()); // version 4
        header.extend_from_slice(&10u32.to_ne_bytes()); // header_length (unused by the skip)
        header.push(1); // minimum_instruction_length
        header.push(1); // maximum_operations_per_instruction (version >= 4)
        header.push(1); // default_is_stmt
        header.push(0xfb); // line_base (-5)
        header.push(14); // line_range
        header.push(1); // opcode_base (no standard opcode lengths follow)
        header.extend_from_slice(&bytes_for_one_file());

        let mut r = Reader::from_bytes(header);
        let version = skip_line_program_header_prologue(&mut r).unwrap();
        assert_eq!(version, 4);
        let table = FileTable::parse(&mut r).unwrap();
        assert_eq!(table.get(1).as_str(), "/usr/include/foo.h");
    }
}
