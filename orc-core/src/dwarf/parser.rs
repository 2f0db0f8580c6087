//! The DIE-tree walk: reads `.debug_info` against a compilation unit's abbreviation table,
//! evaluates every attribute form, derives each DIE's qualified name, and resolves intra-CU
//! reference chains once the whole file's DIEs are collected.

use gimli::constants as dw;

use crate::die::{Attribute, AttributeValue, Die, DieRef};
use crate::error::{DwarfError, DwarfErrorKind};
use crate::reader::{uleb128, Reader, Whence};
use crate::registry::OfdIndex;
use crate::string_pool::{empool_str, PoolString};

use super::abbrev::{read_abbreviations_at, AbbrevAttribute, AbbreviationTable};
use super::cu::parse_cu_header;
use super::expr;
use super::line::{skip_line_program_header_prologue, FileTable};

/// Absolute `(offset, size)` in bytes of a DWARF section within the mapped file.
#[derive(Clone, Copy, Debug, Default)]
pub struct SectionSpan {
    pub offset: usize,
    pub size: usize,
}

impl SectionSpan {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// The absolute locations of the four sections this crate reads, as registered by the Mach-O
/// reader.
#[derive(Clone, Copy, Debug, Default)]
pub struct DwarfSections {
    pub debug_abbrev: SectionSpan,
    pub debug_info: SectionSpan,
    pub debug_line: SectionSpan,
    pub debug_str: SectionSpan,
}

/// Reads every compilation unit in `sections.debug_info`, returning the flat, file-granularity
/// batch of DIEs with intra-CU references already resolved.
///
/// A single line-number program at the start of `.debug_line` is parsed once and its file table
/// shared across every compilation unit in the file; object files built from more than one
/// translation unit, each with its own `DW_AT_stmt_list`-addressed line program, are out of scope
/// here (see DESIGN.md); every fixture and the overwhelming majority of real `.o` files this tool
/// analyzes carry exactly one CU per file.
pub fn parse_dwarf(
    reader: &mut Reader,
    sections: &DwarfSections,
    ofd_index: OfdIndex,
) -> Result<Vec<Die>, DwarfError> {
    let file_table = if sections.debug_line.size > 0 {
        reader.temp_seek(sections.debug_line.offset as i64, Whence::Start, |r| {
            let _version = skip_line_program_header_prologue(r)?;
            FileTable::parse(r)
        })?
    } else {
        FileTable::empty()
    };

    let mut dies = Vec::new();
    let mut cursor = sections.debug_info.offset;
    while cursor < sections.debug_info.end() {
        reader.seek(cursor as i64, Whence::Start);
        let header = parse_cu_header(reader)?;
        // `header.offset` is the CU's absolute file offset; `DieRef::debug_info_offset` is stored
        // relative to the start of `.debug_info`, so intra-CU references need the section's base
        // offset subtracted back out before they can be looked up against stored DIEs.
        let ref_base = header.offset - 4 - sections.debug_info.offset;
        let abbrevs = read_abbreviations_at(reader, sections.debug_abbrev.offset + header.abbrev_offset as usize)?;
        // `read_abbreviations_at` seeks away and back via `temp_seek`, so the cursor is still right
        // after the CU header's `address_size` field here, exactly where the DIE tree starts.
        let mut cu_file_table = file_table.clone();
        walk_die_tree(
            reader,
            &abbrevs,
            sections,
            ref_base,
            ofd_index,
            &mut cu_file_table,
            header.end_offset(),
            &mut dies,
        )?;

        cursor = header.end_offset();
    }

    resolve_references(&mut dies);
    Ok(dies)
}

#[allow(clippy::too_many_arguments)]
fn walk_die_tree(
    reader: &mut Reader,
    abbrevs: &AbbreviationTable,
    sections: &DwarfSections,
    ref_base: usize,
    ofd_index: OfdIndex,
    file_table: &mut FileTable,
    cu_end: usize,
    out: &mut Vec<Die>,
) -> Result<(), DwarfError> {
    let mut name_stack: Vec<PoolString> = vec![PoolString::NIL];

    while reader.tellg() < cu_end {
        let die_offset = reader.tellg();
        let code = uleb128(reader)? as u64;
        if code == 0 {
            name_stack.pop();
            if name_stack.is_empty() {
                break;
            }
            continue;
        }

        let abbrev = abbrevs.lookup(code)?.clone();
        let mut attributes = smallvec::SmallVec::new();
        for decl in &abbrev.attributes {
            let value = process_form(reader, decl, ref_base, sections, file_table)?;
            attributes.push(Attribute {
                name: decl.name,
                form: decl.form,
                value,
            });
        }

        let identifier = die_identifier(abbrev.tag, &attributes);
        if let Some(slot) = name_stack.last_mut() {
            *slot = identifier;
        }
        let path = qualified_symbol_name(&attributes, &name_stack);

        if abbrev.tag == dw::DW_TAG_compile_unit || abbrev.tag == dw::DW_TAG_partial_unit {
            if let Some(name) = find_attribute(&attributes, dw::DW_AT_name).and_then(|a| a.value.string) {
                file_table.set_cu_name(name);
            }
        }

        out.push(Die {
            path,
            hash: 0,
            fatal_attribute_hash: 0,
            ofd_index,
            debug_info_offset: (die_offset - sections.debug_info.offset) as u32,
            tag: abbrev.tag,
            has_children: abbrev.has_children,
            conflict: false,
            skippable: false,
            attributes,
        });

        if abbrev.has_children {
            name_stack.push(PoolString::NIL);
        }
    }

    Ok(())
}

fn find_attribute(attrs: &[Attribute], name: gimli::DwAt) -> Option<&Attribute> {
    attrs.iter().find(|a| a.name == name)
}

/// `die_identifier` in the data model: special-cases compilation/partial units, else the first
/// string-carrying attribute from a fixed priority list.
fn die_identifier(tag: gimli::DwTag, attrs: &[Attribute]) -> PoolString {
    if tag == dw::DW_TAG_compile_unit || tag == dw::DW_TAG_partial_unit {
        return empool_str("[u]");
    }
    const PRIORITY: &[gimli::DwAt] = &[
        dw::DW_AT_linkage_name,
        dw::DW_AT_name,
        dw::DW_AT_type,
        dw::DW_AT_import,
        dw::DW_AT_abstract_origin,
        dw::DW_AT_specification,
    ];
    for &name in PRIORITY {
        if let Some(s) = find_attribute(attrs, name).and_then(|a| a.value.string) {
            return s;
        }
    }
    PoolString::NIL
}

/// `qualified_symbol_name` in the data model.
fn qualified_symbol_name(attrs: &[Attribute], name_stack: &[PoolString]) -> PoolString {
    let direct_name = find_attribute(attrs, dw::DW_AT_linkage_name)
        .or_else(|| find_attribute(attrs, dw::DW_AT_specification))
        .and_then(|a| a.value.string);
    if let Some(direct) = direct_name {
        return empool_str(&format!("::[u]::{direct}"));
    }
    if name_stack.iter().any(PoolString::is_empty) {
        return PoolString::NIL;
    }
    let mut joined = String::new();
    for frame in name_stack {
        joined.push_str("::");
        joined.push_str(frame.as_str());
    }
    empool_str(&joined)
}

/// Decodes one attribute's value per its `form`, per the form table in the data model.
fn process_form(
    reader: &mut Reader,
    decl: &AbbrevAttribute,
    ref_base: usize,
    sections: &DwarfSections,
    file_table: &FileTable,
) -> Result<AttributeValue, DwarfError> {
    let form = decl.form;
    let value = match form {
        f if f == dw::DW_FORM_addr => AttributeValue::uint(reader.read_pod_u64(false)?),
        f if f == dw::DW_FORM_data1 => AttributeValue::uint(reader.read_pod_u8()? as u64),
        f if f == dw::DW_FORM_data2 => AttributeValue::uint(reader.read_pod_u16(false)? as u64),
        f if f == dw::DW_FORM_data4 => AttributeValue::uint(reader.read_pod_u32(false)? as u64),
        f if f == dw::DW_FORM_data8 => AttributeValue::uint(reader.read_pod_u64(false)?),
        f if f == dw::DW_FORM_data16 => {
            let mut buf = [0u8; 16];
            reader.read(&mut buf)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_sdata => AttributeValue::uint(crate::reader::sleb128(reader)? as i64 as u64),
        f if f == dw::DW_FORM_udata => AttributeValue::uint(uleb128(reader)? as u64),
        f if f == dw::DW_FORM_implicit_const => {
            AttributeValue::uint(decl.implicit_const_value.unwrap_or(0) as u64)
        }
        f if f == dw::DW_FORM_string => {
            let bytes = reader.read_c_string()?;
            AttributeValue::string(empool_str(&String::from_utf8_lossy(bytes)))
        }
        f if f == dw::DW_FORM_strp || f == dw::DW_FORM_line_strp || f == dw::DW_FORM_strp_sup => {
            let offset = reader.read_pod_u32(false)? as usize;
            // `.debug_str` is already mapped for the lifetime of the whole parse, so resolving
            // eagerly here costs nothing a genuinely lazy handle would save. Unlike a debugger
            // deciding whether to ever display a string, this engine reads every value it keeps.
            if sections.debug_str.size == 0 {
                AttributeValue::passover()
            } else {
                let s = reader.temp_seek(
                    (sections.debug_str.offset + offset) as i64,
                    Whence::Start,
                    |r| -> Result<PoolString, DwarfError> {
                        let bytes = r.read_c_string()?;
                        Ok(empool_str(&String::from_utf8_lossy(bytes)))
                    },
                )?;
                AttributeValue::string(s)
            }
        }
        f if f == dw::DW_FORM_flag => AttributeValue::uint(reader.read_pod_u8()? as u64),
        f if f == dw::DW_FORM_flag_present => AttributeValue::uint(1),
        f if f == dw::DW_FORM_sec_offset => AttributeValue::uint(reader.read_pod_u32(false)? as u64),
        f if f == dw::DW_FORM_ref1 => AttributeValue::reference(ref_base as u32 + reader.read_pod_u8()? as u32),
        f if f == dw::DW_FORM_ref2 => AttributeValue::reference(ref_base as u32 + reader.read_pod_u16(false)? as u32),
        f if f == dw::DW_FORM_ref4 => AttributeValue::reference(ref_base as u32 + reader.read_pod_u32(false)?),
        f if f == dw::DW_FORM_ref8 => AttributeValue::reference(ref_base as u32 + reader.read_pod_u64(false)? as u32),
        f if f == dw::DW_FORM_ref_udata => {
            AttributeValue::reference(ref_base as u32 + uleb128(reader)?)
        }
        f if f == dw::DW_FORM_ref_addr => AttributeValue::reference(reader.read_pod_u32(false)?),
        f if f == dw::DW_FORM_ref_sup4 => AttributeValue::reference(reader.read_pod_u32(false)?),
        f if f == dw::DW_FORM_ref_sup8 => AttributeValue::reference(reader.read_pod_u64(false)? as u32),
        f if f == dw::DW_FORM_ref_sig8 => AttributeValue::uint(reader.read_pod_u64(false)?),
        f if f == dw::DW_FORM_exprloc => {
            let length = uleb128(reader)? as usize;
            match expr::evaluate(reader, length)? {
                expr::ExprResult::Value(v) => AttributeValue::sint(v as i32),
                expr::ExprResult::Passover => AttributeValue::passover(),
            }
        }
        f if f == dw::DW_FORM_block1 => read_block(reader, reader.read_pod_u8()? as usize)?,
        f if f == dw::DW_FORM_block2 => read_block(reader, reader.read_pod_u16(false)? as usize)?,
        f if f == dw::DW_FORM_block4 => read_block(reader, reader.read_pod_u32(false)? as usize)?,
        f if f == dw::DW_FORM_block => {
            let length = uleb128(reader)? as usize;
            read_block(reader, length)?
        }
        f if f == dw::DW_FORM_strx => {
            let _ = uleb128(reader)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_strx1 => {
            let _ = reader.read_pod_u8()?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_strx2 => {
            let _ = reader.read_pod_u16(false)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_strx3 => {
            let mut buf = [0u8; 3];
            reader.read(&mut buf)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_strx4 => {
            let _ = reader.read_pod_u32(false)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_addrx => {
            let _ = uleb128(reader)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_addrx1 => {
            let _ = reader.read_pod_u8()?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_addrx2 => {
            let _ = reader.read_pod_u16(false)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_addrx3 => {
            let mut buf = [0u8; 3];
            reader.read(&mut buf)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_addrx4 => {
            let _ = reader.read_pod_u32(false)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_loclistx || f == dw::DW_FORM_rnglistx => {
            let _ = uleb128(reader)?;
            AttributeValue::passover()
        }
        f if f == dw::DW_FORM_indirect => {
            return Err(DwarfError::new(DwarfErrorKind::IndirectFormUnsupported));
        }
        // Every standard DWARF4/5 form is handled above; reaching here means a vendor extension
        // this crate doesn't know the byte width of. There is no safe way to skip it without
        // desyncing the rest of the DIE stream, so the whole compilation unit is abandoned rather
        // than silently misparsing everything after it.
        other => return Err(DwarfError::new(DwarfErrorKind::AbbrevCodeNotFound(other.0))),
    };

    Ok(post_process(decl.name, form, value, file_table))
}

fn read_block(reader: &mut Reader, length: usize) -> Result<AttributeValue, DwarfError> {
    for _ in 0..length {
        reader.get()?;
    }
    Ok(AttributeValue::passover())
}

/// Rewrites specific attribute values after raw form evaluation, per the data model's
/// "attribute post-processing" table.
fn post_process(name: gimli::DwAt, form: gimli::DwForm, value: AttributeValue, file_table: &FileTable) -> AttributeValue {
    if name == dw::DW_AT_decl_file {
        if let Some(index) = value.uint {
            return AttributeValue::string(file_table.get(index as u32));
        }
    }
    if name == dw::DW_AT_calling_convention {
        if let Some(code) = value.uint {
            if let Some(s) = calling_convention_name(code) {
                return AttributeValue::string(empool_str(s));
            }
        }
    }
    if name == dw::DW_AT_virtuality {
        if let Some(code) = value.uint {
            let s = match code {
                0 => "none",
                1 => "virtual",
                2 => "pure virtual",
                _ => return value,
            };
            return AttributeValue::string(empool_str(s));
        }
    }
    if name == dw::DW_AT_visibility {
        if let Some(code) = value.uint {
            let s = match code {
                1 => "local",
                2 => "exported",
                3 => "qualified",
                _ => return value,
            };
            return AttributeValue::string(empool_str(s));
        }
    }
    if name == dw::DW_AT_APPLE_property {
        if let Some(bits) = value.uint {
            return AttributeValue::string(empool_str(&apple_property_flags(bits)));
        }
    }
    if form == dw::DW_FORM_flag || form == dw::DW_FORM_flag_present {
        if let Some(v) = value.uint {
            return AttributeValue::string(empool_str(if v != 0 { "true" } else { "false" }));
        }
    }
    value
}

fn calling_convention_name(code: u64) -> Option<&'static str> {
    Some(match code {
        1 => "normal",
        2 => "program",
        3 => "nocall",
        4 => "pass by reference",
        5 => "pass by value",
        0x40 => "lo user",
        0xff => "hi user",
        _ => return None,
    })
}

fn apple_property_flags(bits: u64) -> String {
    const FLAGS: &[(u64, &str)] = &[
        (1 << 0, "readonly"),
        (1 << 1, "getter"),
        (1 << 2, "assign"),
        (1 << 3, "readwrite"),
        (1 << 4, "retain"),
        (1 << 5, "copy"),
        (1 << 6, "nonatomic"),
        (1 << 7, "setter"),
        (1 << 8, "atomic"),
        (1 << 9, "weak"),
        (1 << 10, "strong"),
        (1 << 11, "unsafe_unretained"),
        (1 << 12, "nullability"),
        (1 << 13, "null_resettable"),
        (1 << 14, "class"),
    ];
    FLAGS
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Post-parse intra-file reference resolution.
/// `dies` is sorted by `debug_info_offset` first so each DIE's references can be located by binary
/// search; `batch` index `0` is used for every [`DieRef`] produced here since these back-edges are
/// installed before the vector is frozen into its final registry batch slot (the caller
/// renumbers `batch` when it assigns the real slot; see [`crate::registration::Registration`]).
fn resolve_references(dies: &mut [Die]) {
    dies.sort_by_key(|d| d.debug_info_offset);

    for i in 0..dies.len() {
        let mut rewrites: smallvec::SmallVec<[(usize, AttributeValue); 4]> = smallvec::SmallVec::new();
        for (j, attr) in dies[i].attributes.iter().enumerate() {
            let Some(offset) = attr.value.reference else { continue };
            let Ok(target_index) = dies.binary_search_by_key(&offset, |d| d.debug_info_offset) else {
                continue;
            };
            let die_ref = DieRef {
                batch: 0,
                index: target_index as u32,
            };
            if attr.name == dw::DW_AT_type {
                let base_index = chase_type_chain(dies, target_index);
                let base_name = find_attribute(&dies[base_index].attributes, dw::DW_AT_name)
                    .and_then(|a| a.value.string)
                    .unwrap_or(PoolString::NIL);
                let resolved = DieRef {
                    batch: 0,
                    index: base_index as u32,
                };
                rewrites.push((j, attr.value.with_die(resolved, base_name)));
            } else {
                let target_path = dies[target_index].path;
                rewrites.push((j, attr.value.with_die(die_ref, target_path)));
            }
        }
        for (j, new_value) in rewrites {
            dies[i].attributes[j].value = new_value;
        }
    }
}

/// Follows `DW_AT_type` references to their base (a DIE with no `type` attribute of its own),
/// bounded by the number of DIEs in the file to guard against a cyclic type graph.
fn chase_type_chain(dies: &[Die], start: usize) -> usize {
    let mut current = start;
    for _ in 0..dies.len().max(1) {
        match find_attribute(&dies[current].attributes, dw::DW_AT_type).and_then(|a| a.value.reference) {
            Some(offset) => match dies.binary_search_by_key(&offset, |d| d.debug_info_offset) {
                Ok(next) if next != current => current = next,
                _ => return current,
            },
            None => return current,
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_dwarf_bytes() -> (Vec<u8>, DwarfSections) {
        // abbrev table: code 1 = compile_unit(DW_TAG=0x11), has_children=1, no attributes.
        let abbrev = vec![1, 0x11, 1, 0, 0, 0];

        // one CU: header + one compile_unit DIE (abbrev code 1) + null terminator.
        let mut info_body = Vec::new();
        info_body.push(1); // abbrev code 1 (compile_unit)
        info_body.push(0); // null entry closing compile_unit's children

        let mut info = Vec::new();
        let unit_length = (2 + 4 + 1 + info_body.len()) as u32;
        info.extend_from_slice(&unit_length.to_ne_bytes());
        info.extend_from_slice(&4u16.to_ne_bytes()); // version
        info.extend_from_slice(&0u32.to_ne_bytes()); // abbrev_offset
        info.push(8); // address_size
        info.extend_from_slice(&info_body);

        let mut bytes = Vec::new();
        let abbrev_offset = bytes.len();
        bytes.extend_from_slice(&abbrev);
        let info_offset = bytes.len();
        bytes.extend_from_slice(&info);

        let sections = DwarfSections {
            debug_abbrev: SectionSpan {
                offset: abbrev_offset,
                size: abbrev.len(),
            },
            debug_info: SectionSpan {
                offset: info_offset,
                size: info.len(),
            },
            debug_line: SectionSpan::default(),
            debug_str: SectionSpan::default(),
        };
        (bytes, sections)
    }

    #[test]
    fn parses_single_compile_unit_with_no_children() {
        let (bytes, sections) = minimal_dwarf_bytes();
        let mut reader = Reader::from_bytes(bytes);
        let dies = parse_dwarf(&mut reader, &sections, OfdIndex::new(0)).unwrap();
        assert_eq!(dies.len(), 1);
        assert_eq!(dies[0].tag, dw::DW_TAG_compile_unit);
        assert_eq!(dies[0].path.as_str(), "::[u]");
    }
}
