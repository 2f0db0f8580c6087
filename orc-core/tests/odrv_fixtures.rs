//! End-to-end fixture tests: hand-assembled Mach-O64 object files carrying real `__DWARF` section
//! bytes, driven through the full `container::process_file` → `dwarf::parse_dwarf` →
//! `registration` pipeline via the public `Engine` API.
//!
//! These exercise the byte-level plumbing (Mach-O load commands, section offsets, DWARF
//! abbreviations, CU headers, DIE attribute streams) that `registration`'s own unit tests don't
//! touch, since those build `Die` values directly. The attribute-level conflict rules themselves
//! (skip filters, fatal/non-fatal classification, type-chain equivalence) are covered there in more
//! breadth than is practical to re-derive in raw bytes here.

use std::io::Write;

use tempfile::NamedTempFile;

use orc_core::scheduler::TaskSystem;
use orc_core::settings::Settings;
use orc_core::Engine;

const MH_MAGIC_64: u32 = 0xfeedfacf;
const CPU_TYPE_X86_64: u32 = 7 | 0x0100_0000;
const LC_SEGMENT_64: u32 = 0x19;

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn fixed_name(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

/// `.debug_abbrev` for the fixed three-abbreviation shape every fixture here uses: a compile unit
/// with one subprogram child, whose `DW_AT_type` points at a base type DIE.
fn abbrev_table_bytes(with_decl_line: bool) -> Vec<u8> {
    let mut b = Vec::new();
    // code 1: DW_TAG_compile_unit, has_children, no attributes.
    b.extend_from_slice(&[1, 0x11, 1, 0, 0]);
    // code 2: DW_TAG_subprogram, no children: name(string), external(flag_present), type(ref4)[,
    // decl_line(data4)].
    b.push(2);
    b.push(0x2e);
    b.push(0);
    b.extend_from_slice(&[0x03, 0x08]); // DW_AT_name, DW_FORM_string
    b.extend_from_slice(&[0x3f, 0x19]); // DW_AT_external, DW_FORM_flag_present
    b.extend_from_slice(&[0x49, 0x13]); // DW_AT_type, DW_FORM_ref4
    if with_decl_line {
        b.extend_from_slice(&[0x3a, 0x06]); // DW_AT_decl_line, DW_FORM_data4
    }
    b.extend_from_slice(&[0, 0]);
    // code 3: DW_TAG_base_type, no children: name(string), encoding(data1), byte_size(data1).
    b.push(3);
    b.push(0x24);
    b.push(0);
    b.extend_from_slice(&[0x03, 0x08]);
    b.extend_from_slice(&[0x3e, 0x0b]);
    b.extend_from_slice(&[0x0b, 0x0b]);
    b.extend_from_slice(&[0, 0]);
    b.push(0); // table terminator
    b
}

/// Builds the `.debug_info` body for one compilation unit: `compile_unit { subprogram "foo" ->
/// base_type(type_name) }`. Returns the body bytes; the CU header is prepended separately once its
/// length is known.
fn info_body(type_name: &str, decl_line: Option<u32>) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(1); // compile_unit
    body.push(2); // subprogram
    push_cstr(&mut body, "foo");
    let type_ref_at = body.len();
    body.extend_from_slice(&0u32.to_ne_bytes()); // DW_AT_type placeholder, patched below
    if let Some(line) = decl_line {
        body.extend_from_slice(&line.to_ne_bytes());
    }

    let base_type_rel_offset = body.len();
    body.push(3); // base_type
    push_cstr(&mut body, type_name);
    body.push(5); // DW_AT_encoding
    body.push(4); // DW_AT_byte_size

    body.push(0); // null: closes compile_unit's children

    // `DW_FORM_ref4` is relative to the start of the CU (the unit_length field); the header ahead
    // of this body is always 11 bytes (4 + 2 + 4 + 1).
    let type_ref4 = (11 + base_type_rel_offset) as u32;
    body[type_ref_at..type_ref_at + 4].copy_from_slice(&type_ref4.to_ne_bytes());
    body
}

fn cu_bytes(body: &[u8]) -> Vec<u8> {
    let mut cu = Vec::new();
    let unit_length = (2 + 4 + 1 + body.len()) as u32;
    cu.extend_from_slice(&unit_length.to_ne_bytes());
    cu.extend_from_slice(&4u16.to_ne_bytes()); // version
    cu.extend_from_slice(&0u32.to_ne_bytes()); // abbrev_offset
    cu.push(8); // address_size
    cu.extend_from_slice(body);
    cu
}

fn section_64(sectname: &str, segname: &str, offset: u32, size: u64) -> Vec<u8> {
    let mut s = Vec::new();
    s.extend_from_slice(&fixed_name(sectname));
    s.extend_from_slice(&fixed_name(segname));
    s.extend_from_slice(&0u64.to_ne_bytes()); // addr
    s.extend_from_slice(&size.to_ne_bytes());
    s.extend_from_slice(&offset.to_ne_bytes());
    s.extend_from_slice(&0u32.to_ne_bytes()); // align
    s.extend_from_slice(&0u32.to_ne_bytes()); // reloff
    s.extend_from_slice(&0u32.to_ne_bytes()); // nreloc
    s.extend_from_slice(&0u32.to_ne_bytes()); // flags
    s.extend_from_slice(&0u32.to_ne_bytes()); // reserved1
    s.extend_from_slice(&0u32.to_ne_bytes()); // reserved2
    s.extend_from_slice(&0u32.to_ne_bytes()); // reserved3
    s
}

/// Assembles a minimal Mach-O64 object file whose `__DWARF` segment carries exactly one
/// compilation unit with a single externally visible `foo()` whose return type is `type_name`.
fn build_object(type_name: &str, decl_line: Option<u32>) -> Vec<u8> {
    let abbrev = abbrev_table_bytes(decl_line.is_some());
    let info = cu_bytes(&info_body(type_name, decl_line));

    const HEADER_LEN: usize = 32;
    const SEGMENT_LEN: usize = 72;
    const SECTION_LEN: usize = 80;
    let cmdsize = SEGMENT_LEN + 2 * SECTION_LEN;
    let data_offset = (HEADER_LEN + cmdsize) as u32;

    let mut file = Vec::new();

    // mach_header_64
    file.extend_from_slice(&MH_MAGIC_64.to_ne_bytes());
    file.extend_from_slice(&CPU_TYPE_X86_64.to_ne_bytes());
    file.extend_from_slice(&3u32.to_ne_bytes()); // cpusubtype
    file.extend_from_slice(&1u32.to_ne_bytes()); // filetype: MH_OBJECT
    file.extend_from_slice(&1u32.to_ne_bytes()); // ncmds
    file.extend_from_slice(&(cmdsize as u32).to_ne_bytes());
    file.extend_from_slice(&0u32.to_ne_bytes()); // flags
    file.extend_from_slice(&0u32.to_ne_bytes()); // reserved
    assert_eq!(file.len(), HEADER_LEN);

    // segment_command_64
    file.extend_from_slice(&LC_SEGMENT_64.to_ne_bytes());
    file.extend_from_slice(&(cmdsize as u32).to_ne_bytes());
    file.extend_from_slice(&fixed_name("__DWARF"));
    file.extend_from_slice(&0u64.to_ne_bytes()); // vmaddr
    file.extend_from_slice(&0u64.to_ne_bytes()); // vmsize
    file.extend_from_slice(&(data_offset as u64).to_ne_bytes()); // fileoff
    file.extend_from_slice(&((abbrev.len() + info.len()) as u64).to_ne_bytes()); // filesize
    file.extend_from_slice(&7u32.to_ne_bytes()); // maxprot
    file.extend_from_slice(&7u32.to_ne_bytes()); // initprot
    file.extend_from_slice(&2u32.to_ne_bytes()); // nsects
    file.extend_from_slice(&0u32.to_ne_bytes()); // flags

    file.extend_from_slice(&section_64("__debug_info", "__DWARF", data_offset, info.len() as u64));
    file.extend_from_slice(&section_64(
        "__debug_abbrev",
        "__DWARF",
        data_offset + info.len() as u32,
        abbrev.len() as u64,
    ));

    assert_eq!(file.len(), data_offset as usize);
    file.extend_from_slice(&info);
    file.extend_from_slice(&abbrev);
    file
}

fn write_object(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("create object fixture");
    f.write_all(bytes).expect("write object fixture");
    f
}

fn run(paths: &[std::path::PathBuf], settings: &Settings) -> Vec<orc_core::OdrvReport> {
    let engine = Engine::new();
    let tasks = TaskSystem::new(false);
    engine.process(paths, settings, &tasks)
}

#[test]
fn conflicting_return_types_across_two_object_files_report_an_odrv() {
    let a = write_object(&build_object("int", None));
    let b = write_object(&build_object("bool", None));
    let settings = Settings::default();

    let reports = run(&[a.path().to_path_buf(), b.path().to_path_buf()], &settings);

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].category(), "subprogram:type");
    assert_eq!(reports[0].symbol.as_str(), "foo");
}

#[test]
fn identical_return_types_report_nothing() {
    let a = write_object(&build_object("int", None));
    let b = write_object(&build_object("int", None));
    let settings = Settings::default();

    let reports = run(&[a.path().to_path_buf(), b.path().to_path_buf()], &settings);

    assert!(reports.is_empty());
}

#[test]
fn decl_line_difference_alone_is_not_reported() {
    let a = write_object(&build_object("int", Some(10)));
    let b = write_object(&build_object("int", Some(42)));
    let settings = Settings::default();

    let reports = run(&[a.path().to_path_buf(), b.path().to_path_buf()], &settings);

    assert!(reports.is_empty());
}

#[test]
fn a_single_object_file_alone_reports_nothing() {
    let a = write_object(&build_object("int", None));
    let settings = Settings::default();

    let reports = run(&[a.path().to_path_buf()], &settings);

    assert!(reports.is_empty());
}
