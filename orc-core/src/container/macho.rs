//! Mach-O load-command walk: locate the `__DWARF` segment's four sections and hand them to the
//! DWARF parser.
//!
//! Load-command and section parsing is delegated to `goblin` (already pinned in the workspace for
//! exactly this) rather than hand-walked, since `goblin::mach::MachO` already resolves section file
//! offsets against the slice's own base offset; re-deriving that from `(cmd, cmdsize)` pairs by
//! hand would just be reimplementing `goblin`'s own parser less carefully.

use crate::arch::{Arch, Format};
use crate::dwarf::{self, DwarfSections, SectionSpan};
use crate::error::{ContainerError, CoreResult};
use crate::reader::Reader;
use crate::registry::{Ancestry, FileDetails};
use crate::settings::Settings;
use crate::Engine;

#[allow(clippy::too_many_arguments)]
pub(crate) fn process(
    engine: &Engine,
    reader: &mut Reader,
    offset: usize,
    _size: usize,
    is_64_bit: bool,
    needs_byteswap: bool,
    ancestry: Ancestry,
    settings: &Settings,
) -> CoreResult<()> {
    let macho = goblin::mach::MachO::parse(reader.as_slice(), offset).map_err(ContainerError::from)?;

    let arch = Arch::from_mach(macho.header.cputype, macho.header.cpusubtype);
    let details = FileDetails {
        offset,
        format: Format::MachO,
        arch,
        is_64_bit,
        needs_byteswap,
    };
    let ofd_index = engine.registry.register(ancestry, details);

    let mut sections = DwarfSections::default();
    for segment in macho.segments.iter() {
        if segment.name().unwrap_or_default() != "__DWARF" {
            continue;
        }
        for (section, _data) in segment.sections().map_err(ContainerError::from)? {
            let span = SectionSpan {
                offset: section.offset as usize,
                size: section.size as usize,
            };
            match section.name().unwrap_or_default() {
                "__debug_info" => sections.debug_info = span,
                "__debug_abbrev" => sections.debug_abbrev = span,
                "__debug_line" => sections.debug_line = span,
                "__debug_str" => sections.debug_str = span,
                _ => {}
            }
        }
    }

    if sections.debug_info.size == 0 {
        tracing::debug!(offset, "mach-o slice carries no __debug_info; nothing to register");
        return Ok(());
    }

    let dies = dwarf::parse_dwarf(reader, &sections, ofd_index)?;
    let batch = engine.registration.reserve_batch();
    engine.registration.finish_batch(batch, dies, settings, &engine.globals);
    Ok(())
}
