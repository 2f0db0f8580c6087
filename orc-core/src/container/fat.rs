//! Fat (universal) Mach-O header: a big-endian `nfat_arch` count followed by that many fixed-size
//! slice records, each recursed into independently.
//!
//! Hand-rolled against [`Reader`] rather than through `goblin`, since each slice needs its own
//! ancestry component (named after the slice's architecture, not the stringified fat magic) before
//! recursing back into [`super::dispatch`].

use crate::arch::Arch;
use crate::error::CoreResult;
use crate::reader::{Reader, Whence};
use crate::registry::Ancestry;
use crate::settings::Settings;
use crate::string_pool::empool_str;
use crate::Engine;

const FAT_ARCH_LEN: usize = 20;
const FAT_ARCH_64_LEN: usize = 32;

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
    let nfat_arch = reader.temp_seek(offset as i64 + 4, Whence::Start, |r| r.read_pod_u32(needs_byteswap))?;

    let mut cursor = offset + 8;
    for _ in 0..nfat_arch {
        let (arch, slice_offset, slice_size, record_len) = read_arch_record(reader, cursor, is_64_bit, needs_byteswap)?;

        let component = empool_str(&arch.to_string());
        let child_ancestry = ancestry.clone().pushed(component);

        if let Err(err) = super::dispatch(engine, reader, slice_offset, slice_size, child_ancestry, settings) {
            tracing::warn!(arch = %arch, error = %err, "skipping fat slice");
            engine.globals.record_error();
        }

        cursor += record_len;
    }

    Ok(())
}

fn read_arch_record(
    reader: &mut Reader,
    cursor: usize,
    is_64_bit: bool,
    needs_byteswap: bool,
) -> Result<(Arch, usize, usize, usize), crate::error::ReaderError> {
    let cputype = reader.temp_seek(cursor as i64, Whence::Start, |r| r.read_pod_u32(needs_byteswap))?;
    let cpusubtype = reader.temp_seek(cursor as i64 + 4, Whence::Start, |r| r.read_pod_u32(needs_byteswap))?;
    let arch = Arch::from_mach(cputype, cpusubtype);

    if is_64_bit {
        let slice_offset = reader.temp_seek(cursor as i64 + 8, Whence::Start, |r| r.read_pod_u64(needs_byteswap))?;
        let slice_size = reader.temp_seek(cursor as i64 + 16, Whence::Start, |r| r.read_pod_u64(needs_byteswap))?;
        Ok((arch, slice_offset as usize, slice_size as usize, FAT_ARCH_64_LEN))
    } else {
        let slice_offset = reader.temp_seek(cursor as i64 + 8, Whence::Start, |r| r.read_pod_u32(needs_byteswap))?;
        let slice_size = reader.temp_seek(cursor as i64 + 12, Whence::Start, |r| r.read_pod_u32(needs_byteswap))?;
        Ok((arch, slice_offset as usize, slice_size as usize, FAT_ARCH_LEN))
    }
}
