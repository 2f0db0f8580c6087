//! Format dispatcher: peeks a 4-byte magic number and routes to the Mach-O, fat, or archive reader,
//! recursing through nested containers up to [`crate::registry::MAX_ANCESTRY`] deep.

mod ar;
mod fat;
mod macho;

use std::path::Path;

use crate::error::{ContainerError, CoreResult, ReaderError};
use crate::reader::{Reader, Whence};
use crate::registry::{Ancestry, MAX_ANCESTRY};
use crate::settings::Settings;
use crate::string_pool::empool_str;
use crate::Engine;

const MH_MAGIC: u32 = 0xfeedface;
const MH_CIGAM: u32 = 0xcefaedfe;
const MH_MAGIC_64: u32 = 0xfeedfacf;
const MH_CIGAM_64: u32 = 0xcffaedfe;
const FAT_MAGIC: u32 = 0xcafebabe;
const FAT_CIGAM: u32 = 0xbebafeca;
const FAT_MAGIC_64: u32 = 0xcafebabf;
const FAT_CIGAM_64: u32 = 0xbfbafeca;
const AR_MAGIC: &[u8; 4] = b"!<ar";

/// Identifies `reader`'s content at `offset` and processes it, recursing into nested containers.
/// `ancestry` names the path of containers (outermost first) leading to this slice/member;
/// `offset`/`size` bound the slice of `reader`'s mapping this call is responsible for.
pub(crate) fn dispatch(
    engine: &Engine,
    reader: &mut Reader,
    offset: usize,
    size: usize,
    ancestry: Ancestry,
    settings: &Settings,
) -> CoreResult<()> {
    if ancestry.len() >= MAX_ANCESTRY {
        return Err(ContainerError::NestingTooDeep(MAX_ANCESTRY).into());
    }

    let magic_bytes = peek_bytes(reader, offset)?;
    let magic = u32::from_ne_bytes(magic_bytes);

    match magic {
        MH_MAGIC => return macho::process(engine, reader, offset, size, false, false, ancestry, settings),
        MH_CIGAM => return macho::process(engine, reader, offset, size, false, true, ancestry, settings),
        MH_MAGIC_64 => return macho::process(engine, reader, offset, size, true, false, ancestry, settings),
        MH_CIGAM_64 => return macho::process(engine, reader, offset, size, true, true, ancestry, settings),
        FAT_MAGIC_64 => return fat::process(engine, reader, offset, size, true, false, ancestry, settings),
        FAT_CIGAM_64 => return fat::process(engine, reader, offset, size, true, true, ancestry, settings),
        FAT_MAGIC | FAT_CIGAM => {
            if !looks_like_java_classfile(reader, offset, magic == FAT_CIGAM)? {
                let needs_byteswap = magic == FAT_CIGAM;
                return fat::process(engine, reader, offset, size, false, needs_byteswap, ancestry, settings);
            }
        }
        _ => {}
    }

    if &magic_bytes == AR_MAGIC {
        return ar::process(engine, reader, offset, size, ancestry, settings);
    }

    Err(ContainerError::UnknownMagic(magic).into())
}

pub fn process_file(engine: &Engine, path: &Path, settings: &Settings) -> CoreResult<()> {
    let mut reader = Reader::open(path)?;
    let len = reader.len();
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let ancestry = Ancestry::new().pushed(empool_str(&name));
    engine.globals.record_object_file();
    dispatch(engine, &mut reader, 0, len, ancestry, settings)
}

fn peek_bytes(reader: &mut Reader, offset: usize) -> Result<[u8; 4], ReaderError> {
    reader.temp_seek(offset as i64, Whence::Start, |r| -> Result<[u8; 4], ReaderError> {
        let mut buf = [0u8; 4];
        r.read(&mut buf)?;
        Ok(buf)
    })
}

/// Disambiguates the 32-bit fat Mach-O magic (`0xcafebabe`) from a Java classfile, which shares the
/// same four leading bytes: a classfile's next field is a `u16 minor_version` then `u16
/// major_version` (major version ≥ 45 for any real `.class` file), whereas a fat header's next field
/// is a big-endian `u32 nfat_arch` count that is implausibly small to be a Java major version only by
/// coincidence for genuine fat binaries (which rarely bundle more than a handful of slices).
fn looks_like_java_classfile(reader: &mut Reader, offset: usize, needs_byteswap: bool) -> Result<bool, ReaderError> {
    let count = reader.temp_seek(offset as i64 + 4, Whence::Start, |r| r.read_pod_u32(needs_byteswap))?;
    Ok(count >= 45)
}
