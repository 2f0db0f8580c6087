//! Error types for each pipeline stage, composed into [`CoreError`] at the crate boundary.
//!
//! Every variant here is "fatal to the task that raised it" in the sense of the error-handling
//! design: the offending file (or, for [`DwarfError`], the offending compilation unit) is abandoned
//! and logged, but sibling tasks are unaffected. Non-fatal conditions (an unrecognized DWARF form,
//! an unhandled expression opcode) are not represented as errors at all; they are encoded directly
//! via [`crate::die::AttributeValue::passover`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reading or mapping the input file.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The path does not exist or could not be opened.
    #[error("could not open {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// `mmap` itself failed (e.g. a zero-length file).
    #[error("could not map {path}")]
    Map {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A read ran past the end of the mapped region.
    #[error("read of {requested} bytes at offset {offset} exceeds mapped region of {len} bytes")]
    OutOfBounds {
        offset: usize,
        requested: usize,
        len: usize,
    },
}

/// Failure walking a Mach-O, fat, or archive container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The first four bytes did not match any recognized magic number.
    #[error("unrecognized container magic {0:#010x}")]
    UnknownMagic(u32),
    /// An archive member header was malformed (e.g. a non-numeric size field).
    #[error("malformed archive member header: {0}")]
    MalformedArMember(String),
    /// Nesting (archive-in-fat-in-archive, …) exceeded the supported depth.
    #[error("container nesting exceeds supported depth of {0}")]
    NestingTooDeep(usize),
    /// Underlying read/seek failure.
    #[error(transparent)]
    Reader(#[from] ReaderError),
    /// Underlying `goblin` parse failure while reading Mach-O structures.
    #[error("mach-o parse error")]
    Goblin(#[from] goblin::error::Error),
    /// Underlying `scroll` structure-read failure.
    #[error("binary layout error")]
    Scroll(#[from] scroll::Error),
}

/// The specific condition that made a DWARF stream unreadable.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DwarfErrorKind {
    /// The compilation unit header declared a DWARF64 length prefix (`>= 0xFFFFFFF0`).
    Dwarf64Unsupported,
    /// An abbreviation code referenced by a DIE has no corresponding table entry.
    AbbrevCodeNotFound(u64),
    /// A reference attribute's offset does not land on any DIE in the current compilation unit.
    ReferenceNotFound(usize),
    /// `DW_FORM_indirect` was encountered; this crate treats it as always malformed input.
    IndirectFormUnsupported,
    /// A `read_exactly`-style length check caught encoder/decoder drift.
    LengthMismatch { expected: usize, actual: usize },
    /// The reader ran out of mapped bytes mid-decode.
    UnexpectedEof,
}

impl fmt::Display for DwarfErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dwarf64Unsupported => write!(f, "DWARF64 compilation units are not supported"),
            Self::AbbrevCodeNotFound(code) => write!(f, "abbreviation code {code} not found"),
            Self::ReferenceNotFound(offset) => {
                write!(f, "reference to debug_info offset {offset} not found in this unit")
            }
            Self::IndirectFormUnsupported => write!(f, "DW_FORM_indirect is not supported"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "expected to read {expected} bytes, read {actual}")
            }
            Self::UnexpectedEof => write!(f, "unexpected end of mapped file while decoding DWARF data"),
        }
    }
}

/// Failure decoding DWARF abbreviations, compilation units, or DIEs.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DwarfError {
    kind: DwarfErrorKind,
    #[source]
    source: Option<ReaderError>,
}

impl DwarfError {
    pub(crate) fn new(kind: DwarfErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source(kind: DwarfErrorKind, source: ReaderError) -> Self {
        Self {
            kind,
            source: Some(source),
        }
    }

    /// The specific condition that caused this error.
    pub fn kind(&self) -> DwarfErrorKind {
        self.kind
    }
}

/// A reader running out of bytes mid-decode is always `UnexpectedEof` from the DWARF layer's point
/// of view. Callers that need a more specific kind (e.g. a length-prefix sanity check) construct a
/// `DwarfError` directly instead of relying on this conversion.
impl From<ReaderError> for DwarfError {
    fn from(source: ReaderError) -> Self {
        Self::with_source(DwarfErrorKind::UnexpectedEof, source)
    }
}

/// The top-level error type returned by a single file-processing task.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Dwarf(#[from] DwarfError),
}

/// Result alias used throughout the reader/container/dwarf stages.
pub type CoreResult<T> = Result<T, CoreError>;
