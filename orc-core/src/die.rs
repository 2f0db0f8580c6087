//! The DIE data model: [`Die`], [`Attribute`], [`AttributeValue`], and the fatal/non-fatal
//! attribute classification that drives ODRV detection.

use smallvec::SmallVec;

use crate::registry::OfdIndex;
use crate::string_pool::PoolString;

/// A reference to one DIE inside a specific per-file batch.
///
/// A raw `die*` pointer into an append-only batch list would do the same job in a language that
/// allows it. Safe Rust has no equivalent to "a raw pointer into memory another thread might be
/// mutating, but in practice never is" without `unsafe`; an index pair into the
/// [`crate::registration::Registration`]'s batch list gives the same O(1) dereference and the same
/// "stable from insertion onward" guarantee without it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DieRef {
    pub batch: u32,
    pub index: u32,
}

/// One DWARF attribute's decoded value.
///
/// A single value can legitimately carry more than one facet at once: a resolved `type` reference
/// ends up carrying *both* a [`DieRef`] back-edge and the string lifted from that DIE's `name`, so
/// string-based comparisons short-circuit without walking the type chain. `Option` fields give that
/// multi-facet capability directly, which is more idiomatic in Rust than a bitmask-tagged union
/// plus `assert!`-guarded accessors.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttributeValue {
    pub passover: bool,
    pub uint: Option<u64>,
    pub sint: Option<i32>,
    pub string: Option<PoolString>,
    /// Offset within `.debug_info`, before reference resolution installs a [`Self::die`] back-edge.
    pub reference: Option<u32>,
    pub die: Option<DieRef>,
}

impl AttributeValue {
    pub fn passover() -> Self {
        Self {
            passover: true,
            ..Default::default()
        }
    }

    pub fn uint(x: u64) -> Self {
        Self {
            uint: Some(x),
            ..Default::default()
        }
    }

    pub fn sint(x: i32) -> Self {
        Self {
            sint: Some(x),
            ..Default::default()
        }
    }

    pub fn string(x: PoolString) -> Self {
        Self {
            string: Some(x),
            ..Default::default()
        }
    }

    pub fn reference(offset: u32) -> Self {
        Self {
            reference: Some(offset),
            ..Default::default()
        }
    }

    /// Overlays a resolved DIE back-edge and the string lifted from it, without disturbing whatever
    /// else this value already carries (a `reference` stays recorded alongside the resolved `die`).
    pub fn with_die(mut self, die_ref: DieRef, name: PoolString) -> Self {
        self.die = Some(die_ref);
        self.string = Some(name);
        self
    }

    pub fn string_hash(&self) -> Option<u64> {
        self.string.map(|s| s.hash())
    }
}

/// `(name, form, value)` for one decoded DWARF attribute.
#[derive(Clone, Copy, Debug)]
pub struct Attribute {
    pub name: gimli::DwAt,
    pub form: gimli::DwForm,
    pub value: AttributeValue,
}

/// Compares two attribute values under the rules in the data model: string beats uint beats sint;
/// bare references/die back-edges with none of those compare unequal by default (see
/// [`crate::registration::type_equivalent`] for the recursive DIE-conflict fallback used
/// specifically for `DW_AT_type`).
pub fn attribute_values_shallow_eq(a: &AttributeValue, b: &AttributeValue) -> bool {
    if let (Some(x), Some(y)) = (a.string, b.string) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.uint, b.uint) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.sint, b.sint) {
        return x == y;
    }
    false
}

/// Inline capacity for a DIE's attribute list: a typical DIE carries fewer than 32 attributes, but
/// most carry far fewer (name, type, decl_file/line/column is already 5); 8 avoids a heap
/// allocation for the overwhelming majority without bloating `Die`.
pub type Attributes = SmallVec<[Attribute; 8]>;

/// A single Debug Information Entry.
///
/// There is no `next` field here: the per-hash collision chain used by registration is maintained
/// externally (see [`crate::registration::Registration`]) as a table from hash to `Vec<DieRef>`,
/// rather than as an intrusive pointer on the DIE itself. Safe Rust cannot splice a shared,
/// possibly-multiply-referenced struct's field across threads without either `unsafe` or exactly
/// this kind of external side table, and the side table is the simpler of the two for no loss of
/// the externally observable chaining behavior.
#[derive(Clone, Debug)]
pub struct Die {
    pub path: PoolString,
    pub hash: u64,
    pub fatal_attribute_hash: u64,
    pub ofd_index: OfdIndex,
    pub debug_info_offset: u32,
    pub tag: gimli::DwTag,
    pub has_children: bool,
    pub conflict: bool,
    pub skippable: bool,
    pub attributes: Attributes,
}

impl Die {
    pub fn attribute(&self, name: gimli::DwAt) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has(&self, name: gimli::DwAt) -> bool {
        self.attribute(name).is_some()
    }

    /// The symbol this DIE names, with the leading `"::[u]::"` (or `"::[u]"`) ancestry prefix
    /// stripped; see [`path_to_symbol`].
    pub fn symbol(&self) -> &'static str {
        path_to_symbol(self.path.as_str())
    }
}

/// Strips the `"::[u]::"` (7-byte) or `"::[u]"` prefix from a qualified path, leaving just the
/// symbol. Paths shorter than 7 bytes are bare compilation-unit markers with no symbol at all.
pub fn path_to_symbol(path: &'static str) -> &'static str {
    if path.len() < 7 {
        ""
    } else {
        &path[7..]
    }
}

/// The fixed, sorted set of `DW_AT` names classified non-fatal: disagreement on any of these
/// between two otherwise-identical DIEs does not constitute an ODRV. `DW_AT_high_pc` is deliberately
/// *excluded*: a differing `high_pc` reflects a differing function body size, which is itself
/// evidence of an ODRV.
fn nonfatal_names() -> &'static [gimli::DwAt] {
    use gimli::constants::*;
    const NAMES: &[gimli::DwAt] = &[
        DW_AT_APPLE_block,
        DW_AT_APPLE_flags,
        DW_AT_APPLE_isa,
        DW_AT_APPLE_major_runtime_vers,
        DW_AT_APPLE_objc_complete_type,
        DW_AT_APPLE_optimized,
        DW_AT_APPLE_property,
        DW_AT_APPLE_property_getter,
        DW_AT_APPLE_property_name,
        DW_AT_APPLE_property_setter,
        DW_AT_APPLE_runtime_class,
        DW_AT_artificial,
        DW_AT_call_column,
        DW_AT_call_file,
        DW_AT_call_line,
        DW_AT_comp_dir,
        DW_AT_const_expr,
        DW_AT_containing_type,
        DW_AT_decl_column,
        DW_AT_decl_file,
        DW_AT_decl_line,
        DW_AT_external,
        DW_AT_frame_base,
        DW_AT_linkage_name,
        DW_AT_location,
        DW_AT_name,
        DW_AT_producer,
        DW_AT_prototyped,
        DW_AT_specification,
    ];
    NAMES
}

/// `true` if disagreement on `name` between two DIEs of the same qualified path is tolerated.
pub fn is_nonfatal(name: gimli::DwAt) -> bool {
    nonfatal_names().contains(&name)
}

/// `true` if disagreement on `name` constitutes an ODRV.
pub fn is_fatal(name: gimli::DwAt) -> bool {
    !is_nonfatal(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_pc_is_fatal() {
        assert!(is_fatal(gimli::constants::DW_AT_high_pc));
    }

    #[test]
    fn name_is_nonfatal() {
        assert!(is_nonfatal(gimli::constants::DW_AT_name));
    }

    #[test]
    fn path_to_symbol_strips_prefix() {
        let leaked: &'static str = Box::leak("::[u]::example_typedef::conflict_type".to_string().into_boxed_str());
        assert_eq!(path_to_symbol(leaked), "example_typedef::conflict_type");
    }

    #[test]
    fn path_to_symbol_of_bare_cu_is_empty() {
        let leaked: &'static str = Box::leak("::[u]".to_string().into_boxed_str());
        assert_eq!(path_to_symbol(leaked), "");
    }
}
