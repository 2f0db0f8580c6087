//! The global DIE map and ODRV conflict detector.
//!
//! Every object file's completed batch of [`Die`]s is handed to [`Registration::register_batch`],
//! which hashes each DIE's identity, applies the skip filters, and splices survivors onto a
//! collision chain keyed by that hash. Once every task has quiesced,
//! [`Registration::collect_reports`] walks every chain with more than one entry and runs the
//! attribute-level conflict detector over it.

use std::sync::Arc;

use dashmap::DashMap;
use gimli::constants as dw;
use parking_lot::Mutex;

use crate::die::{self, AttributeValue, Die, DieRef};
use crate::hash::hash_combine;
use crate::registry::ObjectFileRegistry;
use crate::settings::{Globals, Settings};
use crate::string_pool::PoolString;

/// What two conflicting DIEs disagree on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conflict {
    /// `x.tag != y.tag`, the sentinel `"tag"` category.
    Tag,
    /// Both DIEs share a tag but disagree on this fatal attribute.
    Attribute(gimli::DwAt),
}

fn tag_name(tag: gimli::DwTag) -> String {
    tag.static_string()
        .map(|s| s.trim_start_matches("DW_TAG_").to_string())
        .unwrap_or_else(|| format!("{:#x}", tag.0))
}

fn attr_name(at: gimli::DwAt) -> String {
    at.static_string()
        .map(|s| s.trim_start_matches("DW_AT_").to_string())
        .unwrap_or_else(|| format!("{:#x}", at.0))
}

/// One reported ODRV: a chain of DIEs sharing an identity hash whose fatal attributes disagree.
#[derive(Clone, Debug)]
pub struct OdrvReport {
    /// The qualified symbol (path with the `"::[u]::"` ancestry prefix stripped).
    pub symbol: PoolString,
    pub tag: gimli::DwTag,
    pub conflict: Conflict,
    /// Deduplicated, sorted representatives from the chain: one per distinct
    /// `fatal_attribute_hash` when `filter_redundant` is set, every chain member otherwise.
    pub variants: Vec<Die>,
}

impl OdrvReport {
    /// `"<tag>:<attr>"`, or the bare sentinel `"tag"` when the conflict is a tag mismatch.
    pub fn category(&self) -> String {
        match self.conflict {
            Conflict::Tag => "tag".to_string(),
            Conflict::Attribute(at) => format!("{}:{}", tag_name(self.tag), attr_name(at)),
        }
    }
}

/// `true` if disagreement on `name` between two DIEs constitutes an ODRV. Alias kept local to this
/// module so call sites read as "fatal" rather than reaching across to [`die::is_fatal`] everywhere.
fn is_fatal(name: gimli::DwAt) -> bool {
    die::is_fatal(name)
}

/// A hash over one attribute value good enough to fold into [`fatal_attribute_hash`]: prefers the
/// string facet (covers both plain strings and `type` attributes resolved to a name), then the
/// integer facets, in the same priority order [`die::attribute_values_shallow_eq`] compares by.
fn attribute_value_hash(v: &AttributeValue) -> u64 {
    if let Some(s) = v.string {
        return s.hash();
    }
    if let Some(u) = v.uint {
        return u;
    }
    if let Some(s) = v.sint {
        return s as u64;
    }
    if let Some(r) = v.reference {
        return r as u64;
    }
    0
}

/// `d.hash` in the data model: identity hash over `(arch, tag, path)`.
fn die_identity_hash(arch: crate::arch::Arch, tag: gimli::DwTag, path: PoolString) -> u64 {
    crate::hash::hash_combine_all(0, [arch as u64, tag.0, path.hash()])
}

/// `d.fatal_attribute_hash` in the data model: a hash over the *multiset* of `(name, value)` pairs
/// among `die`'s fatal attributes. XOR-folded (rather than `hash_combine`'s sequential fold) so the
/// result does not depend on attribute order, since two otherwise-identical DIEs produced by
/// different DWARF emitters are not guaranteed to declare attributes in the same order.
fn fatal_attribute_hash(die: &Die) -> u64 {
    let mut acc = 0xcbf29ce4_84222325u64;
    for attr in die.attributes.iter().filter(|a| is_fatal(a.name)) {
        acc ^= hash_combine(attr.name.0, attribute_value_hash(&attr.value));
    }
    acc
}

/// `skip_die` in the data model: `true` if `die` must never be registered or appear in a report.
/// `batch` is the file-local (pre-freeze) DIE vector `die` belongs to, needed to look at the DIE a
/// `type` attribute resolves to before batch indices become stable.
fn skip_die(die: &Die, batch: &[Die], settings: &Settings) -> bool {
    if matches!(
        die.tag,
        t if t == dw::DW_TAG_compile_unit
            || t == dw::DW_TAG_partial_unit
            || t == dw::DW_TAG_variable
            || t == dw::DW_TAG_formal_parameter
    ) {
        return true;
    }
    if die.path.is_empty() {
        return true;
    }
    if die.tag == dw::DW_TAG_subprogram && !die.has(dw::DW_AT_external) {
        return true;
    }
    let path_str = die.path.as_str();
    if path_str.contains("::__") || path_str.contains("lambda") {
        return true;
    }
    if die.has(dw::DW_AT_APPLE_runtime_class) {
        return true;
    }
    let symbol = die.symbol();
    if settings.symbol_ignore.iter().any(|ignored| ignored == symbol) {
        return true;
    }
    if let Some(type_attr) = die.attribute(dw::DW_AT_type) {
        if let Some(die_ref) = type_attr.value.die {
            if let Some(target) = batch.get(die_ref.index as usize) {
                if target.attributes.is_empty() {
                    return true;
                }
            }
        }
    }
    false
}

/// The global DIE map and the append-only batch list it indexes into.
///
/// `batches` backs every [`DieRef`] produced during DWARF parsing; `map` is keyed by
/// [`die_identity_hash`] and holds each collision chain as a plain `Vec<DieRef>` with the chain head
/// always at index 0, new inserts splicing in at index 1 without walking the chain.
/// `dashmap::DashMap` gives the striped-locking behavior a sharded map with per-shard locks needs,
/// in place of a literal 67-element `[Mutex<...>; 67]` array.
pub struct Registration {
    registry: Arc<ObjectFileRegistry>,
    batches: Mutex<Vec<Arc<[Die]>>>,
    map: DashMap<u64, Vec<DieRef>>,
}

impl Registration {
    pub fn new(registry: Arc<ObjectFileRegistry>) -> Self {
        Self {
            registry,
            batches: Mutex::new(Vec::new()),
            map: DashMap::new(),
        }
    }

    /// Reserves a batch slot, returning its index. The slot holds an empty batch until
    /// [`Self::finish_batch`] replaces it, which lets reference-resolution code stamp the real batch
    /// index onto every intra-file [`DieRef`] before anything else can observe the slot.
    pub fn reserve_batch(&self) -> u32 {
        let mut batches = self.batches.lock();
        let index = batches.len();
        batches.push(Arc::from(Vec::new()));
        index as u32
    }

    /// Rewrites every placeholder `batch: 0` in `dies`' resolved references to `batch_index`, hashes
    /// each DIE, applies the skip filters, splices survivors into the global map, and freezes `dies`
    /// into the slot `batch_index` names.
    pub fn finish_batch(&self, batch_index: u32, mut dies: Vec<Die>, settings: &Settings, globals: &Globals) {
        for die in &mut dies {
            for attr in &mut die.attributes {
                if let Some(r) = &mut attr.value.die {
                    r.batch = batch_index;
                }
            }
        }

        for i in 0..dies.len() {
            let arch = self.registry.fetch(dies[i].ofd_index).details.arch;
            dies[i].hash = die_identity_hash(arch, dies[i].tag, dies[i].path);
            dies[i].fatal_attribute_hash = fatal_attribute_hash(&dies[i]);
            globals.record_die_processed();
        }

        for i in 0..dies.len() {
            if skip_die(&dies[i], &dies, settings) {
                dies[i].skippable = true;
                continue;
            }
            let die_ref = DieRef {
                batch: batch_index,
                index: i as u32,
            };
            let hash = dies[i].hash;
            let mut chain = self.map.entry(hash).or_default();
            if chain.is_empty() {
                chain.push(die_ref);
            } else {
                let insert_at = chain.len().min(1);
                chain.insert(insert_at, die_ref);
            }
            globals.record_die_registered();
        }

        let mut batches = self.batches.lock();
        batches[batch_index as usize] = Arc::from(dies);
    }

    fn fetch_die(&self, r: DieRef) -> Die {
        self.batches.lock()[r.batch as usize][r.index as usize].clone()
    }

    /// `type_equivalent` in the data model.
    fn type_equivalent(&self, a: &AttributeValue, b: &AttributeValue) -> bool {
        if let (Some(ra), Some(rb)) = (a.reference, b.reference) {
            if ra == rb {
                return true;
            }
        }
        if let (Some(ha), Some(hb)) = (a.string_hash(), b.string_hash()) {
            if ha == hb {
                return true;
            }
        }
        if let (Some(da), Some(db)) = (a.die, b.die) {
            let die_a = self.fetch_die(da);
            let die_b = self.fetch_die(db);
            return self.find_die_conflict(&die_a, &die_b).is_none();
        }
        false
    }

    /// `find_die_conflict` in the data model: the first fatal `DW_AT` on which `x` and `y` disagree.
    fn find_die_conflict(&self, x: &Die, y: &Die) -> Option<Conflict> {
        if x.tag != y.tag {
            return Some(Conflict::Tag);
        }
        for attr in x.attributes.iter().filter(|a| is_fatal(a.name)) {
            match y.attribute(attr.name) {
                None => return Some(Conflict::Attribute(attr.name)),
                Some(other) => {
                    let equal = if attr.name == dw::DW_AT_type {
                        self.type_equivalent(&attr.value, &other.value)
                    } else {
                        die::attribute_values_shallow_eq(&attr.value, &other.value)
                    };
                    if !equal {
                        return Some(Conflict::Attribute(attr.name));
                    }
                }
            }
        }
        for attr in y.attributes.iter().filter(|a| is_fatal(a.name)) {
            if x.attribute(attr.name).is_none() {
                return Some(Conflict::Attribute(attr.name));
            }
        }
        None
    }

    /// Walks every collision chain with more than one surviving DIE, runs the conflict detector, and
    /// returns the filtered, deduplicated set of [`OdrvReport`]s.
    pub fn collect_reports(&self, settings: &Settings, globals: &Globals) -> Vec<OdrvReport> {
        let mut reports = Vec::new();

        for entry in self.map.iter() {
            if settings.max_violation_count > 0 && reports.len() >= settings.max_violation_count {
                break;
            }

            let chain = entry.value();
            if chain.len() < 2 {
                continue;
            }

            let mut members: Vec<Die> = chain.iter().map(|r| self.fetch_die(*r)).collect();
            members.sort_by_key(|d| (self.registry.fetch(d.ofd_index).ancestry, d.debug_info_offset));

            let head = members[0].clone();
            let mut found = None;
            for other in &members[1..] {
                if let Some(conflict) = self.find_die_conflict(&head, other) {
                    found = Some(conflict);
                    break;
                }
            }
            let Some(conflict) = found else { continue };

            let variants = if settings.filter_redundant {
                let mut seen = std::collections::HashSet::new();
                members
                    .into_iter()
                    .filter(|d| seen.insert(d.fatal_attribute_hash))
                    .collect()
            } else {
                members
            };

            let category = category_string(head.tag, conflict);
            if !settings.violation_ignore.is_empty() && settings.violation_ignore.iter().any(|c| c == &category) {
                continue;
            }
            if !settings.violation_report.is_empty() && !settings.violation_report.iter().any(|c| c == &category) {
                continue;
            }

            globals.record_odrv();
            reports.push(OdrvReport {
                symbol: head.path,
                tag: head.tag,
                conflict,
                variants,
            });
        }

        reports
    }

    /// Empties the DIE map and batch list so the registration can be driven again in the same
    /// process. See [`crate::Engine::reset`].
    pub fn clear(&self) {
        self.map.clear();
        self.batches.lock().clear();
    }
}

fn category_string(tag: gimli::DwTag, conflict: Conflict) -> String {
    match conflict {
        Conflict::Tag => "tag".to_string(),
        Conflict::Attribute(at) => format!("{}:{}", tag_name(tag), attr_name(at)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::die::{Attribute, Attributes, AttributeValue};
    use crate::registry::{Ancestry, FileDetails, OfdIndex};
    use crate::string_pool::empool_str;

    fn bare_die(tag: gimli::DwTag, path: &str, ofd_index: OfdIndex, attrs: Attributes) -> Die {
        Die {
            path: empool_str(path),
            hash: 0,
            fatal_attribute_hash: 0,
            ofd_index,
            debug_info_offset: 0,
            tag,
            has_children: false,
            conflict: false,
            skippable: false,
            attributes: attrs,
        }
    }

    fn one_object_file(registry: &ObjectFileRegistry, name: &str) -> OfdIndex {
        registry.register(
            Ancestry::new().pushed(empool_str(name)),
            FileDetails {
                arch: Arch::X86_64,
                ..Default::default()
            },
        )
    }

    #[test]
    fn colliding_subprograms_with_differing_type_conflict() {
        let registry = Arc::new(ObjectFileRegistry::new());
        let reg = Registration::new(Arc::clone(&registry));
        let settings = Settings::default();
        let globals = Globals::new();

        let ofd_a = one_object_file(&registry, "a.o");
        let ofd_b = one_object_file(&registry, "b.o");

        let mut attrs_a: Attributes = Attributes::new();
        attrs_a.push(Attribute {
            name: gimli::constants::DW_AT_external,
            form: gimli::constants::DW_FORM_flag_present,
            value: AttributeValue::uint(1),
        });
        attrs_a.push(Attribute {
            name: gimli::constants::DW_AT_type,
            form: gimli::constants::DW_FORM_ref4,
            value: AttributeValue::string(empool_str("int")),
        });
        let die_a = bare_die(gimli::constants::DW_TAG_subprogram, "::[u]::example_function::foo", ofd_a, attrs_a);

        let mut attrs_b = attrs_a_base();
        attrs_b.push(Attribute {
            name: gimli::constants::DW_AT_type,
            form: gimli::constants::DW_FORM_ref4,
            value: AttributeValue::string(empool_str("bool")),
        });
        let die_b = bare_die(gimli::constants::DW_TAG_subprogram, "::[u]::example_function::foo", ofd_b, attrs_b);

        let batch_a = reg.reserve_batch();
        reg.finish_batch(batch_a, vec![die_a], &settings, &globals);
        let batch_b = reg.reserve_batch();
        reg.finish_batch(batch_b, vec![die_b], &settings, &globals);

        let reports = reg.collect_reports(&settings, &globals);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].category(), "subprogram:type");
    }

    fn attrs_a_base() -> Attributes {
        let mut attrs: Attributes = Attributes::new();
        attrs.push(Attribute {
            name: gimli::constants::DW_AT_external,
            form: gimli::constants::DW_FORM_flag_present,
            value: AttributeValue::uint(1),
        });
        attrs
    }

    #[test]
    fn static_function_without_external_is_skipped() {
        let registry = Arc::new(ObjectFileRegistry::new());
        let reg = Registration::new(Arc::clone(&registry));
        let settings = Settings::default();
        let globals = Globals::new();

        let ofd_a = one_object_file(&registry, "a.o");
        let ofd_b = one_object_file(&registry, "b.o");

        let mut attrs_a: Attributes = Attributes::new();
        attrs_a.push(Attribute {
            name: gimli::constants::DW_AT_type,
            form: gimli::constants::DW_FORM_ref4,
            value: AttributeValue::string(empool_str("int")),
        });
        let die_a = bare_die(gimli::constants::DW_TAG_subprogram, "::[u]::strlen", ofd_a, attrs_a);

        let mut attrs_b: Attributes = Attributes::new();
        attrs_b.push(Attribute {
            name: gimli::constants::DW_AT_type,
            form: gimli::constants::DW_FORM_ref4,
            value: AttributeValue::string(empool_str("bool")),
        });
        let die_b = bare_die(gimli::constants::DW_TAG_subprogram, "::[u]::strlen", ofd_b, attrs_b);

        let batch_a = reg.reserve_batch();
        reg.finish_batch(batch_a, vec![die_a], &settings, &globals);
        let batch_b = reg.reserve_batch();
        reg.finish_batch(batch_b, vec![die_b], &settings, &globals);

        assert!(reg.collect_reports(&settings, &globals).is_empty());
    }

    #[test]
    fn decl_line_difference_alone_is_not_a_conflict() {
        let registry = Arc::new(ObjectFileRegistry::new());
        let reg = Registration::new(Arc::clone(&registry));
        let settings = Settings::default();
        let globals = Globals::new();

        let ofd_a = one_object_file(&registry, "a.o");
        let ofd_b = one_object_file(&registry, "b.o");

        let mut attrs_a = attrs_a_base();
        attrs_a.push(Attribute {
            name: gimli::constants::DW_AT_decl_line,
            form: gimli::constants::DW_FORM_data4,
            value: AttributeValue::uint(10),
        });
        let die_a = bare_die(gimli::constants::DW_TAG_subprogram, "::[u]::area::area", ofd_a, attrs_a);

        let mut attrs_b = attrs_a_base();
        attrs_b.push(Attribute {
            name: gimli::constants::DW_AT_decl_line,
            form: gimli::constants::DW_FORM_data4,
            value: AttributeValue::uint(42),
        });
        let die_b = bare_die(gimli::constants::DW_TAG_subprogram, "::[u]::area::area", ofd_b, attrs_b);

        let batch_a = reg.reserve_batch();
        reg.finish_batch(batch_a, vec![die_a], &settings, &globals);
        let batch_b = reg.reserve_batch();
        reg.finish_batch(batch_b, vec![die_b], &settings, &globals);

        assert!(reg.collect_reports(&settings, &globals).is_empty());
    }
}
