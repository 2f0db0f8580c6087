//! Renders [`OdrvReport`]s as either indented plain text or JSON Lines.

use std::io::Write;

use orc_core::settings::OutputFileMode;
use orc_core::OdrvReport;
use serde::Serialize;

/// Demangles `mangled` for display purposes only; a non-Itanium-ABI name (or any demangle failure)
/// falls back to the raw string verbatim. Never consulted during classification.
fn demangle(mangled: &str) -> String {
    cpp_demangle::Symbol::new(mangled)
        .and_then(|s| s.demangle(&Default::default()))
        .unwrap_or_else(|_| mangled.to_string())
}

#[derive(Serialize)]
struct VariantJson {
    tag: String,
    path: String,
}

#[derive(Serialize)]
struct ReportJson<'a> {
    symbol: String,
    demangled: String,
    category: String,
    variants: Vec<VariantJson>,
    #[serde(skip)]
    _marker: std::marker::PhantomData<&'a ()>,
}

/// Writes every report in `reports` to `out`, in the mode selected by `mode`. `graceful_exit`
/// controls only the text-mode severity prefix (`"warning"` vs. `"error"`); both modes carry the same
/// information either way.
pub fn write_reports(
    out: &mut impl Write,
    reports: &[OdrvReport],
    mode: OutputFileMode,
    graceful_exit: bool,
) -> anyhow::Result<()> {
    match mode {
        OutputFileMode::Text => write_text(out, reports, graceful_exit),
        OutputFileMode::Json => write_json(out, reports),
    }
}

fn write_text(out: &mut impl Write, reports: &[OdrvReport], graceful_exit: bool) -> anyhow::Result<()> {
    let prefix = if graceful_exit { "warning" } else { "error" };
    for report in reports {
        let symbol = report.symbol.as_str();
        writeln!(
            out,
            "{prefix}: ODRV ({}); conflict in `{}`",
            report.category(),
            demangle(symbol)
        )?;
        for variant in &report.variants {
            writeln!(out, "    {} at ofd {}", tag_label(variant.tag), variant.ofd_index.get())?;
        }
    }
    Ok(())
}

fn write_json(out: &mut impl Write, reports: &[OdrvReport]) -> anyhow::Result<()> {
    for report in reports {
        let json = ReportJson {
            symbol: report.symbol.as_str().to_string(),
            demangled: demangle(report.symbol.as_str()),
            category: report.category(),
            variants: report
                .variants
                .iter()
                .map(|d| VariantJson {
                    tag: tag_label(d.tag),
                    path: d.path.as_str().to_string(),
                })
                .collect(),
            _marker: std::marker::PhantomData,
        };
        writeln!(out, "{}", serde_json::to_string(&json)?)?;
    }
    Ok(())
}

fn tag_label(tag: gimli::DwTag) -> String {
    tag.static_string()
        .map(|s| s.trim_start_matches("DW_TAG_").to_string())
        .unwrap_or_else(|| format!("{:#x}", tag.0))
}
