//! Argv handling: turns the process's raw argument vector into a list of input paths, in either of
//! the two invocation shapes this tool supports.
//!
//! `clap`'s derive only owns the outer shell here (it never needs to understand `-filelist` or
//! `-framework`): this tool is usually invoked *as* the project linker, so most of argv is someone
//! else's flag syntax, not ours. The real parsing is the hand-rolled scan in [`collect_inputs`].

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

/// Top-level CLI shell. Every argument after the binary name is captured verbatim and handed to
/// [`collect_inputs`]; `clap` itself only exists here to give `--help`/`--version` a normal home.
#[derive(Parser, Debug)]
#[command(name = "orc", trailing_var_arg = true, allow_hyphen_values = true)]
pub struct Cli {
    /// Raw, unparsed argv tail: either a bare object-file list (standalone mode) or linker flags
    /// (the default, linker-driver mode).
    pub args: Vec<String>,
}

/// Frameworks known to carry no user DWARF; never worth opening.
const ELIDED_FRAMEWORKS: &[&str] = &["Foundation", "CoreFoundation"];

/// The result of scanning argv: the paths to analyze, plus whether the invocation looked like a
/// `libtool`-style static-archive build (an `-o <path>.a`), which `orc-cli` currently only uses for
/// diagnostics (the analysis itself treats every discovered `.o`/`.a` identically).
#[derive(Debug, Default, Clone)]
pub struct LinkerInvocation {
    pub inputs: Vec<PathBuf>,
    pub is_libtool_mode: bool,
}

/// Scans `args` for input object files and archives.
///
/// In standalone mode every non-flag argument is taken as a path directly. In linker-driver mode
/// (the default), only the subset of `ld`/`libtool` flags relevant to *locating* inputs is
/// recognized; everything else is silently skipped, since this is not meant to be a complete linker
/// command-line parser, just enough to recover the file list before forwarding the same argv
/// unchanged to the real linker.
pub fn collect_inputs(args: &[String], standalone_mode: bool) -> LinkerInvocation {
    if standalone_mode {
        let inputs = args
            .iter()
            .filter(|a| !a.starts_with('-'))
            .map(PathBuf::from)
            .collect();
        return LinkerInvocation {
            inputs,
            is_libtool_mode: false,
        };
    }

    let mut inputs = Vec::new();
    let mut search_paths: Vec<PathBuf> = Vec::new();
    let mut framework_paths: Vec<PathBuf> = Vec::new();
    let mut is_libtool_mode = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-o" => {
                if let Some(out) = args.get(i + 1) {
                    if out.ends_with(".a") {
                        is_libtool_mode = true;
                    }
                }
                i += 1;
            }
            "-static" => {}
            "-target" | "-Xlinker" | "-object_path_lto" => {
                i += 1;
            }
            "-filelist" => {
                if let Some(path) = args.get(i + 1) {
                    inputs.extend(read_filelist(Path::new(path)));
                }
                i += 1;
            }
            "-L" => {
                if let Some(path) = args.get(i + 1) {
                    search_paths.push(PathBuf::from(path));
                }
                i += 1;
            }
            "-F" => {
                if let Some(path) = args.get(i + 1) {
                    framework_paths.push(PathBuf::from(path));
                }
                i += 1;
            }
            "-l" => {
                if let Some(name) = args.get(i + 1) {
                    if let Some(resolved) = resolve_library(name, &search_paths) {
                        inputs.push(resolved);
                    }
                }
                i += 1;
            }
            "-framework" => {
                if let Some(name) = args.get(i + 1) {
                    if let Some(resolved) = resolve_framework(name, &framework_paths) {
                        inputs.push(resolved);
                    }
                }
                i += 1;
            }
            other => {
                if let Some(name) = other.strip_prefix("-l") {
                    if let Some(resolved) = resolve_library(name, &search_paths) {
                        inputs.push(resolved);
                    }
                } else if other.ends_with(".o") || other.ends_with(".a") {
                    inputs.push(PathBuf::from(other));
                }
            }
        }
        i += 1;
    }

    LinkerInvocation {
        inputs,
        is_libtool_mode,
    }
}

fn read_filelist(path: &Path) -> Vec<PathBuf> {
    match fs::read_to_string(path) {
        Ok(contents) => contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(PathBuf::from).collect(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "could not read -filelist");
            Vec::new()
        }
    }
}

fn resolve_library(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let filename = format!("lib{name}.a");
    search_paths.iter().map(|dir| dir.join(&filename)).find(|p| p.is_file())
}

fn resolve_framework(name: &str, framework_paths: &[PathBuf]) -> Option<PathBuf> {
    if ELIDED_FRAMEWORKS.contains(&name) {
        return None;
    }
    framework_paths
        .iter()
        .map(|dir| dir.join(format!("{name}.framework")).join(name))
        .find(|p| p.is_file())
}
