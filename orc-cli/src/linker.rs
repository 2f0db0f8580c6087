//! Re-invokes the real linker after analysis, so `orc` can be symlinked in as a project's linker and
//! get out of the way once it is done looking at the inputs.

use std::path::PathBuf;
use std::process::Command;

/// Locates the active Xcode toolchain's linker driver via `xcode-select -p`, then execs it with the
/// original argument vector untouched.
///
/// A failure here is logged at `warning` and does not discard the ODRV findings already computed.
/// "could not shell out to `ld`" is not grounds to throw away an otherwise-successful analysis.
pub fn forward_to_linker(original_args: &[String]) -> anyhow::Result<()> {
    let toolchain = xcode_toolchain_path()?;
    let linker = toolchain.join("usr/bin/clang++");

    tracing::info!(linker = %linker.display(), "forwarding to real linker");
    let status = Command::new(&linker).args(original_args).status()?;

    if !status.success() {
        anyhow::bail!("linker exited with {status}");
    }
    Ok(())
}

fn xcode_toolchain_path() -> anyhow::Result<PathBuf> {
    let output = Command::new("xcode-select").arg("-p").output()?;
    if !output.status.success() {
        anyhow::bail!("xcode-select -p failed");
    }
    let path = String::from_utf8(output.stdout)?.trim().to_string();
    Ok(PathBuf::from(path))
}
