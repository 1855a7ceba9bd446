//! Intel HEX to binary conversion.

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::path::Path;

use crate::{Cli, CliError};

/// Convert command implementation.
pub(crate) fn cmd_convert(cli: &Cli, hex: &Path, output: Option<&Path>) -> Result<()> {
    let output = output.map_or_else(|| hex.with_extension("bin"), Path::to_path_buf);
    if output == hex {
        return Err(CliError::Usage(format!(
            "output would overwrite the input {}; pass --output",
            hex.display()
        ))
        .into());
    }

    let text =
        fs::read_to_string(hex).with_context(|| format!("failed to read {}", hex.display()))?;
    let image = pcrflash::image::decode(&text)
        .with_context(|| format!("{} is not valid Intel HEX", hex.display()))?;

    fs::write(&output, image.data())
        .with_context(|| format!("failed to write {}", output.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} bytes to {}",
            style("✓").green(),
            image.len(),
            output.display()
        );
        eprintln!(
            "    {} base offset 0x{:08X}, CRC-16 0x{:04X}",
            style("•").dim(),
            image.base_offset(),
            image.crc16()
        );
    }

    Ok(())
}
