//! Firmware info command implementation.

use anyhow::{Context, Result};
use console::style;
use pcrflash::Firmware;
use std::path::Path;

/// Info command implementation.
pub(crate) fn cmd_info(path: &Path, json: bool) -> Result<()> {
    let firmware = Firmware::from_file(path)
        .with_context(|| format!("failed to load firmware {}", path.display()))?;
    let image = &firmware.image;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "name": firmware.name,
                "format": firmware.format,
                "base_offset": image.base_offset(),
                "end_address": image.end_address(),
                "size": image.len(),
                "crc16": image.crc16(),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style(&firmware.name).bold().underlined());
    eprintln!("  Format:      {}", firmware.format);
    eprintln!("  Base offset: 0x{:08X}", image.base_offset());
    eprintln!("  End address: 0x{:08X} (exclusive)", image.end_address());
    eprintln!("  Size:        {} bytes", image.len());
    eprintln!("  CRC-16:      0x{:04X}", image.crc16());

    Ok(())
}
