//! Firmware upload command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use pcrflash::{Error, Firmware, NativePort, SerialConfig, TransferError, Uploader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output};

/// Set `flag` on Ctrl+C so the transfer can send CAN and stop.
fn install_interrupt_handler(flag: &Arc<AtomicBool>) {
    let flag = Arc::clone(flag);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl+C handler: {e}");
    }
}

fn progress_bar(cli: &Cli, total: u64) -> Result<ProgressBar> {
    if cli.quiet || !use_fancy_output() {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Upload command implementation.
pub(crate) fn cmd_upload(
    cli: &Cli,
    config: &Config,
    path: &Path,
    name: Option<&str>,
) -> Result<()> {
    let mut firmware = Firmware::from_file(path)
        .with_context(|| format!("failed to load firmware {}", path.display()))?;
    if let Some(name) = name {
        firmware.name = name.to_string();
    }

    if !cli.quiet {
        eprintln!(
            "{} {} ({}, {} bytes at 0x{:08X})",
            style("📦").cyan(),
            firmware.name,
            firmware.format,
            firmware.image.len(),
            firmware.image.base_offset()
        );
    }

    let port_name = cli.resolve_port(config)?;
    let baud = cli.resolve_baud(config);
    let port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("failed to open {port_name}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Using {port_name} at {baud} baud, waiting for the boot loader...",
            style("🔌").cyan()
        );
    }

    let cancel = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(&cancel);

    let pb = progress_bar(cli, firmware.image.len() as u64)?;
    pb.set_message(firmware.name.clone());

    let mut uploader = Uploader::new(port)
        .with_config(config.transfer.to_ymodem())
        .with_cancel_flag(cancel);

    let result = uploader.upload(&firmware, |progress| {
        pb.set_position(progress.acknowledged as u64);
    });

    match result {
        Ok(()) => {
            pb.finish_and_clear();
            if !cli.quiet {
                eprintln!("{} Firmware uploaded", style("✓").green());
            }
            Ok(())
        },
        Err(Error::Transfer(TransferError::Cancelled)) => {
            pb.abandon();
            Err(CliError::Cancelled("upload interrupted".to_string()).into())
        },
        Err(e) => {
            pb.abandon();
            Err(anyhow::Error::new(e).context(format!("failed to upload {}", firmware.name)))
        },
    }
}
