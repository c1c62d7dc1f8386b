//! Command line interface for imx-mkimage

use crate::VERSION;
use crate::config::ImageStackConfig;
use crate::container::{ParsedContainer, parse_containers};
use crate::output::write_boot_image;
use crate::stack::StackInterpreter;
use anyhow::Context;
use byte_unit::Byte;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Command line arguments for imx-mkimage
#[derive(Parser, Debug)]
#[command(name = "imx-mkimage")]
#[command(version = VERSION)]
#[command(about = "Build i.MX8QXP B0 boot container images", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - only output errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a boot image from an image stack file
    Build(BuildArgs),
    /// Show the containers of an existing boot image
    Info(InfoArgs),
}

/// Arguments for building an image
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Image stack description (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Output image file
    #[arg(short, long, default_value = "flash.bin")]
    pub output: PathBuf,

    /// Print the container headers after building
    #[arg(long)]
    pub print_info: bool,
}

/// Arguments for inspecting an image
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Boot image to examine
    pub image_file: PathBuf,

    /// File offset of the first container header
    #[arg(long, value_parser = parse_hex_u32, default_value = "0x400")]
    pub offset: u32,

    /// Container alignment
    #[arg(long, value_parser = parse_hex_u32, default_value = "0x400")]
    pub alignment: u32,

    /// Print in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse hexadecimal or decimal string to u32
fn parse_hex_u32(s: &str) -> std::result::Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    }
}

/// Main CLI handler
pub fn run_cli(args: Args) -> anyhow::Result<()> {
    let quiet = args.quiet;
    match args.command {
        Commands::Build(build_args) => handle_build(build_args, quiet),
        Commands::Info(info_args) => handle_info(info_args),
    }
}

fn handle_build(args: BuildArgs, quiet: bool) -> anyhow::Result<()> {
    let config = ImageStackConfig::from_file(&args.config)?;
    let base_dir = match args.config.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let stack = config
        .to_stack(base_dir)
        .with_context(|| format!("invalid image stack in {}", args.config.display()))?;

    let plan = StackInterpreter::new(config.layout.to_options()).run(&stack)?;
    let flat = plan.flatten()?;
    log::debug!("container headers: {} bytes", flat.len());

    let size = write_boot_image(&plan, &flat, &args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    if !quiet {
        println!(
            "{} {}",
            "Boot image created:".green(),
            args.output.display()
        );
        println!("image size: {:#}", Byte::from_u64(size));
    }

    if args.print_info && !quiet {
        for (i, container) in plan.builder.containers().iter().enumerate() {
            println!();
            println!("{}", format!("Container {}", i).bold());
            println!("{}", container.summary());
        }
    }

    Ok(())
}

fn handle_info(args: InfoArgs) -> anyhow::Result<()> {
    let data = std::fs::read(&args.image_file)
        .with_context(|| format!("failed to read {}", args.image_file.display()))?;
    let region = data.get(args.offset as usize..).with_context(|| {
        format!(
            "offset 0x{:x} is past the end of {} ({} bytes)",
            args.offset,
            args.image_file.display(),
            data.len()
        )
    })?;
    let containers = parse_containers(region, args.alignment)?;

    if args.json {
        let value = json!(
            containers
                .iter()
                .map(|c| container_json(c, args.offset))
                .collect::<Vec<_>>()
        );
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        for (i, c) in containers.iter().enumerate() {
            if i > 0 {
                println!();
            }
            println!(
                "{}",
                format!(
                    "Container {} at 0x{:x}",
                    i,
                    args.offset as usize + c.start
                )
                .bold()
            );
            println!("{}", c.header.summary());
        }
    }
    Ok(())
}

fn container_json(c: &ParsedContainer, base: u32) -> serde_json::Value {
    let images: Vec<_> = c
        .header
        .images
        .iter()
        .map(|img| {
            json!({
                "type": img.image_type(),
                "core": img.core(),
                "hash": img.hash_algorithm().ok(),
                "encrypted": img.is_encrypted(),
                "offset": format!("0x{:08x}", img.offset),
                "size": img.size,
                "dst": format!("0x{:x}", img.dst),
                "entry": format!("0x{:x}", img.entry),
                "flags": format!("0x{:08x}", img.flags),
                "meta": format!("0x{:08x}", img.meta),
                "digest": img.digest().iter().map(|b| format!("{:02x}", b)).collect::<String>(),
            })
        })
        .collect();

    json!({
        "offset": format!("0x{:x}", base as usize + c.start),
        "version": c.header.version,
        "length": c.length,
        "tag": format!("0x{:02x}", c.header.tag),
        "flags": format!("0x{:08x}", c.header.flags),
        "sw_version": format!("0x{:04x}", c.header.sw_version),
        "fuse_version": c.header.fuse_version,
        "num_images": c.header.num_images(),
        "sig_blk_offset": c.sig_blk_offset,
        "images": images,
    })
}
