//! Command-line front-end for the `rezip` library.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use rezip::cli::{Cli, Command};
use rezip::{ZipPacker, ZipReader, normalize_path, read_to_end};

fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rezip=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::List { archive } => list(&archive),
        Command::Extract {
            archive,
            output,
            password,
        } => extract(&archive, output, password.as_deref()),
        Command::Pack {
            output,
            inputs,
            password,
            comment,
        } => pack(&output, &inputs, password.as_deref(), comment.as_deref()),
    }
}

fn list(archive: &Path) -> Result<()> {
    let reader = ZipReader::open(archive)
        .with_context(|| format!("failed to open `{}`", archive.display()))?;

    println!("{:>10}  {:<16}  Name", "Length", "Modified");
    println!("{:->10}  {:-<16}  ----", "", "");
    let mut total = 0u64;
    for index in 0..reader.len() {
        let entry = reader.entry(index)?;
        let mut name = entry.name().to_string();
        if entry.is_encrypted() {
            name.push_str(" *");
        }
        println!(
            "{:>10}  {}  {}",
            entry.original_size(),
            entry.last_modified().format("%Y-%m-%d %H:%M"),
            name
        );
        total += entry.original_size();
    }
    println!("{:->10}  {:-<16}  ----", "", "");
    println!("{:>10}  {} entries", total, reader.len());
    if !reader.comment().is_empty() {
        println!("comment: {}", reader.comment());
    }
    if reader.needs_password() {
        println!("entries marked * are encrypted");
    }
    Ok(())
}

fn extract(archive: &Path, output: Option<PathBuf>, password: Option<&str>) -> Result<()> {
    let mut reader = ZipReader::open(archive)
        .with_context(|| format!("failed to open `{}`", archive.display()))?;
    if reader.needs_password() && password.is_none() {
        bail!("archive contains encrypted entries; pass -P/--password");
    }
    if let Some(password) = password {
        reader.set_password(password);
    }

    let out_dir = output.unwrap_or_else(|| PathBuf::from("."));
    for index in 0..reader.len() {
        let entry = reader.entry(index)?;
        // Entry names come from the archive; renormalize so a hostile
        // name cannot escape the output directory.
        let name = normalize_path(entry.name());
        if name.is_empty() {
            continue;
        }
        let target = out_dir.join(&name);
        if !entry.is_file() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut stream = reader
            .open_entry(index)
            .with_context(|| format!("failed to open entry `{name}`"))?;
        let data = read_to_end(&mut stream)
            .with_context(|| format!("failed to decode entry `{name}`"))?;
        fs::File::create(&target)?.write_all(&data)?;
        println!("  extracted: {name}");
    }
    Ok(())
}

fn pack(
    output: &Path,
    inputs: &[PathBuf],
    password: Option<&str>,
    comment: Option<&str>,
) -> Result<()> {
    let mut packer = ZipPacker::new();
    for input in inputs {
        add_input(&mut packer, input)
            .with_context(|| format!("failed to add `{}`", input.display()))?;
    }
    if let Some(comment) = comment {
        packer.set_comment(comment);
    }
    packer
        .pack_to(output, password.unwrap_or(""))
        .with_context(|| format!("failed to write `{}`", output.display()))?;
    println!("wrote {}", output.display());
    Ok(())
}

/// Queue one CLI input: a file as a single entry, a directory as a
/// recursive tree rooted at its own name.
fn add_input(packer: &mut ZipPacker, input: &Path) -> Result<()> {
    let Some(name) = input.file_name() else {
        bail!("cannot derive an entry name from `{}`", input.display());
    };
    let name = name.to_string_lossy().into_owned();

    if input.is_dir() {
        packer.add_folder(&name)?;
        for walked in WalkDir::new(input).min_depth(1) {
            let walked = walked?;
            let relative = walked.path().strip_prefix(input)?;
            let entry_path = format!("{name}/{}", relative.display());
            if walked.file_type().is_dir() {
                packer.add_folder(&entry_path)?;
            } else if walked.file_type().is_file() {
                packer.add_file(&entry_path, walked.path())?;
            }
            // Other kinds (symlinks, sockets) are skipped.
        }
    } else {
        packer.add_file(&name, input)?;
    }
    Ok(())
}
