//! TIFF inspection command.

use clap::Args;
use console::style;
use serde::Serialize;
use std::path::PathBuf;
use tiffio::tags::{tag_name, SUPPORTED_TAGS};
use tiffio::{IfdValue, SessionManager, Tiff};

/// Values listed per field before the rest is summarized.
const MAX_SHOWN_VALUES: usize = 8;

/// One field of a directory.
#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo {
    /// Tag number.
    pub tag: u16,
    /// Tag name.
    pub name: String,
    /// Formatted value.
    pub value: String,
}

/// One image directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryInfo {
    /// Directory index, starting at 0.
    pub index: u32,
    /// Number of strips.
    pub strips: u32,
    /// Supported fields present in the directory.
    pub fields: Vec<FieldInfo>,
}

/// TIFF file information.
#[derive(Debug, Clone, Serialize)]
pub struct TiffInfo {
    /// File path.
    pub file: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// "little-endian" or "big-endian".
    pub byte_order: String,
    /// Stream the file was decoded from ("file" or "memory").
    pub source: String,
    /// Image directories.
    pub directories: Vec<DirectoryInfo>,
}

/// Inspect a TIFF file.
#[derive(Args, Debug)]
pub struct CmdInfo {
    /// Path to the TIFF file.
    pub file: PathBuf,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,

    /// Read the whole file into memory and decode from the buffer.
    #[arg(long)]
    pub from_memory: bool,
}

impl CmdInfo {
    /// Execute the info command.
    pub fn run(&self, sessions: &mut SessionManager) -> anyhow::Result<()> {
        let info = self.inspect(sessions)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            print_info(&info);
        }
        Ok(())
    }

    fn inspect(&self, sessions: &mut SessionManager) -> anyhow::Result<TiffInfo> {
        if !self.file.exists() {
            anyhow::bail!("File not found: {}", self.file.display());
        }
        let size_bytes = std::fs::metadata(&self.file)?.len();

        if self.from_memory {
            sessions.open_from_buffer(std::fs::read(&self.file)?)?;
        } else {
            sessions.open_from_file(&self.file)?;
        }
        let (big_endian, directories) = sessions.run(describe)?;
        sessions.close_active()?;

        Ok(TiffInfo {
            file: self.file.display().to_string(),
            size_bytes,
            byte_order: if big_endian { "big-endian" } else { "little-endian" }.to_string(),
            source: if self.from_memory { "memory" } else { "file" }.to_string(),
            directories,
        })
    }
}

/// Walk every directory of an open read handle.
fn describe(tiff: &mut Tiff) -> tiffio::Result<(bool, Vec<DirectoryInfo>)> {
    let mut directories = Vec::new();
    loop {
        let fields = SUPPORTED_TAGS
            .iter()
            .filter_map(|&t| {
                tiff.get_field(t).map(|value| FieldInfo {
                    tag: t,
                    name: tag_name(t).unwrap_or("Unknown").to_string(),
                    value: format_value(value),
                })
            })
            .collect();
        directories.push(DirectoryInfo {
            index: tiff.current_directory(),
            strips: tiff.number_of_strips(),
            fields,
        });
        if !tiff.read_directory()? {
            break;
        }
    }
    Ok((tiff.is_big_endian(), directories))
}

fn format_value(value: &IfdValue) -> String {
    let items: Vec<String> = match value {
        IfdValue::Ascii(s) => return format!("{:?}", s.trim_end_matches('\0')),
        IfdValue::Bytes(v) | IfdValue::Undefined(v) => v.iter().map(|x| x.to_string()).collect(),
        IfdValue::Shorts(v) => v.iter().map(|x| x.to_string()).collect(),
        IfdValue::Longs(v) => v.iter().map(|x| x.to_string()).collect(),
        IfdValue::SBytes(v) => v.iter().map(|x| x.to_string()).collect(),
        IfdValue::SShorts(v) => v.iter().map(|x| x.to_string()).collect(),
        IfdValue::SLongs(v) => v.iter().map(|x| x.to_string()).collect(),
        IfdValue::Floats(v) => v.iter().map(|x| x.to_string()).collect(),
        IfdValue::Doubles(v) => v.iter().map(|x| x.to_string()).collect(),
        IfdValue::Rationals(v) => v.iter().map(|(n, d)| format!("{}/{}", n, d)).collect(),
        IfdValue::SRationals(v) => v.iter().map(|(n, d)| format!("{}/{}", n, d)).collect(),
    };

    let shown = items.len().min(MAX_SHOWN_VALUES);
    let mut out = items[..shown].join(", ");
    if items.len() > shown {
        out.push_str(&format!(", ... ({} values)", items.len()));
    }
    out
}

fn print_info(info: &TiffInfo) {
    println!();
    println!("{}", style("TIFF Information").cyan().bold());
    println!();
    println!("  {:<16} {}", style("File:").white(), info.file);
    println!("  {:<16} {} bytes", style("Size:").white(), info.size_bytes);
    println!("  {:<16} {}", style("Byte order:").white(), info.byte_order);
    println!("  {:<16} {}", style("Decoded from:").white(), info.source);

    for dir in &info.directories {
        println!();
        println!(
            "  {} {} ({} strip{})",
            style("Directory").cyan().bold(),
            dir.index,
            dir.strips,
            if dir.strips == 1 { "" } else { "s" }
        );
        for field in &dir.fields {
            println!(
                "    {:<28} {}",
                style(format!("{} ({}):", field.name, field.tag)).dim(),
                field.value
            );
        }
    }
    println!();
}
