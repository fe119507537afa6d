//! TIFF re-encoding command.

use anyhow::Context;
use clap::Args;
use console::style;
use std::path::PathBuf;
use tiffio::tags::tag;
use tiffio::{IfdEntry, SessionManager, StreamJob, Tiff};
use tracing::info;

/// One decoded directory.
#[derive(Debug, Clone)]
struct Page {
    fields: Vec<IfdEntry>,
    strips: Vec<Vec<u8>>,
}

/// Decode a TIFF file and encode it again.
#[derive(Args, Debug)]
pub struct CmdCopy {
    /// Input TIFF file.
    pub input: PathBuf,

    /// Output TIFF file.
    pub output: PathBuf,

    /// Encode into a memory buffer and write it out once finished.
    #[arg(long)]
    pub in_memory: bool,
}

impl CmdCopy {
    /// Execute the copy command.
    pub fn run(&self, sessions: &mut SessionManager) -> anyhow::Result<()> {
        let (pages, written) = self.copy(sessions)?;
        println!(
            "{} {} -> {} ({} director{}, {} bytes)",
            style("Copied").green().bold(),
            self.input.display(),
            self.output.display(),
            pages,
            if pages == 1 { "y" } else { "ies" },
            written
        );
        Ok(())
    }

    /// Returns the number of directories and the output size.
    fn copy(&self, sessions: &mut SessionManager) -> anyhow::Result<(usize, u64)> {
        sessions
            .open_from_file(&self.input)
            .with_context(|| format!("Failed to open {}", self.input.display()))?;
        let pages = sessions.run(read_pages)?;
        sessions.close_active()?;

        if self.in_memory {
            sessions.create_in_memory()?;
            sessions.run(|tiff| write_pages(tiff, &pages))?;
            let bytes = sessions
                .close_active()?
                .and_then(StreamJob::into_bytes)
                .context("Encoder returned no buffer")?;
            std::fs::write(&self.output, &bytes)
                .with_context(|| format!("Failed to write {}", self.output.display()))?;
        } else {
            sessions
                .create_file(&self.output)
                .with_context(|| format!("Failed to create {}", self.output.display()))?;
            sessions.run(|tiff| write_pages(tiff, &pages))?;
            sessions.close_active()?;
        }

        let written = std::fs::metadata(&self.output)?.len();
        info!(pages = pages.len(), written, "copy finished");
        Ok((pages.len(), written))
    }
}

fn read_pages(tiff: &mut Tiff) -> tiffio::Result<Vec<Page>> {
    let mut pages = Vec::new();
    loop {
        // strip layout is rebuilt by the encoder
        let fields = tiff
            .directory()
            .entries()
            .filter(|e| !matches!(e.tag, tag::STRIP_OFFSETS | tag::STRIP_BYTE_COUNTS))
            .cloned()
            .collect();
        let strips = (0..tiff.number_of_strips())
            .map(|i| tiff.read_encoded_strip(i))
            .collect::<tiffio::Result<Vec<_>>>()?;
        pages.push(Page { fields, strips });

        if !tiff.read_directory()? {
            break;
        }
    }
    Ok(pages)
}

fn write_pages(tiff: &mut Tiff, pages: &[Page]) -> tiffio::Result<()> {
    for page in pages {
        for field in &page.fields {
            tiff.set_field(field.clone())?;
        }
        for (index, strip) in page.strips.iter().enumerate() {
            tiff.write_encoded_strip(index as u32, strip)?;
        }
        tiff.write_directory()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiffio::IfdValue;

    fn write_source(path: &std::path::Path) {
        let mut sessions = SessionManager::default();
        let tiff = sessions.create_file(path).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, 4)).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 4)).unwrap();
        tiff.set_field(IfdEntry::long(tag::ROWS_PER_STRIP, 2)).unwrap();
        tiff.set_field(IfdEntry::rational(tag::X_RESOLUTION, 300, 1)).unwrap();
        tiff.write_encoded_strip(0, &[1; 8]).unwrap();
        tiff.write_encoded_strip(1, &[2; 8]).unwrap();
        sessions.close_active().unwrap();
    }

    fn read_back(path: &std::path::Path) -> Vec<Page> {
        let mut sessions = SessionManager::default();
        sessions.open_from_file(path).unwrap();
        let pages = sessions.run(read_pages).unwrap();
        sessions.close_active().unwrap();
        pages
    }

    #[test]
    fn test_copy_preserves_strips_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.tif");
        write_source(&input);

        for in_memory in [false, true] {
            let output = dir.path().join(format!("out-{}.tif", in_memory));
            let cmd = CmdCopy {
                input: input.clone(),
                output: output.clone(),
                in_memory,
            };
            let mut sessions = SessionManager::default();
            let (pages, written) = cmd.copy(&mut sessions).unwrap();
            assert_eq!(pages, 1);
            assert!(written > 16);
            assert!(!sessions.is_open());

            let copied = read_back(&output);
            assert_eq!(copied.len(), 1);
            assert_eq!(copied[0].strips, vec![vec![1; 8], vec![2; 8]]);
            assert!(copied[0]
                .fields
                .iter()
                .any(|f| f.tag == tag::X_RESOLUTION && f.value == IfdValue::Rationals(vec![(300, 1)])));
        }
    }

    #[test]
    fn test_copy_rejects_non_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"\x89PNG\r\n\x1a\n").unwrap();
        let cmd = CmdCopy {
            input,
            output: dir.path().join("out.tif"),
            in_memory: true,
        };
        assert!(cmd.copy(&mut SessionManager::default()).is_err());
        assert!(!dir.path().join("out.tif").exists());
    }
}
