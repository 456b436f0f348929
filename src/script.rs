use chrono::{DateTime, Local};
use std::borrow::Cow;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use crate::core::{Band, ClassifiedPair};

pub const DEFAULT_SCRIPT_NAME: &str = "view-results.bash";

/// Wall-clock time spent in each stage of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub reading: Duration,
    pub comparing: Duration,
    pub output: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairCounts {
    pub near_duplicate: usize,
    pub similar: usize,
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

/// Quote a path for a POSIX shell, leaving plain names readable.
///
/// Works on the raw bytes of the path, so names that are not valid UTF-8
/// still point at the file on disk.
pub fn shell_quote(path: &Path) -> Vec<u8> {
    let raw = path_bytes(path);
    let plain = !raw.is_empty()
        && raw
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b"_-./,:+@%=".contains(&b));
    if plain {
        return raw.into_owned();
    }

    let mut quoted = Vec::with_capacity(raw.len() + 2);
    quoted.push(b'\'');
    for &b in raw.iter() {
        if b == b'\'' {
            quoted.extend_from_slice(br"'\''");
        } else {
            quoted.push(b);
        }
    }
    quoted.push(b'\'');
    quoted
}

/// Renders classified pairs as a shell script that opens each pair in an
/// image viewer. Near-duplicates are active lines, similar pairs are
/// commented out so they can be enabled by hand.
pub struct ScriptWriter<W: Write> {
    out: W,
    viewer: String,
}

impl<W: Write> ScriptWriter<W> {
    pub fn new(out: W, viewer: impl Into<String>) -> Self {
        Self {
            out,
            viewer: viewer.into(),
        }
    }

    pub fn write_header(&mut self, given: usize, generated_at: DateTime<Local>) -> io::Result<()> {
        writeln!(self.out, "#!/bin/bash")?;
        writeln!(self.out, "# Generated by imgcompare on {}", generated_at.to_rfc3339())?;
        writeln!(self.out, "# Reading in files.")?;
        writeln!(self.out, "# {} filenames given on command line.", given)?;
        Ok(())
    }

    pub fn write_comparing(&mut self, accepted: usize) -> io::Result<()> {
        writeln!(self.out, "# Comparing {} files.", accepted)
    }

    pub fn write_pairs<'a, I>(&mut self, pairs: I) -> io::Result<PairCounts>
    where
        I: IntoIterator<Item = ClassifiedPair<'a>>,
    {
        writeln!(
            self.out,
            "# These files seem to have the same contents, but may differ in size:"
        )?;

        let mut counts = PairCounts::default();
        for pair in pairs {
            let prefix = match pair.band {
                Band::NearDuplicate => {
                    counts.near_duplicate += 1;
                    ""
                }
                Band::Similar => {
                    counts.similar += 1;
                    "#"
                }
                Band::Distinct => continue,
            };
            write!(self.out, "{}{} ", prefix, self.viewer)?;
            self.out.write_all(&shell_quote(pair.first))?;
            self.out.write_all(b" ")?;
            self.out.write_all(&shell_quote(pair.second))?;
            writeln!(self.out, " # -> {:?}", pair.coefficient)?;
        }
        Ok(counts)
    }

    pub fn write_timings(&mut self, timings: &Timings) -> io::Result<()> {
        writeln!(self.out, "# reading files: {:8.3}", timings.reading.as_secs_f64())?;
        writeln!(self.out, "# comparing:     {:8.3}", timings.comparing.as_secs_f64())?;
        writeln!(self.out, "# output:        {:8.3}", timings.output.as_secs_f64())?;
        writeln!(self.out, "#")?;
        writeln!(self.out, "# total:         {:8.3}", timings.total.as_secs_f64())?;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
