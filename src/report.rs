use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::config::Config;
use crate::core::{Band, Rejection, SimilarityMatrix};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RejectedEntry {
    pub position: usize,
    pub path: String,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PairEntry {
    pub first: String,
    pub second: String,
    pub coefficient: f64,
    pub band: Band,
}

/// Machine-readable record of one run.
///
/// Paths are stored lossily as UTF-8 text; names that are not valid UTF-8
/// show U+FFFD here but stay exact in the script.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Report {
    pub generated_at: DateTime<Local>,
    pub config: Config,
    pub given: usize,
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedEntry>,
    pub pairs: Vec<PairEntry>,
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Report {
    pub fn new(
        generated_at: DateTime<Local>,
        config: &Config,
        given: usize,
        rejected: &[Rejection],
        matrix: &SimilarityMatrix,
    ) -> Self {
        let rejected = rejected
            .iter()
            .map(|r| RejectedEntry {
                position: r.position,
                path: display_path(&r.path),
                reason: r.error.to_string(),
            })
            .collect();

        let pairs = matrix
            .classify()
            .map(|p| PairEntry {
                first: display_path(p.first),
                second: display_path(p.second),
                coefficient: p.coefficient,
                band: p.band,
            })
            .collect();

        Self {
            generated_at,
            config: config.clone(),
            given,
            accepted: matrix.paths().iter().map(|p| display_path(p)).collect(),
            rejected,
            pairs,
        }
    }

    pub fn write_to<W: Write>(&self, out: W) -> io::Result<()> {
        serde_json::to_writer_pretty(out, self)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        writeln!(out)?;
        out.flush()
    }
}
