//! Retained draws and where they go.
//!
//! A [`SampleRow`] flattens to `4q + 4` values in the column order
//! `beta_m_1, alpha_a_1, r1_1, r3_1, ..., beta_m_q, alpha_a_q, r1_q, r3_q,
//! beta_a, sigma_e, sigma_g, log_posterior`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use csv::{Writer, WriterBuilder};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::sampler::SamplerError;
use crate::types::MixtureLabel;

/// One retained draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub beta_m: Vec<f64>,
    pub alpha_a: Vec<f64>,
    pub r1: Vec<MixtureLabel>,
    pub r3: Vec<MixtureLabel>,
    pub beta_a: f64,
    pub sigma_e: f64,
    pub sigma_g: f64,
    pub log_posterior: f64,
}

impl SampleRow {
    #[inline]
    pub fn n_mediators(&self) -> usize {
        self.beta_m.len()
    }

    /// Values per row for `q` mediators.
    #[inline]
    pub fn width(q: usize) -> usize {
        4 * q + 4
    }

    #[inline]
    pub fn thresholded_beta_m(&self, j: usize) -> f64 {
        if self.r1[j].is_active() { self.beta_m[j] } else { 0.0 }
    }

    #[inline]
    pub fn thresholded_alpha_a(&self, j: usize) -> f64 {
        if self.r3[j].is_active() { self.alpha_a[j] } else { 0.0 }
    }

    fn check_shape(&self) -> Result<(), SamplerError> {
        let q = self.n_mediators();
        for (what, len) in [
            ("alpha_a values in sample row", self.alpha_a.len()),
            ("r1 labels in sample row", self.r1.len()),
            ("r3 labels in sample row", self.r3.len()),
        ] {
            if len != q {
                return Err(SamplerError::InvalidDimension {
                    what,
                    expected: q,
                    found: len,
                });
            }
        }
        Ok(())
    }

    /// Writes the flat table layout into `out`, which must hold `4q + 4` values.
    pub fn write_flat(&self, out: &mut [f64]) -> Result<(), SamplerError> {
        self.check_shape()?;
        let q = self.n_mediators();
        if out.len() != Self::width(q) {
            return Err(SamplerError::InvalidDimension {
                what: "sample row output buffer",
                expected: Self::width(q),
                found: out.len(),
            });
        }
        for j in 0..q {
            out[4 * j] = self.beta_m[j];
            out[4 * j + 1] = self.alpha_a[j];
            out[4 * j + 2] = self.r1[j].code();
            out[4 * j + 3] = self.r3[j].code();
        }
        out[4 * q] = self.beta_a;
        out[4 * q + 1] = self.sigma_e;
        out[4 * q + 2] = self.sigma_g;
        out[4 * q + 3] = self.log_posterior;
        Ok(())
    }

    pub fn to_flat(&self) -> Result<Vec<f64>, SamplerError> {
        let mut out = vec![0.0; Self::width(self.n_mediators())];
        self.write_flat(&mut out)?;
        Ok(out)
    }

    /// Header names matching [`SampleRow::write_flat`], 1-based per mediator.
    pub fn column_names(q: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(Self::width(q));
        for j in 1..=q {
            names.push(format!("beta_m_{j}"));
            names.push(format!("alpha_a_{j}"));
            names.push(format!("r1_{j}"));
            names.push(format!("r3_{j}"));
        }
        names.extend(
            ["beta_a", "sigma_e", "sigma_g", "log_posterior"]
                .iter()
                .map(|s| s.to_string()),
        );
        names
    }
}

/// Destination for retained draws, called once per retained iteration.
pub trait SampleSink {
    fn record(&mut self, row: &SampleRow) -> Result<(), SamplerError>;

    /// Called once after the last row; sinks holding buffered rows flush here.
    fn finish(&mut self) -> Result<(), SamplerError> {
        Ok(())
    }
}

impl<S: SampleSink + ?Sized> SampleSink for &mut S {
    fn record(&mut self, row: &SampleRow) -> Result<(), SamplerError> {
        (**self).record(row)
    }

    fn finish(&mut self) -> Result<(), SamplerError> {
        (**self).finish()
    }
}

/// Sends every row to both sinks.
impl<A: SampleSink, B: SampleSink> SampleSink for (A, B) {
    fn record(&mut self, row: &SampleRow) -> Result<(), SamplerError> {
        self.0.record(row)?;
        self.1.record(row)
    }

    fn finish(&mut self) -> Result<(), SamplerError> {
        self.0.finish()?;
        self.1.finish()
    }
}

/// Keeps every row in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    rows: Vec<SampleRow>,
}

impl MemorySink {
    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<SampleRow> {
        self.rows
    }
}

impl SampleSink for MemorySink {
    fn record(&mut self, row: &SampleRow) -> Result<(), SamplerError> {
        row.check_shape()?;
        self.rows.push(row.clone());
        Ok(())
    }
}

/// Names one run's output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentifiers {
    pub q1: usize,
    pub q2: usize,
    pub permute: usize,
}

impl RunIdentifiers {
    /// `results_{q1}{q2}_{permute}.txt`
    pub fn archive_file_name(&self) -> String {
        format!("results_{}{}_{}.txt", self.q1, self.q2, self.permute)
    }

    /// `summary_{q1}{q2}_{permute}.json`
    pub fn summary_file_name(&self) -> String {
        format!("summary_{}{}_{}.json", self.q1, self.q2, self.permute)
    }
}

/// Fixed-capacity buffer of rows backed by a delimited table file.
///
/// When the buffer fills it is appended to the file and reset, so recording
/// continues indefinitely; [`SampleSink::finish`] writes the partial last
/// block.
pub struct SampleArchive {
    buffer: Array2<f64>,
    len: usize,
    q: usize,
    path: PathBuf,
    writer: Writer<File>,
    rows_written: usize,
    flushes: usize,
}

impl SampleArchive {
    /// Creates (truncating) `dir/results_{q1}{q2}_{permute}.txt`.
    pub fn create(
        dir: &Path,
        ids: RunIdentifiers,
        q: usize,
        capacity: usize,
        delimiter: u8,
        header: bool,
    ) -> Result<Self, SamplerError> {
        fs::create_dir_all(dir)?;
        Self::create_at(dir.join(ids.archive_file_name()), q, capacity, delimiter, header)
    }

    pub fn create_at(
        path: PathBuf,
        q: usize,
        capacity: usize,
        delimiter: u8,
        header: bool,
    ) -> Result<Self, SamplerError> {
        if capacity == 0 {
            return Err(SamplerError::InvalidInput(
                "archive capacity must be at least 1".to_string(),
            ));
        }
        let io_err = |source| SamplerError::ArchiveIo {
            path: path.display().to_string(),
            source,
        };
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .from_path(&path)
            .map_err(io_err)?;
        if header {
            writer
                .write_record(SampleRow::column_names(q))
                .map_err(io_err)?;
            writer.flush()?;
        }
        Ok(Self {
            buffer: Array2::zeros((capacity, SampleRow::width(q))),
            len: 0,
            q,
            path,
            writer,
            rows_written: 0,
            flushes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.buffer.nrows()
    }

    /// Rows currently buffered and not yet on disk.
    pub fn buffered(&self) -> usize {
        self.len
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Number of buffer flushes so far.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    fn flush_buffer(&mut self) -> Result<(), SamplerError> {
        if self.len == 0 {
            return Ok(());
        }
        let path = self.path.display().to_string();
        for row in self.buffer.outer_iter().take(self.len) {
            self.writer
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(|source| SamplerError::ArchiveIo {
                    path: path.clone(),
                    source,
                })?;
        }
        self.writer.flush()?;
        log::debug!("flushed {} rows to {}", self.len, path);
        self.rows_written += self.len;
        self.len = 0;
        self.flushes += 1;
        Ok(())
    }
}

impl SampleSink for SampleArchive {
    fn record(&mut self, row: &SampleRow) -> Result<(), SamplerError> {
        if row.n_mediators() != self.q {
            return Err(SamplerError::InvalidDimension {
                what: "sample row width",
                expected: SampleRow::width(self.q),
                found: SampleRow::width(row.n_mediators()),
            });
        }
        let mut slot = self.buffer.row_mut(self.len);
        let out = slot
            .as_slice_mut()
            .ok_or_else(|| SamplerError::InvalidInput("archive buffer is not contiguous".to_string()))?;
        row.write_flat(out)?;
        self.len += 1;
        if self.len == self.capacity() {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SamplerError> {
        self.flush_buffer()
    }
}
