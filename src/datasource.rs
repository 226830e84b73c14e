//! CSV data sources for load tests. Each VU iteration takes the next row,
//! round-robin across the whole run, and binds `${variable.column}`.

use crate::types::DataSource;
use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct CsvSource {
    variable: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    cursor: AtomicUsize,
}

impl CsvSource {
    fn load(ds: &DataSource) -> Result<Self> {
        let delimiter = ds.delimiter.as_bytes().first().copied().unwrap_or(b',');
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_path(&ds.path)
            .with_context(|| format!("open data source {}", ds.path))?;

        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("read header of {}", ds.path))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("read row of {}", ds.path))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        if rows.is_empty() {
            bail!("data source {} has no rows", ds.path);
        }
        debug!("data source {}: {} columns, {} rows", ds.path, columns.len(), rows.len());
        Ok(Self {
            variable: ds.variable.trim().to_string(),
            columns,
            rows,
            cursor: AtomicUsize::new(0),
        })
    }

    fn bind_next(&self, vars: &mut HashMap<String, String>) {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.rows.len();
        for (column, value) in self.columns.iter().zip(&self.rows[idx]) {
            vars.insert(format!("{}.{column}", self.variable), value.clone());
        }
    }
}

/// All data sources of a plan, shared by every VU of a run.
#[derive(Debug, Default)]
pub struct DataFeed {
    sources: Vec<CsvSource>,
}

impl DataFeed {
    pub fn load(sources: &[DataSource]) -> Result<Self> {
        Ok(Self {
            sources: sources.iter().map(CsvSource::load).collect::<Result<_>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Advance every source by one row and bind its columns into `vars`.
    pub fn bind_next(&self, vars: &mut HashMap<String, String>) {
        for source in &self.sources {
            source.bind_next(vars);
        }
    }
}
