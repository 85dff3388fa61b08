//! Parse the output of `zpool iostat`, [sans-io](https://sans-io.readthedocs.io/how-to-sans-io.html).
//!
//! Expected layout (indentation and column widths vary):
//!
//! ```text
//!               capacity     operations     bandwidth
//! pool        alloc   free   read  write   read  write
//! ----------  -----  -----  -----  -----  -----  -----
//! tank         200M   792M      0      0      0    310
//! test0       94.5K  79.9M      0      0    152    539
//! ----------  -----  -----  -----  -----  -----  -----
//! ```
//!
//! Errors are returned for any row that does not decode; a partially-decoded table is never
//! returned, so stale values are preferred over a mix of old and new.

use crate::size::{self, DecodeError};
use std::collections::HashMap;

/// Label naming the pool of a series
pub const LABEL_POOL: &str = "zpool_name";
/// Label naming the host of a series
pub const LABEL_HOSTNAME: &str = "hostname";

/// Title row, column-name row, separator row
const HEADER_LINES: usize = 3;

/// Constant label dimensions of a [`Measurement`]
pub type Labels = HashMap<String, String>;

enum_all! {
    /// Numeric columns of a pool row, in output order
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Column {
        /// `capacity alloc`
        CapacityAllocated,
        /// `capacity free`
        CapacityFree,
        /// `operations read`
        OpsRead,
        /// `operations write`
        OpsWrite,
        /// `bandwidth read`
        BandwidthRead,
        /// `bandwidth write`
        BandwidthWrite,
    }
}
impl Column {
    /// Exported metric name (before any namespace prefix)
    #[must_use]
    pub const fn metric_name(self) -> &'static str {
        match self {
            Self::CapacityAllocated => "zpool_capacity_allocable_bytes",
            Self::CapacityFree => "zpool_capacity_free_bytes",
            Self::OpsRead => "zpool_operations_read_bytes",
            Self::OpsWrite => "zpool_operations_write_bytes",
            Self::BandwidthRead => "zpool_bandwidth_read_bytes",
            Self::BandwidthWrite => "zpool_bandwidth_write_bytes",
        }
    }
    /// Exported metric help text
    #[must_use]
    pub const fn help(self) -> &'static str {
        match self {
            Self::CapacityAllocated => "Free capacity allocable in bytes",
            Self::CapacityFree => "Free capacity space in bytes",
            Self::OpsRead => "zpool operations read in bytes",
            Self::OpsWrite => "zpool operations write in bytes",
            Self::BandwidthRead => "zpool bandwidth read in bytes",
            Self::BandwidthWrite => "zpool bandwidth write in bytes",
        }
    }
}
impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::CapacityAllocated => "capacity alloc",
            Self::CapacityFree => "capacity free",
            Self::OpsRead => "operations read",
            Self::OpsWrite => "operations write",
            Self::BandwidthRead => "bandwidth read",
            Self::BandwidthWrite => "bandwidth write",
        };
        write!(f, "{label}")
    }
}

/// Single value to export, identified by `name` and `labels`
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    /// Metric name (before any namespace prefix)
    pub name: String,
    /// Metric help text
    pub help: String,
    /// Current value
    pub value: f64,
    /// Constant labels, always including [`LABEL_POOL`] and [`LABEL_HOSTNAME`]
    pub labels: Labels,
}
impl Measurement {
    /// Constructs the measurement for the specified column
    #[must_use]
    pub fn new(column: Column, value: f64, labels: Labels) -> Self {
        Self {
            name: column.metric_name().to_string(),
            help: column.help().to_string(),
            value,
            labels,
        }
    }
}

/// Measurements for one pool row of a single poll
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub struct PoolSnapshot {
    pub name: String,
    pub capacity_allocated: Measurement,
    pub capacity_free: Measurement,
    pub ops_read: Measurement,
    pub ops_write: Measurement,
    pub bandwidth_read: Measurement,
    pub bandwidth_write: Measurement,
}
impl PoolSnapshot {
    /// Returns the measurement for the specified column
    #[must_use]
    pub fn measurement(&self, column: Column) -> &Measurement {
        match column {
            Column::CapacityAllocated => &self.capacity_allocated,
            Column::CapacityFree => &self.capacity_free,
            Column::OpsRead => &self.ops_read,
            Column::OpsWrite => &self.ops_write,
            Column::BandwidthRead => &self.bandwidth_read,
            Column::BandwidthWrite => &self.bandwidth_write,
        }
    }
    /// Iterates all measurements, in column order
    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> + '_ {
        Column::ALL.iter().map(|&column| self.measurement(column))
    }
}

/// Failure to parse the `zpool iostat` table
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// Too few lines for the header and trailing separator
    #[error("expected 3 header lines and a trailing separator, found {lines} lines")]
    Truncated {
        /// Count of non-trailing-blank lines
        lines: usize,
    },
    /// Final non-blank line is not a separator row
    #[error("missing trailing separator, found {line:?}")]
    MissingSeparator {
        /// Final non-blank line
        line: String,
    },
    /// Row does not have exactly the expected columns
    #[error("expected 7 fields, found {count} in row {row:?}")]
    FieldCount {
        /// Trimmed row contents
        row: String,
        /// Number of whitespace-separated fields
        count: usize,
    },
    /// Numeric field could not be decoded
    #[error("could not convert {column} field for pool {pool:?}")]
    Decode {
        /// Pool name of the row
        pool: String,
        /// Column of the field
        column: Column,
        /// Decode failure
        #[source]
        source: DecodeError,
    },
}

/// Extracts one [`PoolSnapshot`] per pool row from the provided `zpool iostat` output
///
/// Empty output (e.g. no pools imported) results in no snapshots.
///
/// # Errors
/// Returns an error if the table layout is not recognized, or any numeric field fails to decode
pub fn parse(iostat_output: &str, hostname: &str) -> Result<Vec<PoolSnapshot>, TableError> {
    if iostat_output.trim().is_empty() {
        return Ok(vec![]);
    }

    let lines: Vec<&str> = iostat_output.lines().collect();
    // trailing blank line after the final separator is optional
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |last| last + 1);
    let lines = &lines[..end];

    let Some((&footer, body)) = lines.split_last().filter(|_| lines.len() > HEADER_LINES) else {
        return Err(TableError::Truncated { lines: lines.len() });
    };
    if !is_separator(footer) {
        return Err(TableError::MissingSeparator {
            line: footer.to_string(),
        });
    }

    body[HEADER_LINES..]
        .iter()
        .map(|row| parse_row(row, hostname))
        .collect()
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && line.chars().all(|c| c == '-' || c.is_whitespace())
}

fn parse_row(row: &str, hostname: &str) -> Result<PoolSnapshot, TableError> {
    let fields: Vec<&str> = row.split_whitespace().collect();
    let [name, capacity_alloc, capacity_free, ops_read, ops_write, bandwidth_read, bandwidth_write] =
        fields[..]
    else {
        return Err(TableError::FieldCount {
            row: row.trim().to_string(),
            count: fields.len(),
        });
    };

    let labels = Labels::from([
        (LABEL_POOL.to_string(), name.to_string()),
        (LABEL_HOSTNAME.to_string(), hostname.to_string()),
    ]);
    let measure = |column: Column, field: &str| -> Result<Measurement, TableError> {
        let value = size::decode(field).map_err(|source| TableError::Decode {
            pool: name.to_string(),
            column,
            source,
        })?;
        Ok(Measurement::new(column, value, labels.clone()))
    };

    Ok(PoolSnapshot {
        name: name.to_string(),
        capacity_allocated: measure(Column::CapacityAllocated, capacity_alloc)?,
        capacity_free: measure(Column::CapacityFree, capacity_free)?,
        ops_read: measure(Column::OpsRead, ops_read)?,
        ops_write: measure(Column::OpsWrite, ops_write)?,
        bandwidth_read: measure(Column::BandwidthRead, bandwidth_read)?,
        bandwidth_write: measure(Column::BandwidthWrite, bandwidth_write)?,
    })
}
