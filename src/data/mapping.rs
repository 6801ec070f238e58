//! Canonical schema and column mapping
//!
//! Maps arbitrary source tables onto the canonical packet/flow schema used by
//! the rest of the pipeline. Missing canonical fields are synthesized with
//! fixed defaults and flagged, never silently dropped.

use crate::error::{AnomalyError, Result};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use polars::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical attribute names. Together with the derived flow columns
/// (`flow.packets`, `flow.bytes`, `flow.duration`) these form the
/// 14-attribute canonical schema.
pub const TIME: &str = "frame.time";
pub const LABEL: &str = "label";
pub const PROTOCOL: &str = "protocol";
pub const SRC_IP: &str = "ip.src";
pub const DST_IP: &str = "ip.dst";
pub const TCP_SRC_PORT: &str = "tcp.srcport";
pub const TCP_DST_PORT: &str = "tcp.dstport";
pub const UDP_SRC_PORT: &str = "udp.srcport";
pub const UDP_DST_PORT: &str = "udp.dstport";
pub const FRAME_LEN: &str = "frame.len";
pub const TCP_FLAGS: &str = "tcp.flags";

/// Canonical fields expected from (or synthesized into) every mapped table.
pub const CANONICAL_FIELDS: &[&str] = &[
    TIME,
    LABEL,
    PROTOCOL,
    SRC_IP,
    DST_IP,
    TCP_SRC_PORT,
    TCP_DST_PORT,
    UDP_SRC_PORT,
    UDP_DST_PORT,
    FRAME_LEN,
    TCP_FLAGS,
];

/// Column-name synonyms for mapping inference, checked in declaration order.
const FEATURE_SYNONYMS: &[(&str, &[&str])] = &[
    (SRC_IP, &["ip.src", "src_ip", "source_ip", "ip_source", "ip_src", "srcip"]),
    (DST_IP, &["ip.dst", "dst_ip", "dest_ip", "destination_ip", "ip_dest", "ip_dst", "dstip"]),
    (TCP_SRC_PORT, &["tcp.srcport", "src_port", "sport", "source_port", "tcp_sport"]),
    (TCP_DST_PORT, &["tcp.dstport", "dst_port", "dport", "destination_port", "tcp_dport"]),
    (UDP_SRC_PORT, &["udp.srcport", "udp_sport"]),
    (UDP_DST_PORT, &["udp.dstport", "udp_dport"]),
    (FRAME_LEN, &["frame.len", "len", "length", "pkt_len", "packet_length", "bytes"]),
    (TIME, &["frame.time", "timestamp", "time", "frame_time", "datetime"]),
    (TCP_FLAGS, &["tcp.flags", "flags", "tcp_flag"]),
    (PROTOCOL, &["protocol", "proto", "l4_proto"]),
    (LABEL, &["label", "target", "class", "attack", "is_attack", "malicious", "anomaly"]),
];

/// Textual label values mapped to binary classes.
const LABEL_ALIASES: &[(&str, i64)] = &[
    ("benign", 0),
    ("normal", 0),
    ("attack", 1),
    ("malicious", 1),
    ("anomaly", 1),
];

/// Where a canonical column's values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Present in the source table (possibly under a synonym).
    Observed,
    /// Absent from the source; filled with a documented default.
    Synthesized,
}

/// A single canonical column in its raw (pre-feature) form.
#[derive(Debug, Clone)]
pub enum RawColumn {
    /// Numeric values; `None` marks a missing cell.
    Numeric(Vec<Option<f64>>),
    /// Textual values; `None` marks a missing cell.
    Text(Vec<Option<String>>),
}

impl RawColumn {
    pub fn len(&self) -> usize {
        match self {
            RawColumn::Numeric(v) => v.len(),
            RawColumn::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mapping from canonical attribute name to source column name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub assignments: HashMap<String, String>,
}

impl ColumnMapping {
    pub fn new(assignments: HashMap<String, String>) -> Self {
        Self { assignments }
    }

    pub fn source_for(&self, canonical: &str) -> Option<&str> {
        self.assignments.get(canonical).map(|s| s.as_str())
    }
}

/// A raw table renamed onto the canonical schema, with a coerced binary
/// label vector and per-column provenance.
#[derive(Debug, Clone)]
pub struct MappedTable {
    pub n_rows: usize,
    /// Canonical columns in schema order (label excluded).
    pub columns: Vec<(String, RawColumn)>,
    pub provenance: HashMap<String, Provenance>,
    /// Binary label, one entry per row.
    pub label: Vec<i64>,
}

impl MappedTable {
    pub fn column(&self, name: &str) -> Option<&RawColumn> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Number of distinct label values.
    pub fn n_classes(&self) -> usize {
        let mut classes: Vec<i64> = self.label.clone();
        classes.sort_unstable();
        classes.dedup();
        classes.len()
    }
}

/// Infer a canonical mapping from the source column names.
pub fn infer_mapping<S: AsRef<str>>(columns: &[S]) -> ColumnMapping {
    let lookup: HashMap<String, &str> = columns
        .iter()
        .map(|c| (c.as_ref().to_lowercase(), c.as_ref()))
        .collect();

    let mut assignments = HashMap::new();
    for (canonical, candidates) in FEATURE_SYNONYMS {
        for candidate in *candidates {
            if let Some(&source) = lookup.get(&candidate.to_lowercase()) {
                assignments.insert(canonical.to_string(), source.to_string());
                break;
            }
        }
    }
    ColumnMapping::new(assignments)
}

/// FNV-1a hash of the dataset id, used to seed synthesized columns so they
/// are reproducible per dataset.
fn dataset_seed(dataset_id: &str, seed: u64) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in dataset_id.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h ^ seed
}

/// Apply a column mapping to a raw table, synthesizing any missing canonical
/// fields and coercing the label to binary {0,1}.
///
/// Returns `DataError` when no label column can be found or derived.
pub fn apply_mapping(
    df: &DataFrame,
    mapping: &ColumnMapping,
    dataset_id: &str,
    seed: u64,
) -> Result<MappedTable> {
    let n_rows = df.height();
    if n_rows == 0 {
        return Err(AnomalyError::DataError("dataset is empty".to_string()));
    }

    let mut columns = Vec::new();
    let mut provenance = HashMap::new();

    for &field in CANONICAL_FIELDS {
        if field == LABEL {
            continue;
        }
        match mapping.source_for(field).and_then(|src| df.column(src).ok()) {
            Some(col) => {
                let raw = if field == TIME {
                    RawColumn::Numeric(extract_timestamps(col)?)
                } else {
                    extract_column(col)?
                };
                columns.push((field.to_string(), raw));
                provenance.insert(field.to_string(), Provenance::Observed);
            }
            None => {
                columns.push((field.to_string(), synthesize_column(field, df, n_rows, dataset_id, seed)));
                provenance.insert(field.to_string(), Provenance::Synthesized);
            }
        }
    }

    let (label, label_provenance) = resolve_label(df, mapping)?;
    provenance.insert(LABEL.to_string(), label_provenance);

    Ok(MappedTable {
        n_rows,
        columns,
        provenance,
        label,
    })
}

/// Extract a source column as numeric or text depending on its dtype.
fn extract_column(col: &Column) -> Result<RawColumn> {
    match col.dtype() {
        DataType::String => {
            let ca = col.str().map_err(|e| AnomalyError::DataError(e.to_string()))?;
            Ok(RawColumn::Text(
                ca.into_iter().map(|v| v.map(|s| s.to_string())).collect(),
            ))
        }
        DataType::Boolean => {
            let ca = col.bool().map_err(|e| AnomalyError::DataError(e.to_string()))?;
            Ok(RawColumn::Numeric(
                ca.into_iter()
                    .map(|v| v.map(|b| if b { 1.0 } else { 0.0 }))
                    .collect(),
            ))
        }
        _ => {
            let casted = col
                .cast(&DataType::Float64)
                .map_err(|e| AnomalyError::DataError(e.to_string()))?;
            let ca = casted
                .f64()
                .map_err(|e| AnomalyError::DataError(e.to_string()))?;
            Ok(RawColumn::Numeric(ca.into_iter().collect()))
        }
    }
}

/// Extract a timestamp column as seconds (epoch seconds for datetimes,
/// as-is for numerics, chrono-parsed for strings).
fn extract_timestamps(col: &Column) -> Result<Vec<Option<f64>>> {
    match col.dtype() {
        DataType::Datetime(unit, _) => {
            let casted = col
                .cast(&DataType::Int64)
                .map_err(|e| AnomalyError::DataError(e.to_string()))?;
            let ca = casted
                .i64()
                .map_err(|e| AnomalyError::DataError(e.to_string()))?;
            let divisor = match unit {
                TimeUnit::Nanoseconds => 1e9,
                TimeUnit::Microseconds => 1e6,
                TimeUnit::Milliseconds => 1e3,
            };
            Ok(ca.into_iter().map(|v| v.map(|t| t as f64 / divisor)).collect())
        }
        DataType::String => {
            let ca = col.str().map_err(|e| AnomalyError::DataError(e.to_string()))?;
            Ok(ca.into_iter().map(|v| v.and_then(parse_timestamp)).collect())
        }
        _ => match extract_column(col)? {
            RawColumn::Numeric(v) => Ok(v),
            RawColumn::Text(_) => Ok(vec![None; col.len()]),
        },
    }
}

/// Parse a textual timestamp into epoch seconds. Tries RFC 3339, then a few
/// common layouts; unparseable values become missing.
fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp() as f64 + f64::from(dt.time().nanosecond()) / 1e9);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp() as f64);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp() as f64);
    }
    s.parse::<f64>().ok()
}

/// Fill a missing canonical field with its documented default.
fn synthesize_column(
    field: &str,
    df: &DataFrame,
    n_rows: usize,
    dataset_id: &str,
    seed: u64,
) -> RawColumn {
    match field {
        SRC_IP | DST_IP => RawColumn::Text(vec![Some("0.0.0.0".to_string()); n_rows]),
        TCP_FLAGS => RawColumn::Text(vec![Some("0x00".to_string()); n_rows]),
        PROTOCOL => RawColumn::Text(vec![Some("unknown".to_string()); n_rows]),
        TIME => {
            // Uniform random time-of-day, seeded per dataset so repeated runs
            // see the same synthetic timestamps.
            let mut rng = ChaCha8Rng::seed_from_u64(dataset_seed(dataset_id, seed));
            RawColumn::Numeric(
                (0..n_rows)
                    .map(|_| Some(rng.gen_range(0.0..86_400.0)))
                    .collect(),
            )
        }
        FRAME_LEN => first_numeric_column(df, n_rows),
        _ => RawColumn::Numeric(vec![Some(0.0); n_rows]),
    }
}

/// Borrow the first numeric source column as a stand-in for frame length,
/// falling back to zeros.
fn first_numeric_column(df: &DataFrame, n_rows: usize) -> RawColumn {
    for col in df.get_columns() {
        if matches!(col.dtype(), DataType::String | DataType::Boolean) {
            continue;
        }
        if let Ok(casted) = col.cast(&DataType::Float64) {
            if let Ok(ca) = casted.f64() {
                return RawColumn::Numeric(ca.into_iter().collect());
            }
        }
    }
    RawColumn::Numeric(vec![Some(0.0); n_rows])
}

/// Resolve the binary label vector, preferring the mapped column and falling
/// back to derivation heuristics.
fn resolve_label(df: &DataFrame, mapping: &ColumnMapping) -> Result<(Vec<i64>, Provenance)> {
    if let Some(col) = mapping.source_for(LABEL).and_then(|src| df.column(src).ok()) {
        let coerced = coerce_label(col)?;
        if distinct_count(&coerced) > 1 {
            return Ok((coerced, Provenance::Observed));
        }
    }

    let derived = derive_label(df)?;
    if distinct_count(&derived) > 1 {
        return Ok((derived, Provenance::Synthesized));
    }

    Err(AnomalyError::DataError(
        "unlabelable dataset: no label column found and no heuristic produced two classes"
            .to_string(),
    ))
}

fn distinct_count(label: &[i64]) -> usize {
    let mut v = label.to_vec();
    v.sort_unstable();
    v.dedup();
    v.len()
}

/// Coerce an arbitrary label column to {0,1}.
fn coerce_label(col: &Column) -> Result<Vec<i64>> {
    match extract_column(col)? {
        RawColumn::Numeric(values) => Ok(values
            .into_iter()
            .map(|v| match v {
                Some(x) if x > 0.0 => 1,
                _ => 0,
            })
            .collect()),
        RawColumn::Text(values) => Ok(values
            .into_iter()
            .map(|v| {
                let lowered = v.unwrap_or_default().trim().to_lowercase();
                LABEL_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == lowered)
                    .map(|(_, class)| *class)
                    .unwrap_or(0)
            })
            .collect()),
    }
}

/// Last-resort label derivation: threshold the first varying numeric column
/// at its 90th percentile.
fn derive_label(df: &DataFrame) -> Result<Vec<i64>> {
    for col in df.get_columns() {
        if matches!(col.dtype(), DataType::String | DataType::Boolean) {
            continue;
        }
        let values = match extract_column(col)? {
            RawColumn::Numeric(v) => v,
            RawColumn::Text(_) => continue,
        };
        let mut present: Vec<f64> = values.iter().flatten().copied().collect();
        if present.is_empty() {
            continue;
        }
        present.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        present.dedup();
        if present.len() < 2 {
            continue;
        }
        let mut sorted: Vec<f64> = values.iter().flatten().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() - 1) as f64 * 0.9) as usize;
        let threshold = sorted[idx];
        return Ok(values
            .into_iter()
            .map(|v| match v {
                Some(x) if x >= threshold => 1,
                _ => 0,
            })
            .collect());
    }
    Ok(vec![0; df.height()])
}
