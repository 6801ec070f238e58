//! Feature preprocessing
//!
//! Turns a mapped table into a model-ready numeric matrix: flow aggregation,
//! cyclical time encoding, frame-length/port binning, one-hot encoding with a
//! train-fitted vocabulary, and text-length features for high-cardinality
//! columns. Deterministic: identical input produces identical output.

use crate::data::mapping::{self, MappedTable, RawColumn};
use crate::error::{AnomalyError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;

/// Seconds in a day, the period for cyclical time encoding.
const DAY_SECONDS: f64 = 86_400.0;

/// Bin label used for missing or out-of-range values.
const UNKNOWN_BIN: &str = "unknown";

/// Default frame-length bin edges (bytes).
pub const FRAME_LEN_BINS: &[f64] = &[0.0, 64.0, 128.0, 256.0, 512.0, 1024.0, 1500.0, 9000.0];

/// Default port bin edges (well-known / registered / ephemeral).
pub const PORT_BINS: &[f64] = &[0.0, 1024.0, 49152.0, 65536.0];

/// Preprocessing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub frame_len_bins: Vec<f64>,
    pub port_bins: Vec<f64>,
    /// Categorical columns with more distinct values than this become
    /// text-feature columns instead of one-hot columns.
    pub max_unique_for_categorical: usize,
    /// Categorical columns whose average value length exceeds this become
    /// text-feature columns.
    pub text_length_threshold: usize,
    pub keep_numeric_frame_len: bool,
    pub keep_numeric_ports: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            frame_len_bins: FRAME_LEN_BINS.to_vec(),
            port_bins: PORT_BINS.to_vec(),
            max_unique_for_categorical: 50,
            text_length_threshold: 30,
            keep_numeric_frame_len: false,
            keep_numeric_ports: true,
        }
    }
}

/// An engineered column prior to encoding.
#[derive(Debug, Clone)]
enum FeatureColumn {
    /// NaN marks a missing cell (imputed later).
    Numeric(Vec<f64>),
    Categorical(Vec<Option<String>>),
}

/// Fitted preprocessor. The categorical/text split and one-hot vocabulary are
/// learned from the training partition only; `transform` reindexes onto the
/// fitted column list so train and test matrices always align.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePreprocessor {
    config: PreprocessConfig,
    /// Columns one-hot encoded, with their fitted vocabulary.
    vocabulary: Option<BTreeMap<String, Vec<String>>>,
    /// Columns replaced by length/token-count features.
    text_columns: Option<Vec<String>>,
    /// Final output column names, fixed at fit time.
    feature_columns: Option<Vec<String>>,
}

impl FeaturePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            vocabulary: None,
            text_columns: None,
            feature_columns: None,
        }
    }

    /// Output column names (available after `fit`).
    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_columns.as_deref()
    }

    /// Learn the categorical/text split and one-hot vocabulary from the given
    /// rows (the training partition).
    pub fn fit(&mut self, table: &MappedTable, rows: &[usize]) -> Result<()> {
        let features = build_features(table, rows, &self.config);

        let mut vocabulary = BTreeMap::new();
        let mut text_columns = Vec::new();

        for (name, column) in &features {
            let values = match column {
                FeatureColumn::Categorical(v) => v,
                FeatureColumn::Numeric(_) => continue,
            };

            let mut unique: Vec<&str> = values.iter().flatten().map(|s| s.as_str()).collect();
            unique.sort_unstable();
            unique.dedup();

            let total_len: usize = values.iter().flatten().map(|s| s.len()).sum();
            let present = values.iter().flatten().count().max(1);
            let avg_len = total_len / present;

            if unique.len() > self.config.max_unique_for_categorical
                || avg_len > self.config.text_length_threshold
            {
                text_columns.push(name.clone());
            } else {
                vocabulary.insert(name.clone(), unique.iter().map(|s| s.to_string()).collect());
            }
        }

        // Fix the output column order: engineered order, with categorical
        // columns expanded into their vocabulary plus a missing indicator.
        let mut feature_columns = Vec::new();
        for (name, column) in &features {
            match column {
                FeatureColumn::Numeric(_) => feature_columns.push(name.clone()),
                FeatureColumn::Categorical(_) => {
                    if text_columns.contains(name) {
                        feature_columns.push(format!("{name}.len"));
                        feature_columns.push(format!("{name}.tokens"));
                    } else {
                        for value in &vocabulary[name] {
                            feature_columns.push(format!("{name}.{value}"));
                        }
                        feature_columns.push(format!("{name}.nan"));
                    }
                }
            }
        }

        self.vocabulary = Some(vocabulary);
        self.text_columns = Some(text_columns);
        self.feature_columns = Some(feature_columns);
        Ok(())
    }

    /// Encode the given rows into a matrix aligned with the fitted columns.
    /// Values unseen at fit time contribute all-zero indicator columns.
    pub fn transform(&self, table: &MappedTable, rows: &[usize]) -> Result<Array2<f64>> {
        let vocabulary = self
            .vocabulary
            .as_ref()
            .ok_or_else(|| AnomalyError::PreprocessingError("preprocessor not fitted".to_string()))?;
        let text_columns = self.text_columns.as_ref().unwrap();
        let feature_columns = self.feature_columns.as_ref().unwrap();

        let features = build_features(table, rows, &self.config);
        let n_rows = rows.len();

        // Materialize each fitted output column, then assemble row-major.
        let mut encoded: HashMap<String, Vec<f64>> = HashMap::new();
        for (name, column) in &features {
            match column {
                FeatureColumn::Numeric(values) => {
                    encoded.insert(name.clone(), values.clone());
                }
                FeatureColumn::Categorical(values) => {
                    if text_columns.contains(name) {
                        let lens: Vec<f64> = values
                            .iter()
                            .map(|v| v.as_deref().map_or(0.0, |s| s.chars().count() as f64))
                            .collect();
                        let tokens: Vec<f64> = values
                            .iter()
                            .map(|v| {
                                v.as_deref()
                                    .map_or(0.0, |s| s.split_whitespace().count() as f64)
                            })
                            .collect();
                        encoded.insert(format!("{name}.len"), lens);
                        encoded.insert(format!("{name}.tokens"), tokens);
                    } else if let Some(vocab) = vocabulary.get(name) {
                        for value in vocab {
                            let indicator: Vec<f64> = values
                                .iter()
                                .map(|v| (v.as_deref() == Some(value.as_str())) as u8 as f64)
                                .collect();
                            encoded.insert(format!("{name}.{value}"), indicator);
                        }
                        let nan_indicator: Vec<f64> =
                            values.iter().map(|v| v.is_none() as u8 as f64).collect();
                        encoded.insert(format!("{name}.nan"), nan_indicator);
                    }
                }
            }
        }

        let mut matrix = Array2::zeros((n_rows, feature_columns.len()));
        for (j, name) in feature_columns.iter().enumerate() {
            if let Some(values) = encoded.get(name) {
                for (i, &v) in values.iter().enumerate() {
                    matrix[[i, j]] = v;
                }
            }
            // Columns absent from this partition stay zero.
        }
        Ok(matrix)
    }

    /// Fit on the rows and transform them in one step.
    pub fn fit_transform(&mut self, table: &MappedTable, rows: &[usize]) -> Result<Array2<f64>> {
        self.fit(table, rows)?;
        self.transform(table, rows)
    }
}

/// Build the engineered feature columns for the given rows.
fn build_features(
    table: &MappedTable,
    rows: &[usize],
    config: &PreprocessConfig,
) -> Vec<(String, FeatureColumn)> {
    let mut features: Vec<(String, FeatureColumn)> = Vec::new();

    // Base columns (time handled separately below).
    for (name, column) in &table.columns {
        if name == mapping::TIME {
            continue;
        }
        let selected = select_rows(column, rows);
        features.push((name.clone(), selected));
    }

    // Flow aggregates over this partition only.
    let flow = flow_features(table, rows);
    features.extend(flow);

    // Cyclical time-of-day encoding.
    if let Some(RawColumn::Numeric(times)) = table.column(mapping::TIME) {
        let tod: Vec<f64> = rows
            .iter()
            .map(|&r| times[r].map_or(0.0, |t| t.rem_euclid(DAY_SECONDS)))
            .collect();
        let sin: Vec<f64> = tod.iter().map(|&t| (2.0 * PI * t / DAY_SECONDS).sin()).collect();
        let cos: Vec<f64> = tod.iter().map(|&t| (2.0 * PI * t / DAY_SECONDS).cos()).collect();
        features.push(("time_sin".to_string(), FeatureColumn::Numeric(sin)));
        features.push(("time_cos".to_string(), FeatureColumn::Numeric(cos)));
    }

    // Frame-length bins.
    if let Some(pos) = features.iter().position(|(n, _)| n == mapping::FRAME_LEN) {
        if let FeatureColumn::Numeric(values) = &features[pos].1 {
            let binned = bin_values(values, &config.frame_len_bins);
            features.push((
                format!("{}.bin", mapping::FRAME_LEN),
                FeatureColumn::Categorical(binned),
            ));
            if !config.keep_numeric_frame_len {
                features.remove(pos);
            }
        }
    }

    // Port bins.
    let port_names: Vec<String> = features
        .iter()
        .filter(|(n, _)| n.ends_with("port"))
        .map(|(n, _)| n.clone())
        .collect();
    for name in port_names {
        let pos = features.iter().position(|(n, _)| *n == name).unwrap();
        if let FeatureColumn::Numeric(values) = &features[pos].1 {
            let binned = bin_values(values, &config.port_bins);
            features.push((format!("{name}.bin"), FeatureColumn::Categorical(binned)));
            if !config.keep_numeric_ports {
                features.remove(pos);
            }
        }
    }

    features
}

fn select_rows(column: &RawColumn, rows: &[usize]) -> FeatureColumn {
    match column {
        RawColumn::Numeric(values) => FeatureColumn::Numeric(
            rows.iter().map(|&r| values[r].unwrap_or(f64::NAN)).collect(),
        ),
        RawColumn::Text(values) => {
            FeatureColumn::Categorical(rows.iter().map(|&r| values[r].clone()).collect())
        }
    }
}

/// Assign each value to a half-open bucket label `(lo, hi]`. Missing and
/// out-of-range values land in the `unknown` bucket, never dropped.
fn bin_values(values: &[f64], edges: &[f64]) -> Vec<Option<String>> {
    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                return Some(UNKNOWN_BIN.to_string());
            }
            for w in edges.windows(2) {
                // include_lowest: the first bucket also takes v == lo
                let in_first = w[0] == edges[0] && (v - w[0]).abs() < f64::EPSILON;
                if (v > w[0] && v <= w[1]) || in_first {
                    return Some(format!("({}, {}]", w[0], w[1]));
                }
            }
            Some(UNKNOWN_BIN.to_string())
        })
        .collect()
}

/// Per-flow packet count, byte total, duration, and rate, computed over the
/// given rows only. A single-packet flow has duration 0 and rate equal to its
/// own byte count.
fn flow_features(table: &MappedTable, rows: &[usize]) -> Vec<(String, FeatureColumn)> {
    let key_columns: Vec<&RawColumn> = [
        mapping::SRC_IP,
        mapping::DST_IP,
        mapping::TCP_SRC_PORT,
        mapping::TCP_DST_PORT,
        mapping::PROTOCOL,
    ]
    .iter()
    .filter_map(|name| table.column(name))
    .collect();

    if key_columns.is_empty() {
        return Vec::new();
    }

    let times = match table.column(mapping::TIME) {
        Some(RawColumn::Numeric(t)) => Some(t),
        _ => None,
    };
    let lengths = match table.column(mapping::FRAME_LEN) {
        Some(RawColumn::Numeric(l)) => Some(l),
        _ => None,
    };

    // Group row positions by flow key.
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (pos, &r) in rows.iter().enumerate() {
        let key: String = key_columns
            .iter()
            .map(|col| match col {
                RawColumn::Numeric(v) => v[r].map_or("?".to_string(), |x| x.to_string()),
                RawColumn::Text(v) => v[r].clone().unwrap_or_else(|| "?".to_string()),
            })
            .collect::<Vec<_>>()
            .join("|");
        groups.entry(key).or_default().push(pos);
    }

    let n = rows.len();
    let mut packets = vec![0.0; n];
    let mut bytes = vec![0.0; n];
    let mut duration = vec![0.0; n];
    let mut rate = vec![0.0; n];

    for members in groups.values() {
        let count = members.len() as f64;

        let byte_total: f64 = match lengths {
            Some(lengths) => members
                .iter()
                .filter_map(|&pos| lengths[rows[pos]])
                .sum(),
            None => 0.0,
        };

        let dur = match times {
            Some(times) => {
                let present: Vec<f64> =
                    members.iter().filter_map(|&pos| times[rows[pos]]).collect();
                match (present.iter().cloned().reduce(f64::min), present.iter().cloned().reduce(f64::max)) {
                    (Some(lo), Some(hi)) => hi - lo,
                    _ => 0.0,
                }
            }
            None => 0.0,
        };

        let flow_rate = if dur > 0.0 { byte_total / dur } else { byte_total };

        for &pos in members {
            packets[pos] = count;
            bytes[pos] = byte_total;
            duration[pos] = dur;
            rate[pos] = flow_rate;
        }
    }

    vec![
        ("flow.packets".to_string(), FeatureColumn::Numeric(packets)),
        ("flow.bytes".to_string(), FeatureColumn::Numeric(bytes)),
        ("flow.duration".to_string(), FeatureColumn::Numeric(duration)),
        ("flow.rate".to_string(), FeatureColumn::Numeric(rate)),
    ]
}
