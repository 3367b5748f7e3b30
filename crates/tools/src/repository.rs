use std::fs;
use std::path::{Path, PathBuf};

use odp_domain::filter::{build_encoded_filter, decode_filter, FilterError};
use rand::Rng;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TARGET_FP_RATE: f64 = 0.01;
/// 2^-16
pub const MIN_CHECK_FP_RATE: f64 = 1.0 / 65_536.0;
pub const MAX_CHECK_FP_RATE: f64 = 0.5;

/// Probes per expected false positive.
const PROBE_FACTOR: f64 = 1000.0;
/// Measured rate may exceed the target by this fraction of the target.
const MAX_RELATIVE_EXCESS: f64 = 0.05;

/// Plain list field and the filter field that replaces it.
const FILTERED_LISTS: [(&str, &str); 3] = [
    ("excludes", "excludeFilter"),
    ("keywords", "keywordFilter"),
    ("apps", "appFilter"),
];

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("repository has no `contents` array")]
    MissingContents,
    #[error("row {row}: `data` must be a string")]
    RowData { row: usize },
    #[error("row {row}: `{field}` must be an array of strings")]
    NotStrings { row: usize, field: &'static str },
    #[error("row {row}: {source}")]
    Filter { row: usize, source: FilterError },
    #[error("filtered repository has no row {row}")]
    MissingRow { row: usize },
    #[error("row {row}: filtered data has no `{field}`")]
    MissingFilter { row: usize, field: &'static str },
    #[error("row {row}: cuckoo filter `{field}` returned a false negative for '{value}'")]
    FalseNegative {
        row: usize,
        field: &'static str,
        value: String,
    },
    #[error("row {row}: measured false positives of `{field}` too large, relative difference of {relative}")]
    FalsePositiveExcess {
        row: usize,
        field: &'static str,
        relative: f64,
    },
    #[error("target false positive rate {0} must lie within [2^-16, 0.5]")]
    RateOutOfRange(f64),
}

/// Outcome of checking one filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    pub row: usize,
    pub field: &'static str,
    pub values: usize,
    pub measured_fp_rate: f64,
}

pub fn read_repository(path: &Path) -> Result<Value, ToolError> {
    let raw = fs::read_to_string(path).map_err(|source| ToolError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ToolError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn check_rate(target_fp_rate: f64) -> Result<f64, ToolError> {
    if (MIN_CHECK_FP_RATE..=MAX_CHECK_FP_RATE).contains(&target_fp_rate) {
        Ok(target_fp_rate)
    } else {
        Err(ToolError::RateOutOfRange(target_fp_rate))
    }
}

/// Replaces every targeting list in the repository by its base64 filter and
/// returns how many filters were built. Rows whose `data` is not a JSON
/// object are left alone.
pub fn make_filters(repository: &mut Value, target_fp_rate: f64) -> Result<usize, ToolError> {
    let rows = repository
        .get_mut("contents")
        .and_then(Value::as_array_mut)
        .ok_or(ToolError::MissingContents)?;

    let mut built = 0;
    for (row, entry) in rows.iter_mut().enumerate() {
        let Some(mut data) = row_object(entry, row)? else {
            continue;
        };
        for (list_field, filter_field) in FILTERED_LISTS {
            let Some(list) = data.remove(list_field) else {
                continue;
            };
            let values = string_values(&list, row, list_field)?;
            let encoded = build_encoded_filter(&values, target_fp_rate)
                .map_err(|source| ToolError::Filter { row, source })?;
            debug!(row, field = filter_field, values = values.len(), "filter built");
            data.insert(filter_field.to_string(), Value::String(encoded));
            built += 1;
        }
        entry["data"] = Value::String(Value::Object(data).to_string());
    }
    Ok(built)
}

/// Verifies each filter of `filtered` against the lists in `source`, pairing
/// rows by index. A single false negative fails the check, as does a
/// measured false positive rate noticeably above `target_fp_rate`.
pub fn check_filters<R: Rng>(
    source: &Value,
    filtered: &Value,
    target_fp_rate: f64,
    rng: &mut R,
) -> Result<Vec<FilterReport>, ToolError> {
    let target_fp_rate = check_rate(target_fp_rate)?;
    let source_rows = contents(source)?;
    let filtered_rows = contents(filtered)?;

    let mut reports = Vec::new();
    for (row, entry) in source_rows.iter().enumerate() {
        let Some(data) = row_object(entry, row)? else {
            continue;
        };
        let filtered_entry = filtered_rows.get(row).ok_or(ToolError::MissingRow { row })?;
        let Some(filtered_data) = row_object(filtered_entry, row)? else {
            continue;
        };

        for (list_field, filter_field) in FILTERED_LISTS {
            let Some(list) = data.get(list_field) else {
                continue;
            };
            let values = string_values(list, row, list_field)?;
            let encoded = filtered_data
                .get(filter_field)
                .and_then(Value::as_str)
                .ok_or(ToolError::MissingFilter {
                    row,
                    field: filter_field,
                })?;
            let cuckoo =
                decode_filter(encoded).map_err(|source| ToolError::Filter { row, source })?;

            if let Some(missing) = values.iter().find(|value| !cuckoo.contains(value.as_str())) {
                return Err(ToolError::FalseNegative {
                    row,
                    field: filter_field,
                    value: missing.clone(),
                });
            }

            let probes = (PROBE_FACTOR / target_fp_rate) as u64;
            let hits = (0..probes)
                .filter(|_| cuckoo.contains(&rng.gen::<i64>().to_string()))
                .count();
            let measured_fp_rate = hits as f64 / probes as f64;
            let relative = (measured_fp_rate - target_fp_rate) / target_fp_rate;
            if relative > MAX_RELATIVE_EXCESS {
                return Err(ToolError::FalsePositiveExcess {
                    row,
                    field: filter_field,
                    relative,
                });
            }
            reports.push(FilterReport {
                row,
                field: filter_field,
                values: values.len(),
                measured_fp_rate,
            });
        }
    }
    Ok(reports)
}

fn contents(repository: &Value) -> Result<&Vec<Value>, ToolError> {
    repository
        .get("contents")
        .and_then(Value::as_array)
        .ok_or(ToolError::MissingContents)
}

/// Parses the row's `data` string when it holds a JSON object.
fn row_object(entry: &Value, row: usize) -> Result<Option<Map<String, Value>>, ToolError> {
    let data = entry
        .get("data")
        .and_then(Value::as_str)
        .ok_or(ToolError::RowData { row })?;
    if !data.starts_with('{') {
        return Ok(None);
    }
    match serde_json::from_str(data) {
        Ok(Value::Object(object)) => Ok(Some(object)),
        _ => Err(ToolError::RowData { row }),
    }
}

fn string_values(list: &Value, row: usize, field: &'static str) -> Result<Vec<String>, ToolError> {
    list.as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or(ToolError::NotStrings { row, field })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;

    fn repository() -> Value {
        json!({"contents": [
            {"key": "ad1", "data": json!({
                "max_cpc": 1.5,
                "keywords": ["shoes", "boots"],
                "apps": ["com.example.odptargetingapp1"],
                "excludes": ["com.example.odptargetingapp2"],
            }).to_string()},
            {"key": "template1", "data": "<div>{{adText}}</div>"},
        ]})
    }

    fn data_of(repository: &Value, row: usize) -> Map<String, Value> {
        row_object(&repository["contents"][row], row).unwrap().unwrap()
    }

    #[test]
    fn make_swaps_lists_for_filters() {
        let mut filtered = repository();
        assert_eq!(make_filters(&mut filtered, DEFAULT_TARGET_FP_RATE).unwrap(), 3);

        let data = data_of(&filtered, 0);
        for (list_field, filter_field) in FILTERED_LISTS {
            assert!(!data.contains_key(list_field));
            assert!(data[filter_field].is_string());
        }
        assert_eq!(data["max_cpc"], json!(1.5));
        let keywords = decode_filter(data["keywordFilter"].as_str().unwrap()).unwrap();
        assert!(keywords.contains("shoes") && keywords.contains("boots"));
        assert_eq!(filtered["contents"][1], repository()["contents"][1]);
    }

    #[test]
    fn check_accepts_freshly_made_filters() {
        let source = repository();
        let mut filtered = source.clone();
        make_filters(&mut filtered, 0.05).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let reports = check_filters(&source, &filtered, 0.05, &mut rng).unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|report| report.row == 0));
        assert!(reports
            .iter()
            .all(|report| report.measured_fp_rate <= 0.05 * (1.0 + MAX_RELATIVE_EXCESS)));
    }

    #[test]
    fn check_reports_false_negatives() {
        let source = repository();
        let mut other = json!({"contents": [
            {"key": "ad1", "data": json!({
                "keywords": ["hats"],
                "apps": ["com.example.odptargetingapp1"],
                "excludes": ["com.example.odptargetingapp2"],
            }).to_string()},
        ]});
        make_filters(&mut other, DEFAULT_TARGET_FP_RATE).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let err = check_filters(&source, &other, DEFAULT_TARGET_FP_RATE, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            ToolError::FalseNegative {
                row: 0,
                field: "keywordFilter",
                ..
            }
        ));
    }

    #[test]
    fn check_requires_every_filter() {
        let source = repository();
        let mut rng = StdRng::seed_from_u64(1);
        let err = check_filters(&source, &source, DEFAULT_TARGET_FP_RATE, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            ToolError::MissingFilter {
                field: "excludeFilter",
                ..
            }
        ));
    }

    #[test]
    fn rate_bounds_are_enforced() {
        assert!(check_rate(0.5).is_ok());
        assert!(check_rate(MIN_CHECK_FP_RATE).is_ok());
        assert!(matches!(check_rate(0.6), Err(ToolError::RateOutOfRange(_))));
        assert!(matches!(
            check_rate(MIN_CHECK_FP_RATE / 2.0),
            Err(ToolError::RateOutOfRange(_))
        ));
    }

    #[test]
    fn non_string_lists_are_rejected() {
        let mut repository = json!({"contents": [
            {"key": "ad1", "data": json!({"keywords": [1, 2]}).to_string()},
        ]});
        assert!(matches!(
            make_filters(&mut repository, DEFAULT_TARGET_FP_RATE),
            Err(ToolError::NotStrings {
                row: 0,
                field: "keywords"
            })
        ));
    }
}
