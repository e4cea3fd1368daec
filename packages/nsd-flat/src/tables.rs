//! Trial-info and annotation tables.
//!
//! The trial-info table is the NSD "long" stim-info CSV: one row per
//! `(subject_index, global_trial_id)` taken from its first two columns, with
//! every further column kept as a loosely typed JSON value. Annotations are a
//! JSON-lines file with one object per stimulus.

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NsdFlatError, Result};

/// Column holding the stimulus id
pub const NSD_ID_FIELD: &str = "nsdId";

/// Field-name fragment marking per-repetition columns
pub const REPETITION_MARKER: &str = "_rep";

/// All fields of one trial-info row, index columns excluded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialInfo {
    pub fields: BTreeMap<String, Value>,
}

impl TrialInfo {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn nsd_id(&self) -> Result<u32> {
        let value = self.require(NSD_ID_FIELD)?;
        as_integer(value)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| NsdFlatError::Parse(format!("{} value {} is not a stimulus id", NSD_ID_FIELD, value)))
    }

    /// Boolean flag column; numbers count as true when non-zero.
    pub fn flag(&self, key: &str) -> Result<bool> {
        match self.require(key)? {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
            other => Err(NsdFlatError::Parse(format!(
                "trial field {} = {} is not a flag",
                key, other
            ))),
        }
    }

    /// Every field whose name contains `_rep`
    pub fn repetitions(&self) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| k.contains(REPETITION_MARKER))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn require(&self, key: &str) -> Result<&Value> {
        self.fields
            .get(key)
            .ok_or_else(|| NsdFlatError::Parse(format!("trial info has no {} field", key)))
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

/// Parse one CSV cell into the narrowest JSON value that holds it.
///
/// Integers, then floats, then booleans (`True`/`False` as pandas writes
/// them, or lowercase), then plain text. Empty cells become null.
pub fn parse_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
        return Value::Null;
    }
    match cell {
        "True" | "true" => Value::Bool(true),
        "False" | "false" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

/// Lookup of trial metadata by `(subject_index, global_trial_id)`
pub trait TrialInfoTable: Send + Sync {
    fn get(&self, subject_index: usize, trial_id: usize) -> Result<TrialInfo>;
}

/// Trial-info table loaded fully into memory from CSV
#[derive(Debug, Clone, Default)]
pub struct CsvTrialInfoTable {
    rows: HashMap<(usize, usize), TrialInfo>,
}

impl CsvTrialInfoTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| NsdFlatError::from_io_at(e, path))?;
        let table = Self::from_reader(file)?;
        log::info!("Loaded {} trial-info rows from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn from_reader<R: Read>(input: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);
        let headers = reader.headers()?.clone();
        if headers.len() < 3 {
            return Err(NsdFlatError::Parse(format!(
                "trial-info CSV has {} columns, expected two index columns and data",
                headers.len()
            )));
        }

        let mut rows = HashMap::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let subject = parse_index(record.get(0), line)?;
            let trial = parse_index(record.get(1), line)?;

            let fields = headers
                .iter()
                .zip(record.iter())
                .skip(2)
                .map(|(k, v)| (k.to_string(), parse_cell(v)))
                .collect();
            if rows.insert((subject, trial), TrialInfo { fields }).is_some() {
                return Err(NsdFlatError::Parse(format!(
                    "duplicate trial-info row for subject {} trial {}",
                    subject, trial
                )));
            }
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn parse_index(cell: Option<&str>, line: usize) -> Result<usize> {
    cell.map(str::trim)
        .and_then(|c| c.parse::<usize>().ok())
        .ok_or_else(|| {
            NsdFlatError::Parse(format!(
                "trial-info row {}: index column {:?} is not a non-negative integer",
                line + 1,
                cell
            ))
        })
}

impl TrialInfoTable for CsvTrialInfoTable {
    fn get(&self, subject_index: usize, trial_id: usize) -> Result<TrialInfo> {
        self.rows
            .get(&(subject_index, trial_id))
            .cloned()
            .ok_or_else(|| {
                NsdFlatError::NotFound(format!(
                    "trial info for subject {} trial {}",
                    subject_index, trial_id
                ))
            })
    }
}

/// COCO annotations of one stimulus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub nsd_id: u32,
    pub coco_split: String,
    pub coco_id: i64,
    #[serde(default)]
    pub objects: Value,
    #[serde(default)]
    pub captions: Vec<String>,
}

/// Lookup of annotations by NSD id
pub trait AnnotationTable: Send + Sync {
    fn get(&self, nsd_id: u32) -> Result<Annotation>;
}

#[derive(Debug, Clone, Default)]
pub struct JsonlAnnotationTable {
    entries: HashMap<u32, Annotation>,
}

impl JsonlAnnotationTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| NsdFlatError::from_io_at(e, path))?;
        let table = Self::from_reader(BufReader::new(file))?;
        log::info!("Loaded {} annotations from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn from_reader<R: BufRead>(input: R) -> Result<Self> {
        let mut entries = HashMap::new();
        for (index, line) in input.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let annotation: Annotation = serde_json::from_str(&line).map_err(|e| {
                NsdFlatError::Parse(format!("annotation line {}: {}", index + 1, e))
            })?;
            let nsd_id = annotation.nsd_id;
            if entries.insert(nsd_id, annotation).is_some() {
                return Err(NsdFlatError::Parse(format!(
                    "duplicate annotation for stimulus {}",
                    nsd_id
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AnnotationTable for JsonlAnnotationTable {
    fn get(&self, nsd_id: u32) -> Result<Annotation> {
        self.entries
            .get(&nsd_id)
            .cloned()
            .ok_or_else(|| NsdFlatError::NotFound(format!("annotation for stimulus {}", nsd_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CSV: &str = "\
subject,trial,nsdId,flagged,BOLD5000,shared1000,subject0_rep0,subject0_rep1,note
0,0,2950,False,False,True,1,,a
0,1,2990,True,1,False,2,3.5,
1,0,7,False,False,False,1,1,b
";

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("42"), json!(42));
        assert_eq!(parse_cell("-1.5"), json!(-1.5));
        assert_eq!(parse_cell("True"), json!(true));
        assert_eq!(parse_cell("false"), json!(false));
        assert_eq!(parse_cell(""), Value::Null);
        assert_eq!(parse_cell("train2017"), json!("train2017"));
    }

    #[test]
    fn test_csv_lookup() {
        let table = CsvTrialInfoTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);

        let info = TrialInfoTable::get(&table, 0, 1).unwrap();
        assert_eq!(info.nsd_id().unwrap(), 2990);
        assert!(info.flag("flagged").unwrap());
        assert!(info.flag("BOLD5000").unwrap());
        assert!(!info.flag("shared1000").unwrap());
        assert_eq!(info.get("note"), Some(&Value::Null));
    }

    #[test]
    fn test_repetitions_select_rep_columns() {
        let table = CsvTrialInfoTable::from_reader(CSV.as_bytes()).unwrap();
        let reps = TrialInfoTable::get(&table, 0, 0).unwrap().repetitions();
        assert_eq!(reps.len(), 2);
        assert_eq!(reps["subject0_rep0"], json!(1));
        assert_eq!(reps["subject0_rep1"], Value::Null);
    }

    #[test]
    fn test_missing_row_is_not_found() {
        let table = CsvTrialInfoTable::from_reader(CSV.as_bytes()).unwrap();
        assert!(matches!(
            TrialInfoTable::get(&table, 1, 5),
            Err(NsdFlatError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_row_rejected() {
        let csv = "s,t,nsdId\n0,0,1\n0,0,2\n";
        assert!(CsvTrialInfoTable::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_float_nsd_id() {
        let mut info = TrialInfo::default();
        info.fields.insert(NSD_ID_FIELD.to_string(), json!(12.0));
        assert_eq!(info.nsd_id().unwrap(), 12);
        info.fields.insert(NSD_ID_FIELD.to_string(), json!(-1));
        assert!(info.nsd_id().is_err());
    }

    #[test]
    fn test_annotations() {
        let jsonl = concat!(
            r#"{"nsd_id": 7, "coco_split": "train2017", "coco_id": 391895, "objects": {"category": ["person"]}, "captions": ["a man"]}"#,
            "\n\n",
            r#"{"nsd_id": 2950, "coco_split": "val2017", "coco_id": 1, "objects": [], "captions": []}"#,
            "\n"
        );
        let table = JsonlAnnotationTable::from_reader(jsonl.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);

        let ann = AnnotationTable::get(&table, 7).unwrap();
        assert_eq!(ann.coco_split, "train2017");
        assert_eq!(ann.captions, vec!["a man".to_string()]);
        assert_eq!(ann.objects["category"][0], "person");
        assert!(matches!(
            AnnotationTable::get(&table, 8),
            Err(NsdFlatError::NotFound(_))
        ));
    }
}
