use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{banner, ensure_organization, quote, read_input, SeedError, ORGANIZATION_ID};

/// Constituencies per batch file; 234 assembly constituencies give 59/59/59/57.
pub const BATCH_SIZE: usize = 59;

const ELECTION_YEAR: u16 = 2021;

static RESERVED_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\((SC|ST)\)\s*$").expect("static regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct ConstituencyRow {
    pub number: u32,
    pub name: String,
    pub district: String,
    /// `sc`, `st` or `general`.
    pub reserved_category: String,
    pub boundaries: Value,
}

impl ConstituencyRow {
    pub fn code(&self) -> String { format!("TN-AC-{:03}", self.number) }
}

pub fn batch_file_name(batch: usize) -> String { format!("20251109140000_tn_batch{}_insert_tn_constituencies.sql", batch) }

fn prop<'a>(props: &'a Value, upper: &str, lower: &str) -> Option<&'a Value> {
    props.get(upper).or_else(|| props.get(lower)).filter(|v| !v.is_null())
}

/// Split a display name into the stored name and its reservation category.
pub(crate) fn split_reserved(raw: &str) -> (String, String) {
    let raw = raw.trim();
    match RESERVED_SUFFIX.captures(raw) {
        Some(c) => {
            let category = c.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_else(|| "general".into());
            (RESERVED_SUFFIX.replace(raw, "").trim().to_string(), category)
        }
        None => (raw.to_string(), "general".to_string()),
    }
}

/// Read features in file order. A feature without an assembly number takes its
/// 1-based position.
pub fn read_constituencies(path: &Path) -> Result<Vec<ConstituencyRow>, SeedError> {
    let text = read_input(path)?;
    let bad = |message: String| SeedError::GeoJson { path: path.to_path_buf(), message };
    let doc: Value = serde_json::from_str(&text).map_err(|e| bad(e.to_string()))?;
    let features = doc.get("features").and_then(|f| f.as_array()).ok_or_else(|| bad("missing features array".into()))?;

    let mut rows = Vec::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        let props = feature.get("properties").cloned().unwrap_or(Value::Null);
        let number = match prop(&props, "AC_NO", "ac_no") {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(i as u32 + 1);
        let raw_name = prop(&props, "AC_NAME", "ac_name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Constituency {}", number));
        let (name, reserved_category) = split_reserved(&raw_name);
        let district = prop(&props, "DIST_NAME", "dist_name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        rows.push(ConstituencyRow {
            number,
            name,
            district,
            reserved_category,
            boundaries: feature.get("geometry").cloned().unwrap_or(Value::Null),
        });
    }
    Ok(rows)
}

fn row_values(r: &ConstituencyRow) -> String {
    let cols = [
        quote(ORGANIZATION_ID),
        quote(&r.name),
        quote(&r.code()),
        "'assembly'".to_string(),
        "'Tamil Nadu'".to_string(),
        quote(&r.district),
        "NULL".to_string(),
        "0".to_string(),
        "0".to_string(),
        "NULL".to_string(),
        quote(&r.reserved_category),
        ELECTION_YEAR.to_string(),
        "NULL".to_string(),
        "NULL".to_string(),
        format!("{}::jsonb", quote(&r.boundaries.to_string())),
    ];
    format!("  (\n    {}\n  )", cols.join(",\n    "))
}

/// `(batch number, sql)` pairs, numbered from 1.
pub fn constituency_batches(rows: &[ConstituencyRow]) -> Vec<(usize, String)> {
    let total_batches = rows.len().div_ceil(BATCH_SIZE);
    rows.chunks(BATCH_SIZE)
        .enumerate()
        .map(|(i, batch)| {
            let n = i + 1;
            let first = batch.iter().map(|r| r.number).min().unwrap_or(0);
            let last = batch.iter().map(|r| r.number).max().unwrap_or(0);
            let mut sql = banner(
                &format!("BATCH {}/{}: Tamil Nadu constituencies ({} constituencies)", n, total_batches, batch.len()),
                &format!("This batch: TN-AC-{:03} to TN-AC-{:03} of {} total", first, last, rows.len()),
            );
            sql.push_str(&ensure_organization());
            sql.push_str(&format!(
                "\n-- Insert batch {}\nINSERT INTO constituencies (\n  organization_id,\n  name,\n  code,\n  type,\n  state,\n  district,\n  population,\n  voter_count,\n  total_booths,\n  area_sq_km,\n  reserved_category,\n  last_election_year,\n  current_representative,\n  current_party,\n  boundaries\n) VALUES\n",
                n
            ));
            sql.push_str(&batch.iter().map(row_values).collect::<Vec<_>>().join(",\n"));
            sql.push_str(&format!(
                "\nON CONFLICT (organization_id, code) DO UPDATE SET\n  name = EXCLUDED.name,\n  district = EXCLUDED.district,\n  boundaries = EXCLUDED.boundaries,\n  reserved_category = EXCLUDED.reserved_category;\n\n\
                 -- Verify batch {n}\nSELECT\n  'Batch {n}' as batch,\n  COUNT(*) as inserted,\n  COUNT(*) FILTER (WHERE reserved_category = 'sc') as sc,\n  COUNT(*) FILTER (WHERE reserved_category = 'st') as st,\n  COUNT(*) FILTER (WHERE reserved_category = 'general') as general\nFROM constituencies\nWHERE organization_id = {org}\n  AND code LIKE 'TN-AC-%'\n  AND code >= 'TN-AC-{first:03}'\n  AND code <= 'TN-AC-{last:03}';\n",
                n = n,
                org = quote(ORGANIZATION_ID),
                first = first,
                last = last,
            ));
            (n, sql)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_category_from_suffix() {
        assert_eq!(split_reserved("Ponneri (SC)"), ("Ponneri".to_string(), "sc".to_string()));
        assert_eq!(split_reserved("Gudalur (st) "), ("Gudalur".to_string(), "st".to_string()));
        assert_eq!(split_reserved("Chepauk-Thiruvallikeni"), ("Chepauk-Thiruvallikeni".to_string(), "general".to_string()));
        assert_eq!(split_reserved("(SC) Nagar"), ("(SC) Nagar".to_string(), "general".to_string()));
    }

    fn features(n: usize) -> Value {
        let fs: Vec<Value> = (1..=n)
            .map(|i| {
                serde_json::json!({
                    "type": "Feature",
                    "properties": {"AC_NO": i, "AC_NAME": if i == 2 { "Ponneri (SC)".to_string() } else { format!("AC {}", i) }, "DIST_NAME": "Tiruvallur"},
                    "geometry": {"type": "Polygon", "coordinates": [[[80.1, 13.3], [80.2, 13.3], [80.2, 13.4]]]}
                })
            })
            .collect();
        serde_json::json!({"type": "FeatureCollection", "features": fs})
    }

    #[test]
    fn batches_of_fifty_nine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tn.json");
        std::fs::write(&path, features(234).to_string()).unwrap();
        let rows = read_constituencies(&path).unwrap();
        assert_eq!(rows.len(), 234);
        assert_eq!(rows[1].code(), "TN-AC-002");
        assert_eq!(rows[1].reserved_category, "sc");

        let batches = constituency_batches(&rows);
        assert_eq!(batches.len(), 4);
        let sizes: Vec<usize> = batches.iter().map(|(_, sql)| sql.matches("'assembly'").count()).collect();
        assert_eq!(sizes, vec![59, 59, 59, 57]);
        assert!(batches[3].1.contains("AND code >= 'TN-AC-178'"));
        assert!(batches[3].1.contains("AND code <= 'TN-AC-234'"));
        assert!(batches[0].1.contains("'Ponneri',\n    'TN-AC-002'"));
        assert!(batches[0].1.contains("ON CONFLICT (organization_id, code) DO UPDATE SET"));
        assert_eq!(batch_file_name(3), "20251109140000_tn_batch3_insert_tn_constituencies.sql");
    }

    #[test]
    fn missing_properties_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(&path, r#"{"features":[{"properties":{},"geometry":null}]}"#).unwrap();
        let rows = read_constituencies(&path).unwrap();
        assert_eq!(rows[0].name, "Constituency 1");
        assert_eq!(rows[0].district, "Unknown");

        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(read_constituencies(&path), Err(SeedError::GeoJson { .. })));
    }

    #[test]
    fn oversized_number_takes_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(
            &path,
            r#"{"features":[{"properties":{"AC_NO":7,"AC_NAME":"A"}},{"properties":{"AC_NO":4294967298,"AC_NAME":"B"}}]}"#,
        )
        .unwrap();
        let rows = read_constituencies(&path).unwrap();
        assert_eq!(rows[0].code(), "TN-AC-007");
        assert_eq!(rows[1].code(), "TN-AC-002");
    }
}
