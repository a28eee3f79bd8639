//! Import SQL generation from files on disk.

use std::fs;

use anyhow::Result;
use tempfile::tempdir;

use pulse::seed::{self, SeedCommand, BOOTHS_SQL, ORGANIZATION_ID, WARDS_SQL};

fn args(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

#[test]
fn wards_csv_to_upsert_script() -> Result<()> {
    let dir = tempdir()?;
    let csv = dir.path().join("wards.csv");
    fs::write(
        &csv,
        "constituency_code,ward_name,ward_code,ward_number,population,voter_count,total_booths,urbanization,income_level,literacy_rate\n\
         TN-AC-016,St. Mary's Ward,CHN-W-042,42,18500,12100,14,urban,middle,88.5\n\
         TN-AC-016,Ward 43,CHN-W-043,,,,,,,\n",
    )?;
    let out = dir.path().join("out");
    let cmd = SeedCommand::parse(&args(&["--wards", csv.to_str().unwrap_or_default(), "--out", out.to_str().unwrap_or_default()]))?;
    let written = seed::run(&cmd)?;
    assert_eq!(written, vec![out.join(WARDS_SQL)]);

    let sql = fs::read_to_string(&written[0])?;
    assert!(sql.contains("INSERT INTO wards"));
    assert!(sql.contains("ON CONFLICT (organization_id, code) DO UPDATE SET"));
    assert!(sql.contains("'St. Mary''s Ward'"));
    assert!(sql.contains(ORGANIZATION_ID));
    assert!(sql.contains("-- Verify import"));
    // empty numeric cells: nullable columns become NULL, counters 0
    assert!(sql.contains("'CHN-W-043',\n    NULL,\n    NULL,\n    0,\n    0,"));
    Ok(())
}

#[test]
fn booths_csv_to_upsert_script() -> Result<()> {
    let dir = tempdir()?;
    let csv = dir.path().join("booths.csv");
    fs::write(
        &csv,
        "constituency_code,ward_code,booth_number,booth_name,address,latitude,longitude,total_voters,male_voters,female_voters,transgender_voters,accessible,parking_available,landmark\n\
         TN-AC-016,CHN-W-042,101,Govt School,\"1 Main Rd, Chennai\",13.08,80.27,1200,590,600,10,true,false,Near temple\n",
    )?;
    let cmd = SeedCommand::parse(&args(&["--booths", csv.to_str().unwrap_or_default(), "--out", dir.path().to_str().unwrap_or_default()]))?;
    let written = seed::run(&cmd)?;
    assert_eq!(written, vec![dir.path().join(BOOTHS_SQL)]);
    let sql = fs::read_to_string(&written[0])?;
    assert!(sql.contains("INSERT INTO polling_booths"));
    assert!(sql.contains("'1 Main Rd, Chennai'"));
    Ok(())
}

#[test]
fn constituencies_geojson_to_batches() -> Result<()> {
    let dir = tempdir()?;
    let geo = dir.path().join("tn.geojson");
    let features: Vec<serde_json::Value> = (1..=61)
        .map(|n| {
            serde_json::json!({
                "type": "Feature",
                "properties": {"AC_NO": n, "AC_NAME": if n == 2 { "Ponneri (SC)".to_string() } else { format!("AC {}", n) }, "DIST_NAME": "Tiruvallur"},
                "geometry": {"type": "Polygon", "coordinates": [[[80.1, 13.1], [80.2, 13.1], [80.2, 13.2], [80.1, 13.1]]]}
            })
        })
        .collect();
    fs::write(&geo, serde_json::json!({"type": "FeatureCollection", "features": features}).to_string())?;

    let out = dir.path().join("batches");
    let cmd = SeedCommand::parse(&args(&["--constituencies", geo.to_str().unwrap_or_default(), "--out", out.to_str().unwrap_or_default()]))?;
    let written = seed::run(&cmd)?;
    assert_eq!(written.len(), 2);
    let first = fs::read_to_string(&written[0])?;
    assert!(first.contains("BATCH 1/2"));
    assert!(first.contains("'Ponneri'"));
    assert!(first.contains("'sc'"));
    let second = fs::read_to_string(&written[1])?;
    assert!(second.contains("TN-AC-060"));
    assert!(second.contains("TN-AC-061"));
    Ok(())
}

#[test]
fn missing_input_is_an_error() {
    let cmd = SeedCommand::parse(&args(&["--wards", "/definitely/not/here.csv"])).unwrap();
    let err = seed::run(&cmd).unwrap_err();
    assert!(err.to_string().contains("here.csv"));
}
