use std::path::Path;

use serde::Deserialize;

use super::{banner, decimal_or_null, ensure_organization, flag, int_or_zero, quote, read_csv, SeedError, ORGANIZATION_ID};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoothRow {
    pub constituency_code: String,
    #[serde(default)]
    pub ward_code: Option<String>,
    pub booth_number: String,
    pub booth_name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub total_voters: Option<String>,
    #[serde(default)]
    pub male_voters: Option<String>,
    #[serde(default)]
    pub female_voters: Option<String>,
    #[serde(default)]
    pub transgender_voters: Option<String>,
    #[serde(default)]
    pub accessible: Option<String>,
    #[serde(default)]
    pub parking_available: Option<String>,
    #[serde(default)]
    pub landmark: Option<String>,
}

pub fn read_booths(path: &Path) -> Result<Vec<BoothRow>, SeedError> { read_csv(path) }

fn lookup(table: &str, code: &str) -> String {
    format!("(SELECT id FROM {} WHERE code = {} AND organization_id = {} LIMIT 1)", table, quote(code), quote(ORGANIZATION_ID))
}

fn booth_values(b: &BoothRow) -> String {
    let ward = match b.ward_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => lookup("wards", code),
        None => "NULL".to_string(),
    };
    let cols = [
        format!("{}::uuid", quote(ORGANIZATION_ID)),
        lookup("constituencies", &b.constituency_code),
        ward,
        quote(&b.booth_number),
        quote(&b.booth_name),
        quote(b.address.as_deref().unwrap_or("")),
        decimal_or_null(b.latitude.as_deref()),
        decimal_or_null(b.longitude.as_deref()),
        int_or_zero(b.total_voters.as_deref()),
        int_or_zero(b.male_voters.as_deref()),
        int_or_zero(b.female_voters.as_deref()),
        int_or_zero(b.transgender_voters.as_deref()),
        flag(b.accessible.as_deref()).to_string(),
        flag(b.parking_available.as_deref()).to_string(),
        quote(b.landmark.as_deref().unwrap_or("")),
    ];
    format!("  (\n    {}\n  )", cols.join(",\n    "))
}

/// Upsert keyed on `(organization_id, constituency_id, booth_number)`.
pub fn booths_sql(rows: &[BoothRow]) -> String {
    let mut sql = banner("POLLING BOOTHS IMPORT", &format!("Total booths: {}", rows.len()));
    sql.push_str(&ensure_organization());
    if !rows.is_empty() {
        sql.push_str(
            "\n-- Import polling booths (constituency and ward resolved by code)\n\
             INSERT INTO polling_booths (\n  organization_id,\n  constituency_id,\n  ward_id,\n  booth_number,\n  name,\n  address,\n  latitude,\n  longitude,\n  total_voters,\n  male_voters,\n  female_voters,\n  transgender_voters,\n  accessible,\n  parking_available,\n  landmark\n) VALUES\n",
        );
        sql.push_str(&rows.iter().map(booth_values).collect::<Vec<_>>().join(",\n"));
        sql.push_str(
            "\nON CONFLICT (organization_id, constituency_id, booth_number) DO UPDATE SET\n  name = EXCLUDED.name,\n  address = EXCLUDED.address,\n  latitude = EXCLUDED.latitude,\n  longitude = EXCLUDED.longitude,\n  total_voters = EXCLUDED.total_voters,\n  male_voters = EXCLUDED.male_voters,\n  female_voters = EXCLUDED.female_voters,\n  transgender_voters = EXCLUDED.transgender_voters,\n  accessible = EXCLUDED.accessible,\n  parking_available = EXCLUDED.parking_available,\n  landmark = EXCLUDED.landmark,\n  updated_at = NOW();\n",
        );
    }
    sql.push_str(&format!(
        "\n-- Verify import\nSELECT\n  'Booths Import' as type,\n  COUNT(*) as total_imported,\n  COUNT(DISTINCT constituency_id) as constituencies_covered,\n  COUNT(DISTINCT ward_id) as wards_covered,\n  SUM(total_voters) as total_voters\nFROM polling_booths\nWHERE organization_id = {org};\n\n\
         -- Breakdown by constituency\nSELECT\n  c.code as constituency_code,\n  c.name as constituency_name,\n  COUNT(pb.id) as booth_count,\n  SUM(pb.total_voters) as total_voters,\n  SUM(pb.male_voters) as male_voters,\n  SUM(pb.female_voters) as female_voters\nFROM constituencies c\nLEFT JOIN polling_booths pb ON pb.constituency_id = c.id\nWHERE c.organization_id = {org}\nGROUP BY c.id, c.code, c.name\nHAVING COUNT(pb.id) > 0\nORDER BY c.code;\n",
        org = quote(ORGANIZATION_ID)
    ));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ward: Option<&str>, accessible: &str) -> BoothRow {
        BoothRow {
            constituency_code: "TN-AC-012".into(),
            ward_code: ward.map(str::to_string),
            booth_number: "101".into(),
            booth_name: "Govt. Higher Sec. School".into(),
            address: None,
            latitude: Some("13.0827".into()),
            longitude: Some("east".into()),
            total_voters: Some("1200".into()),
            male_voters: None,
            female_voters: Some("610".into()),
            transgender_voters: None,
            accessible: Some(accessible.into()),
            parking_available: Some("no".into()),
            landmark: Some("Near Murugan Kovil".into()),
        }
    }

    #[test]
    fn ward_lookup_and_flags() {
        let sql = booths_sql(&[row(Some("W-7"), "1"), row(None, "false")]);
        assert!(sql.contains("(SELECT id FROM wards WHERE code = 'W-7'"));
        assert!(sql.contains("(SELECT id FROM constituencies WHERE code = 'TN-AC-012'"));
        assert!(sql.contains("13.0827,\n    NULL,\n    1200,\n    0,\n    610,\n    0,\n    true,\n    false,"));
        assert!(sql.contains("NULL,\n    '101'"));
        assert!(sql.contains("ON CONFLICT (organization_id, constituency_id, booth_number) DO UPDATE SET"));
        assert!(sql.contains("'Booths Import' as type"));
    }
}
