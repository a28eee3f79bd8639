use std::path::Path;

use serde::Deserialize;

use super::{banner, decimal_or_null, ensure_organization, int_or_null, int_or_zero, quote, quote_or_null, read_csv, SeedError, ORGANIZATION_ID};

/// One row of the wards export. Only the name, code and constituency are required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WardRow {
    pub constituency_code: String,
    pub ward_name: String,
    pub ward_code: String,
    #[serde(default)]
    pub ward_number: Option<String>,
    #[serde(default)]
    pub population: Option<String>,
    #[serde(default)]
    pub voter_count: Option<String>,
    #[serde(default)]
    pub total_booths: Option<String>,
    #[serde(default)]
    pub urbanization: Option<String>,
    #[serde(default)]
    pub income_level: Option<String>,
    #[serde(default)]
    pub literacy_rate: Option<String>,
}

pub fn read_wards(path: &Path) -> Result<Vec<WardRow>, SeedError> { read_csv(path) }

fn constituency_lookup(code: &str) -> String {
    format!(
        "(SELECT id FROM constituencies WHERE code = {} AND organization_id = {} LIMIT 1)",
        quote(code),
        quote(ORGANIZATION_ID)
    )
}

fn ward_values(w: &WardRow) -> String {
    let cols = [
        format!("{}::uuid", quote(ORGANIZATION_ID)),
        constituency_lookup(&w.constituency_code),
        quote(&w.ward_name),
        quote(&w.ward_code),
        int_or_null(w.ward_number.as_deref()),
        int_or_null(w.population.as_deref()),
        int_or_zero(w.voter_count.as_deref()),
        int_or_zero(w.total_booths.as_deref()),
        quote_or_null(w.urbanization.as_deref()),
        quote_or_null(w.income_level.as_deref()),
        decimal_or_null(w.literacy_rate.as_deref()),
    ];
    format!("  (\n    {}\n  )", cols.join(",\n    "))
}

/// Upsert keyed on `(organization_id, code)`.
pub fn wards_sql(rows: &[WardRow]) -> String {
    let mut sql = banner("WARDS IMPORT", &format!("Total wards: {}", rows.len()));
    sql.push_str(&ensure_organization());
    if !rows.is_empty() {
        sql.push_str(
            "\n-- Import wards (constituency resolved by code)\n\
             INSERT INTO wards (\n  organization_id,\n  constituency_id,\n  name,\n  code,\n  ward_number,\n  population,\n  voter_count,\n  total_booths,\n  urbanization,\n  income_level,\n  literacy_rate\n) VALUES\n",
        );
        sql.push_str(&rows.iter().map(ward_values).collect::<Vec<_>>().join(",\n"));
        sql.push_str(
            "\nON CONFLICT (organization_id, code) DO UPDATE SET\n  name = EXCLUDED.name,\n  ward_number = EXCLUDED.ward_number,\n  population = EXCLUDED.population,\n  voter_count = EXCLUDED.voter_count,\n  total_booths = EXCLUDED.total_booths,\n  urbanization = EXCLUDED.urbanization,\n  income_level = EXCLUDED.income_level,\n  literacy_rate = EXCLUDED.literacy_rate,\n  updated_at = NOW();\n",
        );
    }
    sql.push_str(&format!(
        "\n-- Verify import\nSELECT\n  'Wards Import' as type,\n  COUNT(*) as total_imported,\n  COUNT(DISTINCT constituency_id) as constituencies_covered\nFROM wards\nWHERE organization_id = {org};\n\n\
         -- Breakdown by constituency\nSELECT\n  c.code as constituency_code,\n  c.name as constituency_name,\n  COUNT(w.id) as ward_count,\n  SUM(w.total_booths) as total_booths\nFROM constituencies c\nLEFT JOIN wards w ON w.constituency_id = c.id\nWHERE c.organization_id = {org}\nGROUP BY c.id, c.code, c.name\nHAVING COUNT(w.id) > 0\nORDER BY c.code;\n",
        org = quote(ORGANIZATION_ID)
    ));
    sql
}
