//!
//! pulse seed generator
//! --------------------
//! Turns the ward/booth CSV exports and the constituency GeoJSON into SQL
//! scripts for the BaaS SQL editor. Every script first ensures the owning
//! organization exists, then upserts on the table's natural key so re-running
//! it is harmless, and ends with verification queries.
//!
//! Output is a pure function of the input: no timestamps, stable ordering.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

mod booths;
mod constituencies;
mod wards;

pub use booths::{booths_sql, read_booths, BoothRow};
pub use constituencies::{batch_file_name, constituency_batches, read_constituencies, ConstituencyRow, BATCH_SIZE};
pub use wards::{read_wards, wards_sql, WardRow};

pub const ORGANIZATION_ID: &str = "11111111-1111-1111-1111-111111111111";

pub const DEFAULT_WARDS_CSV: &str = "csv_data/wards.csv";
pub const DEFAULT_BOOTHS_CSV: &str = "csv_data/booths.csv";
pub const DEFAULT_BATCH_DIR: &str = "supabase/migrations/batches";
pub const WARDS_SQL: &str = "import_wards.sql";
pub const BOOTHS_SQL: &str = "import_booths.sql";

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("file not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid CSV in {}: {source}", path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("invalid GeoJSON in {}: {message}", path.display())]
    GeoJson { path: PathBuf, message: String },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: std::io::Error },
    #[error("{0}")]
    Usage(String),
}

/// One invocation of the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedCommand {
    Help,
    Wards { csv: PathBuf, out_dir: PathBuf },
    Booths { csv: PathBuf, out_dir: PathBuf },
    All { out_dir: PathBuf },
    Constituencies { geojson: PathBuf, out_dir: PathBuf },
}

impl SeedCommand {
    /// Parse arguments (without the program name).
    pub fn parse(args: &[String]) -> Result<Self, SeedError> {
        let Some(mode) = args.first() else { return Ok(SeedCommand::Help); };
        let mut positional: Option<PathBuf> = None;
        let mut out_dir: Option<PathBuf> = None;
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--out" => {
                    let dir = args.get(i + 1).ok_or_else(|| SeedError::Usage("--out needs a directory".into()))?;
                    out_dir = Some(PathBuf::from(dir));
                    i += 2;
                }
                other if other.starts_with("--") => return Err(SeedError::Usage(format!("unknown option: {}", other))),
                other => {
                    positional = Some(PathBuf::from(other));
                    i += 1;
                }
            }
        }
        match mode.as_str() {
            "-h" | "--help" => Ok(SeedCommand::Help),
            "--wards" => Ok(SeedCommand::Wards {
                csv: positional.unwrap_or_else(|| PathBuf::from(DEFAULT_WARDS_CSV)),
                out_dir: out_dir.unwrap_or_else(|| PathBuf::from(".")),
            }),
            "--booths" => Ok(SeedCommand::Booths {
                csv: positional.unwrap_or_else(|| PathBuf::from(DEFAULT_BOOTHS_CSV)),
                out_dir: out_dir.unwrap_or_else(|| PathBuf::from(".")),
            }),
            "--all" => Ok(SeedCommand::All { out_dir: out_dir.unwrap_or_else(|| PathBuf::from(".")) }),
            "--constituencies" => Ok(SeedCommand::Constituencies {
                geojson: positional.ok_or_else(|| SeedError::Usage("--constituencies needs a GeoJSON file".into()))?,
                out_dir: out_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_BATCH_DIR)),
            }),
            other => Err(SeedError::Usage(format!("Unknown mode: {} (use --wards, --booths, --all or --constituencies)", other))),
        }
    }
}

pub fn usage() -> &'static str {
    "pulse_seed - CSV/GeoJSON to SQL import generator\n\
     \n\
     Usage:\n\
       pulse_seed --wards [csv] [--out dir]        wards CSV -> import_wards.sql\n\
       pulse_seed --booths [csv] [--out dir]       booths CSV -> import_booths.sql\n\
       pulse_seed --all [--out dir]                both, from csv_data/wards.csv and csv_data/booths.csv\n\
       pulse_seed --constituencies <geojson> [--out dir]\n\
                                                   constituency batches (default dir supabase/migrations/batches)\n"
}

/// Execute a command, returning the files written.
pub fn run(cmd: &SeedCommand) -> Result<Vec<PathBuf>, SeedError> {
    match cmd {
        SeedCommand::Help => Ok(Vec::new()),
        SeedCommand::Wards { csv, out_dir } => Ok(vec![generate_wards(csv, out_dir)?]),
        SeedCommand::Booths { csv, out_dir } => Ok(vec![generate_booths(csv, out_dir)?]),
        SeedCommand::All { out_dir } => {
            // Missing inputs are skipped in this mode.
            let mut written = Vec::new();
            if Path::new(DEFAULT_WARDS_CSV).exists() {
                written.push(generate_wards(Path::new(DEFAULT_WARDS_CSV), out_dir)?);
            }
            if Path::new(DEFAULT_BOOTHS_CSV).exists() {
                written.push(generate_booths(Path::new(DEFAULT_BOOTHS_CSV), out_dir)?);
            }
            Ok(written)
        }
        SeedCommand::Constituencies { geojson, out_dir } => generate_constituencies(geojson, out_dir),
    }
}

pub fn generate_wards(csv: &Path, out_dir: &Path) -> Result<PathBuf, SeedError> {
    let rows = read_wards(csv)?;
    info!(target: "pulse::seed", "{}: {} wards", csv.display(), rows.len());
    write_file(&out_dir.join(WARDS_SQL), &wards_sql(&rows))
}

pub fn generate_booths(csv: &Path, out_dir: &Path) -> Result<PathBuf, SeedError> {
    let rows = read_booths(csv)?;
    info!(target: "pulse::seed", "{}: {} booths", csv.display(), rows.len());
    write_file(&out_dir.join(BOOTHS_SQL), &booths_sql(&rows))
}

pub fn generate_constituencies(geojson: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, SeedError> {
    let rows = read_constituencies(geojson)?;
    info!(target: "pulse::seed", "{}: {} constituencies", geojson.display(), rows.len());
    constituency_batches(&rows)
        .into_iter()
        .map(|(n, sql)| write_file(&out_dir.join(batch_file_name(n)), &sql))
        .collect()
}

fn write_file(path: &Path, sql: &str) -> Result<PathBuf, SeedError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| SeedError::Write { path: dir.to_path_buf(), source })?;
    }
    std::fs::write(path, sql).map_err(|source| SeedError::Write { path: path.to_path_buf(), source })?;
    info!(target: "pulse::seed", "wrote {} ({:.2} KB)", path.display(), sql.len() as f64 / 1024.0);
    Ok(path.to_path_buf())
}

pub(crate) fn read_input(path: &Path) -> Result<String, SeedError> {
    if !path.exists() {
        return Err(SeedError::MissingInput(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| SeedError::Read { path: path.to_path_buf(), source })
}

pub(crate) fn read_csv<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, SeedError> {
    let text = read_input(path)?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).flexible(true).from_reader(text.as_bytes());
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| SeedError::Csv { path: path.to_path_buf(), source })
}

// --- SQL literal helpers ------------------------------------------------

/// Single-quoted literal with embedded quotes doubled.
pub fn quote(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }

pub(crate) fn quote_or_null(s: Option<&str>) -> String {
    match s.map(str::trim).filter(|s| !s.is_empty()) {
        Some(v) => quote(v),
        None => "NULL".to_string(),
    }
}

/// Integer literal, `NULL` when absent or unparsable.
pub(crate) fn int_or_null(s: Option<&str>) -> String {
    s.and_then(|v| v.trim().parse::<i64>().ok()).map(|n| n.to_string()).unwrap_or_else(|| "NULL".to_string())
}

/// Integer literal, `0` when absent or unparsable.
pub(crate) fn int_or_zero(s: Option<&str>) -> String {
    s.and_then(|v| v.trim().parse::<i64>().ok()).unwrap_or(0).to_string()
}

/// Decimal literal, `NULL` when absent, unparsable or not finite.
pub(crate) fn decimal_or_null(s: Option<&str>) -> String {
    match s.map(str::trim).filter(|v| v.parse::<f64>().map(f64::is_finite).unwrap_or(false)) {
        Some(v) => v.to_string(),
        None => "NULL".to_string(),
    }
}

pub(crate) fn flag(s: Option<&str>) -> bool { matches!(s.map(str::trim), Some("true") | Some("1") | Some("TRUE")) }

pub(crate) fn ensure_organization() -> String {
    format!(
        "-- Ensure the organization exists\n\
         INSERT INTO organizations (id, name, slug, type, subscription_status, is_active)\n\
         VALUES ({}, 'Tamilaga Vettri Kazhagam', 'tvk', 'political_party', 'active', true)\n\
         ON CONFLICT (id) DO NOTHING;\n",
        quote(ORGANIZATION_ID)
    )
}

pub(crate) fn banner(title: &str, detail: &str) -> String {
    let rule = "-- ".to_string() + &"=".repeat(76);
    format!("{rule}\n-- {title}\n-- {detail}\n{rule}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

    #[test]
    fn literal_helpers() {
        assert_eq!(quote("St. Mary's School"), "'St. Mary''s School'");
        assert_eq!(quote_or_null(Some("  ")), "NULL");
        assert_eq!(int_or_null(Some("12a")), "NULL");
        assert_eq!(int_or_null(Some(" 42 ")), "42");
        assert_eq!(int_or_zero(None), "0");
        assert_eq!(decimal_or_null(Some("13.0827")), "13.0827");
        assert_eq!(decimal_or_null(Some("NaN")), "NULL");
        assert_eq!(decimal_or_null(Some("north")), "NULL");
        assert!(flag(Some("TRUE")) && flag(Some("1")) && flag(Some("true")));
        assert!(!flag(Some("yes")) && !flag(Some("True")) && !flag(None));
    }

    #[test]
    fn command_parsing() {
        assert_eq!(SeedCommand::parse(&[]).unwrap(), SeedCommand::Help);
        assert_eq!(
            SeedCommand::parse(&args(&["--wards"])).unwrap(),
            SeedCommand::Wards { csv: DEFAULT_WARDS_CSV.into(), out_dir: ".".into() }
        );
        assert_eq!(
            SeedCommand::parse(&args(&["--constituencies", "tn.json", "--out", "out"])).unwrap(),
            SeedCommand::Constituencies { geojson: "tn.json".into(), out_dir: "out".into() }
        );
        assert!(matches!(SeedCommand::parse(&args(&["--voters"])), Err(SeedError::Usage(_))));
        assert!(matches!(SeedCommand::parse(&args(&["--constituencies"])), Err(SeedError::Usage(_))));
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = SeedCommand::Wards { csv: dir.path().join("nope.csv"), out_dir: dir.path().to_path_buf() };
        assert!(matches!(run(&cmd), Err(SeedError::MissingInput(_))));
    }
}
