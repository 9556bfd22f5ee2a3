use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use csv::{ReaderBuilder, StringRecord};
use rusqlite::{Connection, Transaction, params_from_iter};
use serde::Serialize;
use tracing::info;

use crate::error::ServiceError;

pub const COUNTRIES_FILE: &str = "countryInfo.txt";
pub const PLACES_FILE: &str = "allCountries.txt";

pub const COUNTRY_COLUMNS: [&str; 19] = [
    "iso",
    "iso3",
    "iso_numeric",
    "fips",
    "country",
    "capital",
    "area_km",
    "population",
    "continent",
    "tld",
    "currency_code",
    "currency_name",
    "phone",
    "postal_code_format",
    "postal_code_regex",
    "languages",
    "geoname_id",
    "neighbours",
    "equivalent_fips_code",
];

pub const PLACE_COLUMNS: [&str; 19] = [
    "geonames_id",
    "name",
    "ascii_name",
    "alternate_names",
    "latitude",
    "longitude",
    "feature_class",
    "feature_code",
    "country_code",
    "cc2",
    "admin1_code",
    "admin2_code",
    "admin3_code",
    "admin4_code",
    "population",
    "elevation",
    "dem",
    "timezone",
    "modification_date",
];

const SCHEMA: &str = "
    CREATE TABLE countries (
        iso TEXT,
        iso3 TEXT,
        iso_numeric INT,
        fips TEXT,
        country TEXT,
        capital TEXT,
        area_km INT,
        population INT,
        continent TEXT,
        tld TEXT,
        currency_code TEXT,
        currency_name TEXT,
        phone TEXT,
        postal_code_format TEXT,
        postal_code_regex TEXT,
        languages TEXT,
        geoname_id TEXT,
        neighbours TEXT,
        equivalent_fips_code TEXT
    );
    CREATE TABLE geonames (
        geonames_id INT PRIMARY KEY,
        name TEXT COLLATE NOCASE,
        ascii_name TEXT,
        alternate_names TEXT,
        latitude DOUBLE,
        longitude DOUBLE,
        feature_class TEXT,
        feature_code TEXT,
        country_code TEXT,
        cc2 TEXT,
        admin1_code TEXT,
        admin2_code TEXT,
        admin3_code TEXT,
        admin4_code TEXT,
        population LONG,
        elevation INT,
        dem INT,
        timezone TEXT,
        modification_date TEXT
    );
";

const INDEXES: &str = "
    CREATE INDEX country_feature ON geonames (country_code, feature_class, feature_code);
    CREATE INDEX country_admin1_feature ON geonames (country_code, admin1_code, feature_class, feature_code);
    CREATE INDEX place_names ON geonames (name, country_code, feature_class, feature_code, population);
";

const PROGRESS_EVERY: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub countries_file: PathBuf,
    pub places_file: PathBuf,
    pub output: PathBuf,
    /// Delete an existing output file instead of refusing to run.
    pub recreate: bool,
}

impl ImportOptions {
    pub fn from_data_dir(data_dir: &Path, output: PathBuf) -> Self {
        Self {
            countries_file: data_dir.join(COUNTRIES_FILE),
            places_file: data_dir.join(PLACES_FILE),
            output,
            recreate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub countries: usize,
    pub places: usize,
}

pub fn import(options: &ImportOptions) -> Result<ImportSummary, ServiceError> {
    for input in [&options.countries_file, &options.places_file] {
        if !input.exists() {
            return Err(ServiceError::BadRequest(format!(
                "input file not found: {}",
                input.display()
            )));
        }
    }

    if options.output.is_file() {
        if options.recreate {
            fs::remove_file(&options.output)?;
        } else {
            return Err(ServiceError::BadRequest(format!(
                "file {} already exists",
                options.output.display()
            )));
        }
    }
    if let Some(parent) = options.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let start = Instant::now();
    let mut conn = Connection::open(&options.output)?;
    conn.execute_batch("PRAGMA synchronous = OFF; PRAGMA journal_mode = MEMORY;")?;

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA)?;

    let countries = load_table(&tx, "countries", &COUNTRY_COLUMNS, &options.countries_file, true)?;
    info!(count = countries, "added records to [countries] table");

    let places = load_table(&tx, "geonames", &PLACE_COLUMNS, &options.places_file, false)?;
    info!(count = places, "added records to [geonames] table");

    tx.execute_batch(INDEXES)?;
    tx.commit()?;

    info!(
        path = %options.output.display(),
        elapsed_s = start.elapsed().as_secs(),
        "geonames database created"
    );
    Ok(ImportSummary { countries, places })
}

/// Streams tab-separated lines into `table`. Quotes are ordinary characters
/// in these files, so quoting is disabled. Short rows are padded with NULL.
fn load_table(
    tx: &Transaction<'_>,
    table: &str,
    columns: &[&str],
    path: &Path,
    skip_comments: bool,
) -> Result<usize, ServiceError> {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    );
    let mut stmt = tx.prepare(&sql)?;

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .has_headers(false)
        .flexible(true)
        .comment(skip_comments.then_some(b'#'))
        .from_path(path)?;

    let mut count = 0usize;
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        let line = record.position().map_or(0, |p| p.line());
        if record.len() > columns.len() {
            return Err(ServiceError::BadRequest(format!(
                "{} line {line}: {} fields, table {table} has {}",
                path.display(),
                record.len(),
                columns.len()
            )));
        }
        let values = (0..columns.len()).map(|idx| record.get(idx));
        stmt.execute(params_from_iter(values))?;

        count += 1;
        if count % PROGRESS_EVERY == 0 {
            info!(table, count, "import progress");
        }
    }
    Ok(count)
}
