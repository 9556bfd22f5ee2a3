use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Params, named_params, params, types::ValueRef};
use serde_json::{Map, Number, Value};
use tracing::info;

use crate::error::ServiceError;

/// One result row, column name to value.
pub type Record = Map<String, Value>;

const CITY_LIMIT: usize = 20;
const SEARCH_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryOrder {
    Population,
    Name,
}

/// Read-only queries over a database built by the importer.
pub struct GeonamesStore {
    conn: Mutex<Connection>,
}

impl GeonamesStore {
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        if !path.is_file() {
            return Err(ServiceError::Database(format!(
                "geonames database not found: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!(path = %path.display(), "geonames database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn countries(&self, order: CountryOrder) -> Result<Vec<Record>, ServiceError> {
        let order_by = match order {
            CountryOrder::Population => "population DESC, country",
            CountryOrder::Name => "country",
        };
        let sql = format!(
            "SELECT iso, iso3, country, capital, area_km, population, continent, \
             currency_code, languages, geoname_id \
             FROM countries ORDER BY {order_by}"
        );
        self.query(&sql, [])
    }

    /// First-level administrative divisions of a country.
    pub fn regions(&self, country: &str) -> Result<Vec<Record>, ServiceError> {
        self.query(
            "SELECT geonames_id, name, admin1_code, population, latitude, longitude, timezone \
             FROM geonames \
             WHERE country_code = ?1 AND feature_class = 'A' AND feature_code = 'ADM1' \
             ORDER BY name",
            params![country.to_uppercase()],
        )
    }

    /// Most populous places within a region.
    pub fn cities(&self, country: &str, region: &str) -> Result<Vec<Record>, ServiceError> {
        self.query(
            "SELECT geonames_id, name, feature_code, population, latitude, longitude, timezone \
             FROM geonames \
             WHERE country_code = ?1 AND admin1_code = ?2 AND feature_class = 'P' \
             ORDER BY population DESC, name \
             LIMIT ?3",
            params![country.to_uppercase(), region, CITY_LIMIT],
        )
    }

    pub fn place(&self, id: i64) -> Result<Record, ServiceError> {
        let mut record = self
            .query("SELECT * FROM geonames WHERE geonames_id = ?1", params![id])?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::NotFound(format!("geonames id {id}")))?;

        // Only a non-empty list is split; NULL and "" are returned as stored.
        let alternate: Option<Vec<Value>> = match record.get("alternate_names") {
            Some(Value::String(names)) if !names.is_empty() => Some(
                names
                    .split(',')
                    .map(|n| Value::String(n.to_string()))
                    .collect(),
            ),
            _ => None,
        };
        if let Some(names) = alternate {
            record.insert("alternate_names".into(), Value::Array(names));
        }
        Ok(record)
    }

    /// Populated places whose name matches `city` case-insensitively,
    /// optionally restricted to a country.
    pub fn search(&self, country: Option<&str>, city: &str) -> Result<Vec<Record>, ServiceError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(ServiceError::BadRequest("city is required".into()));
        }
        let country = country
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase);
        self.query(
            "SELECT geonames_id, name, country_code, admin1_code, feature_code, population, \
             latitude, longitude, timezone \
             FROM geonames \
             WHERE name = :city AND (:country IS NULL OR country_code = :country) \
             AND feature_class = 'P' \
             ORDER BY population DESC \
             LIMIT :limit",
            named_params! { ":city": city, ":country": country, ":limit": SEARCH_LIMIT },
        )
    }

    fn query<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Record>, ServiceError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (idx, name) in names.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(idx)?));
            }
            records.push(record);
        }
        Ok(records)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}
