pub mod importer;
mod lookup;

pub use importer::{ImportOptions, ImportSummary, import};
pub use lookup::{CountryOrder, GeonamesStore, Record};

#[cfg(test)]
pub(crate) use lookup::tests::sample_store;
