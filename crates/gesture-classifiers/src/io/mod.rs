//! File formats: the keyword-token text format used for datasets, models and
//! pipelines, plus delimited (CSV/TSV) ingestion.
pub mod delimited;
pub mod tokens;

pub use delimited::{classification_data_from_table, read_delimited};
pub use tokens::{FieldWriter, TokenReader};
