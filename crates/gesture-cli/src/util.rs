use std::path::Path;

use anyhow::Result;

/// Field delimiter implied by a `.csv` or `.tsv` extension.
pub fn delimiter_for(path: &Path) -> Result<u8> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());
    match ext.as_deref() {
        Some("tsv") => Ok(b'\t'),
        Some("csv") => Ok(b','),
        _ => anyhow::bail!("File must have a .tsv or .csv extension: {}", path.display()),
    }
}

pub fn validate_tsv_or_csv_file(path: &Path) -> Result<u8> {
    let delimiter = delimiter_for(path)?;
    if !path.exists() {
        anyhow::bail!("File does not exist: {}", path.display());
    }
    Ok(delimiter)
}
