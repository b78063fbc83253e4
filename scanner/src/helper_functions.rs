use std::fs::File;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::debug;

pub fn read_csv(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

/// Reads a CSV with a header, pinning the dtype of the named columns instead
/// of inferring them from the leading rows.
pub fn read_csv_with_dtypes(file_path: &Path, dtypes: &[(&str, DataType)]) -> PolarsResult<DataFrame> {
    let overwrite = Schema::from_iter(
        dtypes
            .iter()
            .map(|(name, dtype)| Field::new((*name).into(), dtype.clone())),
    );
    CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(Arc::new(overwrite)))
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

/// Reads a header-less CSV whose columns are given by `schema`.
pub fn read_csv_with_schema(file_path: &Path, schema: Schema) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(false)
        .with_schema(Some(Arc::new(schema)))
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

pub fn dataframe_to_csv(df: &mut DataFrame, file_path: &Path) -> PolarsResult<()> {
    let mut file = File::create(file_path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(df)?;
    debug!("Wrote {} rows to {}", df.height(), file_path.display());
    Ok(())
}

/// String column as owned values; nulls become empty strings.
pub fn str_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<String>> {
    let col = df.column(name)?.cast(&DataType::String)?;
    Ok(col
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

pub fn f64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let col = df.column(name)?.cast(&DataType::Float64)?;
    Ok(col.f64()?.into_iter().collect())
}

pub fn i64_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i64>>> {
    let col = df.column(name)?.cast(&DataType::Int64)?;
    Ok(col.i64()?.into_iter().collect())
}
