use std::path::PathBuf;

use anyhow::{Context, Result};

fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("epwatch"))
}

pub fn database_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("epwatch.db"))
}

pub fn catalog_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("catalog.json"))
}

pub fn log_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("epwatch.log"))
}
