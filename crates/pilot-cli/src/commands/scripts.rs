//! Listing of the scripts directory.

use std::fs;
use std::path::Path;

use anyhow::Result;

pub fn list(dir: &Path) -> Result<()> {
    let scripts = scan(dir)?;
    if scripts.is_empty() {
        println!("no scripts in {}", dir.display());
        return Ok(());
    }
    for script in scripts {
        println!("{script}");
    }
    Ok(())
}

/// File names of the regular files in the scripts directory, sorted.
pub fn scan(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        anyhow::bail!("scripts directory not found: {}", dir.display());
    }

    let mut scripts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_file() {
            scripts.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    scripts.sort();
    Ok(scripts)
}
