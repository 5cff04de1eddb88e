//! JSON output for the competition index.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Serialize the index as pretty JSON and write it to `path`.
///
/// Parent directories are created as needed.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_competitions(
    competitions: &BTreeMap<String, String>,
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(competitions)?;

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create output dir");
            return Err(e.into());
        }
    }

    fs::write(path, json).await?;
    info!(count = competitions.len(), "Wrote competition index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_competitions_round_trips() {
        let dir = std::env::temp_dir().join(format!("competitions-{}", std::process::id()));
        let path = dir.join("out").join("competitions.json");
        let mut index = BTreeMap::new();
        index.insert("120".to_string(), "Chinese Super League".to_string());

        write_competitions(&index, &path).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, index);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
