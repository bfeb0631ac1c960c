//! Files written by the exporters.
//!
//! Every artifact is written once per run and overwritten by the next run.
//! JSON is always pretty-printed so exports can be diffed.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// A file an exporter wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub records: usize,
}

pub async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory {}", dir.display()))
}

pub async fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    resource: &str,
    records: usize,
    value: &T,
) -> Result<ExportArtifact> {
    let body = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", resource))?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(ExportArtifact {
        path: path.to_path_buf(),
        records,
    })
}

/// Write `rows` as CSV with a header row taken from the row type's field
/// names. Fields are quoted as needed.
pub async fn write_csv<R: Serialize>(
    path: &Path,
    resource: &str,
    rows: &[R],
) -> Result<ExportArtifact> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to serialize {} row", resource))?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to serialize {}", resource))?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(ExportArtifact {
        path: path.to_path_buf(),
        records: rows.len(),
    })
}

/// Turn a remote object path into a path relative to a local root.
///
/// Returns `None` for anything that could escape the root: absolute paths,
/// `..`, or paths with no normal component.
pub fn safe_relative_path(remote: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(remote).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
