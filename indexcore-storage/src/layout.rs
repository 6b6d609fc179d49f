use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use indexcore_common::IndexKind;

/// The sidecar file suffix appended to every shard's primary artifact path.
pub const SIDECAR_SUFFIX: &str = ".metadata";

/// Builds the directory holding every shard belonging to one provider
/// instance: `<root>/<provider-kind>/<instance-name>_<instance-id>`.
pub fn instance_dir(root: &Path, provider_kind: &str, instance_name: &str, instance_id: u64) -> PathBuf {
    root.join(provider_kind)
        .join(format!("{}_{}", instance_name, instance_id))
}

/// Builds a new shard's primary artifact path: `<dir>/<epoch-ms>.<ext>`.
pub fn new_shard_path(dir: &Path, kind: IndexKind) -> PathBuf {
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis();
    dir.join(format!("{}.{}", epoch_ms, kind.extension()))
}

pub fn sidecar_path(shard_path: &Path) -> PathBuf {
    let mut s = shard_path.as_os_str().to_owned();
    s.push(SIDECAR_SUFFIX);
    PathBuf::from(s)
}

/// Lists every primary shard artifact under `dir`, paired with its kind.
///
/// Files whose name contains `.tmp` are ignored, matching the recovery
/// convention used to mask partially-written artifacts. Sidecar files are
/// recognised by their suffix and skipped here; the shard loader reads them
/// directly from `sidecar_path`.
pub fn scan_shards(dir: &Path) -> std::io::Result<Vec<(PathBuf, IndexKind)>> {
    let mut found = Vec::new();

    if !dir.exists() {
        return Ok(found);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };

        if name.contains(".tmp") || name.ends_with(SIDECAR_SUFFIX) {
            continue;
        }

        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e,
            None => continue,
        };

        if let Some(kind) = IndexKind::from_extension(ext) {
            found.push((path, kind));
        }
    }

    found.sort();
    Ok(found)
}
