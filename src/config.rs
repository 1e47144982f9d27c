use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::cli::SyncArgs;
use crate::store::COMPRESSED_KEY_PREFIX;
use crate::types::Photo;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read photo manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid photo manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Photo at index {0} has an empty uid")]
    EmptyUid(usize),

    #[error("Duplicate photo uid '{0}'")]
    DuplicateUid(String),

    #[error("Photo uid '{0}' uses the reserved 'compressed/' prefix")]
    ReservedUid(String),
}

/// Settings for the `sync` command.
#[derive(Debug)]
pub struct Config {
    pub photos: Vec<Photo>,
    pub database: PathBuf,
    pub watch_with_interval: Option<Duration>,
    pub cooldown_secs: f64,
    pub max_photo_bytes: u64,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub once: bool,
    pub notify_systemd: bool,
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_args(args: SyncArgs) -> anyhow::Result<Self> {
        if !args.cooldown_secs.is_finite() || args.cooldown_secs < 0.0 {
            anyhow::bail!(
                "--cooldown-secs must be a non-negative number, got {}",
                args.cooldown_secs
            );
        }
        if args.watch_with_interval == Some(0) {
            anyhow::bail!("--watch-with-interval must be at least 1 second");
        }

        let manifest_path = expand_tilde(&args.photos.to_string_lossy());
        let photos = load_manifest(&manifest_path)?;

        Ok(Self {
            photos,
            database: expand_tilde(&args.store.database),
            watch_with_interval: args.watch_with_interval.map(Duration::from_secs),
            cooldown_secs: args.cooldown_secs,
            max_photo_bytes: args.max_photo_bytes,
            max_dimension: args.max_dimension,
            jpeg_quality: args.jpeg_quality,
            once: args.once,
            notify_systemd: args.notify_systemd,
        })
    }
}

pub fn load_manifest(path: &Path) -> Result<Vec<Photo>, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let photos = parse_manifest(&text)?;
    tracing::debug!(path = %path.display(), photos = photos.len(), "Loaded photo manifest");
    Ok(photos)
}

/// Parse a JSON photo list. Order is preserved; uids must be non-empty,
/// unique and outside the compressed-variant namespace since they key the
/// content store.
pub fn parse_manifest(text: &str) -> Result<Vec<Photo>, ManifestError> {
    let photos: Vec<Photo> = serde_json::from_str(text)?;
    let mut seen = HashSet::with_capacity(photos.len());
    for (index, photo) in photos.iter().enumerate() {
        if photo.uid.trim().is_empty() {
            return Err(ManifestError::EmptyUid(index));
        }
        if photo.uid.starts_with(COMPRESSED_KEY_PREFIX) {
            return Err(ManifestError::ReservedUid(photo.uid.clone()));
        }
        if !seen.insert(photo.uid.as_str()) {
            return Err(ManifestError::DuplicateUid(photo.uid.clone()));
        }
    }
    Ok(photos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("photo_sync_tests")
            .join("config")
            .join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sync_args(extra: &[&str]) -> SyncArgs {
        let mut argv = vec!["photo-sync", "sync"];
        argv.extend_from_slice(extra);
        match crate::cli::Cli::try_parse_from(argv).unwrap().command {
            crate::cli::Command::Sync(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Pictures");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Pictures"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn test_parse_manifest_preserves_order() {
        let photos = parse_manifest(
            r#"[
                {"uid": "b", "url": "https://example.com/b.jpg"},
                {"uid": "a", "url": "https://example.com/a.jpg"}
            ]"#,
        )
        .unwrap();
        let uids: Vec<&str> = photos.iter().map(|p| p.uid.as_str()).collect();
        assert_eq!(uids, vec!["b", "a"]);
    }

    #[test]
    fn test_parse_manifest_empty_list() {
        assert!(parse_manifest("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_manifest_rejects_duplicate_uid() {
        let result = parse_manifest(
            r#"[
                {"uid": "a", "url": "https://example.com/1.jpg"},
                {"uid": "a", "url": "https://example.com/2.jpg"}
            ]"#,
        );
        assert!(matches!(result, Err(ManifestError::DuplicateUid(uid)) if uid == "a"));
    }

    #[test]
    fn test_parse_manifest_rejects_empty_uid() {
        let result = parse_manifest(r#"[{"uid": " ", "url": "https://example.com/1.jpg"}]"#);
        assert!(matches!(result, Err(ManifestError::EmptyUid(0))));
    }

    #[test]
    fn test_parse_manifest_rejects_compressed_namespace_uid() {
        let result = parse_manifest(
            r#"[
                {"uid": "1", "url": "https://example.com/1.jpg"},
                {"uid": "compressed/1", "url": "https://example.com/2.jpg"}
            ]"#,
        );
        assert!(matches!(result, Err(ManifestError::ReservedUid(uid)) if uid == "compressed/1"));
    }

    #[test]
    fn test_parse_manifest_prefix_check_is_case_sensitive() {
        let photos =
            parse_manifest(r#"[{"uid": "COMPRESSED/1", "url": "https://example.com/1.jpg"}]"#)
                .unwrap();
        assert_eq!(photos[0].uid, "COMPRESSED/1");
    }

    #[test]
    fn test_parse_manifest_rejects_bad_url() {
        let result = parse_manifest(r#"[{"uid": "a", "url": "nope"}]"#);
        assert!(matches!(result, Err(ManifestError::Parse(_))));
    }

    #[test]
    fn test_load_manifest_missing_file() {
        let dir = test_dir("missing");
        let result = load_manifest(&dir.join("absent.json"));
        assert!(matches!(result, Err(ManifestError::Read { .. })));
    }

    #[test]
    fn test_from_args_loads_manifest() {
        let dir = test_dir("from_args");
        let manifest = dir.join("photos.json");
        fs::write(&manifest, r#"[{"uid": "1", "url": "https://example.com/1.jpg"}]"#).unwrap();
        let db = dir.join("state.db");

        let config = Config::from_args(sync_args(&[
            "--photos",
            manifest.to_str().unwrap(),
            "--database",
            db.to_str().unwrap(),
            "--watch-with-interval",
            "30",
        ]))
        .unwrap();

        assert_eq!(config.photos.len(), 1);
        assert_eq!(config.database, db);
        assert_eq!(config.watch_with_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.cooldown_secs, 14_400.0);
    }

    #[test]
    fn test_from_args_rejects_negative_cooldown() {
        let dir = test_dir("negative_cooldown");
        let manifest = dir.join("photos.json");
        fs::write(&manifest, "[]").unwrap();

        let result = Config::from_args(sync_args(&[
            "--photos",
            manifest.to_str().unwrap(),
            "--cooldown-secs=-1",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_args_rejects_zero_interval() {
        let dir = test_dir("zero_interval");
        let manifest = dir.join("photos.json");
        fs::write(&manifest, "[]").unwrap();

        let result = Config::from_args(sync_args(&[
            "--photos",
            manifest.to_str().unwrap(),
            "--watch-with-interval",
            "0",
        ]));
        assert!(result.is_err());
    }
}
