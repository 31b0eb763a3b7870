use crate::profile::RawProfile;
use quorum_core::{QuorumError, QuorumResult};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Reads every `*.toml` profile in `dir` into a raw table keyed by profile
/// name. Files that fail to parse are skipped with a warning so one broken
/// profile cannot take down boot.
pub fn load_all(dir: impl AsRef<Path>) -> QuorumResult<HashMap<String, RawProfile>> {
    let dir = dir.as_ref();
    let mut profiles = HashMap::new();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        QuorumError::Config(format!("cannot read profile dir '{}': {e}", dir.display()))
    })?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        match toml::from_str::<RawProfile>(&content) {
            Ok(profile) => {
                if profiles.contains_key(&profile.name) {
                    warn!(profile = %profile.name, path = %path.display(), "Duplicate profile name, later file wins");
                }
                info!(profile = %profile.name, path = %path.display(), "Loaded profile");
                profiles.insert(profile.name.clone(), profile);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unparseable profile file");
            }
        }
    }

    Ok(profiles)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_load_all_reads_toml_profiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("researcher.toml"),
            r#"
            name = "Associate_Researcher"
            type = "associate"
            "#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let profiles = load_all(dir.path()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert!(profiles.contains_key("Associate_Researcher"));
    }

    #[test]
    fn test_load_all_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.toml"), "name = \"Ok\"\ntype = \"associate\"").unwrap();
        std::fs::write(dir.path().join("broken.toml"), "name = [not toml").unwrap();

        let profiles = load_all(dir.path()).unwrap();
        assert_eq!(profiles.len(), 1);
    }

    #[test]
    fn test_load_all_missing_dir_is_config_error() {
        let result = load_all("/definitely/not/a/dir");
        assert!(matches!(result, Err(QuorumError::Config(_))));
    }
}
