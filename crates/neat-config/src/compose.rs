//! Locates the compose document describing a batch run.
//!
//! An explicit path always wins. Otherwise `.neat/neat-compose.yaml` and then
//! `neat-compose.yaml` are tried relative to the supplied base directory.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::Config;
use crate::defaults::compose_search_paths;

/// Errors raised while locating the compose document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeLookupError {
    /// The explicitly configured compose file does not exist.
    #[error("compose file '{path}' does not exist")]
    Missing {
        /// Configured path.
        path: Utf8PathBuf,
    },
    /// None of the default locations held a compose file.
    #[error("no compose file found (searched: {searched})")]
    NotFound {
        /// Comma separated list of the searched locations.
        searched: String,
    },
}

/// Resolves the compose file for `config`, relative to `base`.
///
/// # Errors
///
/// Returns [`ComposeLookupError`] when the configured file is missing or no
/// default location holds a compose document.
pub fn resolve_compose_file(
    config: &Config,
    base: &Utf8Path,
) -> Result<Utf8PathBuf, ComposeLookupError> {
    if let Some(explicit) = config.compose_file() {
        let candidate = if explicit.is_absolute() {
            explicit.to_path_buf()
        } else {
            base.join(explicit)
        };
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(ComposeLookupError::Missing { path: candidate });
    }

    let candidates = compose_search_paths();
    candidates
        .iter()
        .map(|relative| base.join(relative))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ComposeLookupError::NotFound {
            searched: candidates
                .iter()
                .map(|path| path.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn workdir() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .expect("temp dir should be utf-8");
        (dir, path)
    }

    #[rstest]
    fn prefers_the_dot_neat_directory(workdir: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = workdir;
        fs::create_dir_all(base.join(".neat")).expect("create .neat");
        fs::write(base.join(".neat/neat-compose.yaml"), "testbeds: []\n").expect("write");
        fs::write(base.join("neat-compose.yaml"), "testbeds: []\n").expect("write");

        let resolved = resolve_compose_file(&Config::default(), &base).expect("resolve");
        assert_eq!(resolved, base.join(".neat/neat-compose.yaml"));
    }

    #[rstest]
    fn falls_back_to_the_working_directory(workdir: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = workdir;
        fs::write(base.join("neat-compose.yaml"), "testbeds: []\n").expect("write");

        let resolved = resolve_compose_file(&Config::default(), &base).expect("resolve");
        assert_eq!(resolved, base.join("neat-compose.yaml"));
    }

    #[rstest]
    fn reports_every_searched_location(workdir: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = workdir;
        let error = resolve_compose_file(&Config::default(), &base).expect_err("nothing to find");
        let message = error.to_string();
        assert!(message.contains(".neat/neat-compose.yaml"), "{message}");
        assert!(message.contains("neat-compose.yaml"), "{message}");
    }

    #[rstest]
    fn explicit_path_must_exist(workdir: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = workdir;
        let config = Config {
            compose_file: Some(Utf8PathBuf::from("custom.yaml")),
            ..Config::default()
        };
        let error = resolve_compose_file(&config, &base).expect_err("missing file");
        assert_eq!(
            error,
            ComposeLookupError::Missing {
                path: base.join("custom.yaml")
            }
        );
    }
}
