//! Launch specification and script project resolution.
//!
//! A [`LaunchSpec`] is the argv/env snapshot handed to the engine at
//! start; it is captured once and immutable for the engine's lifetime.
//! [`Project`] resolves a script project directory (main script plus
//! optional `gangway.toml` manifest) into such a snapshot, provisioning
//! the persistent data directory and the reserved environment keys the
//! script can rely on.

use crate::error::LaunchError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment key holding the project's persistent data directory.
pub const ENV_DATA_DIR: &str = "GANGWAY_DATA_DIR";

/// Environment key holding the colon-separated module search path.
pub const ENV_MODULE_PATH: &str = "GANGWAY_MODULE_PATH";

/// Environment key holding the scratch directory.
pub const ENV_TMP_DIR: &str = "GANGWAY_TMP_DIR";

/// Main script filename used when the manifest does not name one.
pub const DEFAULT_MAIN: &str = "main.rhai";

/// Immutable argv/env snapshot captured when the engine starts.
///
/// `args` follows the process convention: `args[0]` is the host name,
/// `args[1]` the main script, the rest are script arguments. Engines that
/// do not read scripts (test fakes) may leave `script` unset.
#[derive(Clone, Debug, Default)]
pub struct LaunchSpec {
    /// Argv-equivalent, passed through to the engine verbatim.
    pub args: Vec<String>,
    /// Env-equivalent, passed through to the engine verbatim.
    pub env: HashMap<String, String>,
    /// Main script to run, when the engine runs scripts.
    pub script: Option<PathBuf>,
    /// Base directory for resolving script imports.
    pub base_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Snapshot raw arguments and environment, with no script attached.
    pub fn new(args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            args,
            env,
            script: None,
            base_dir: None,
        }
    }
}

/// The optional `gangway.toml` project manifest.
#[derive(Debug, Default, Deserialize)]
struct Manifest {
    /// Main script filename, relative to the project directory.
    main: Option<String>,
}

/// A resolved script project directory.
#[derive(Clone, Debug)]
pub struct Project {
    dir: PathBuf,
    main: PathBuf,
}

impl Project {
    /// Resolve a project directory.
    ///
    /// The main script is taken from the `main` key of `gangway.toml`
    /// when the manifest exists, falling back to [`DEFAULT_MAIN`]. The
    /// resolved script file must exist.
    pub fn resolve(dir: impl Into<PathBuf>) -> Result<Self, LaunchError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(LaunchError::NoSuchProject(dir));
        }

        let manifest_path = dir.join("gangway.toml");
        let main_name = if manifest_path.is_file() {
            let raw = fs::read_to_string(&manifest_path)?;
            let manifest: Manifest = toml::from_str(&raw)?;
            manifest.main.unwrap_or_else(|| DEFAULT_MAIN.to_string())
        } else {
            DEFAULT_MAIN.to_string()
        };

        let main = dir.join(&main_name);
        if !main.is_file() {
            return Err(LaunchError::MissingScript(main));
        }

        Ok(Self { dir, main })
    }

    /// The project directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The resolved main script.
    pub fn main_script(&self) -> &Path {
        &self.main
    }

    /// Build the launch snapshot for this project.
    ///
    /// Creates the persistent `data/` directory, then overlays the
    /// reserved environment keys on the caller's map: [`ENV_DATA_DIR`],
    /// [`ENV_TMP_DIR`], and [`ENV_MODULE_PATH`] (the project directory,
    /// colon-joined with any module path the caller already supplied).
    /// Argv is `["gangway", <main script>, args...]`.
    pub fn launch_spec(
        &self,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<LaunchSpec, LaunchError> {
        let data_dir = self.dir.join("data");
        fs::create_dir_all(&data_dir)?;

        let mut full_env = env.clone();

        let module_path = match env.get(ENV_MODULE_PATH) {
            Some(extra) if !extra.is_empty() => {
                format!("{}:{}", self.dir.display(), extra)
            }
            _ => self.dir.display().to_string(),
        };
        full_env.insert(ENV_DATA_DIR.to_string(), data_dir.display().to_string());
        full_env.insert(ENV_MODULE_PATH.to_string(), module_path);
        full_env.insert(
            ENV_TMP_DIR.to_string(),
            std::env::temp_dir().display().to_string(),
        );

        let mut argv = vec![
            "gangway".to_string(),
            self.main.display().to_string(),
        ];
        argv.extend(args.iter().cloned());

        Ok(LaunchSpec {
            args: argv,
            env: full_env,
            script: Some(self.main.clone()),
            base_dir: Some(self.dir.clone()),
        })
    }
}
