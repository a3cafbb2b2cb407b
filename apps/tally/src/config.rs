use std::path::{Path, PathBuf};

use anyhow::Context as _;
use directories::ProjectDirs;

/// Resolved process configuration. CLI flags win over environment variables, which win
/// over the platform data directory defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: String,
    pub data_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub secrets_file: PathBuf,
}

impl Config {
    pub fn resolve(
        app_env: String,
        data_dir: Option<&Path>,
        ledger_path: Option<&Path>,
        secrets_file: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir(data_dir)?;
        let ledger_path = ledger_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join("ledger.sqlite"));
        let secrets_file = secrets_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.join("secrets.current.age"));
        Ok(Self {
            app_env,
            data_dir,
            ledger_path,
            secrets_file,
        })
    }
}

fn resolve_data_dir(cli: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = cli {
        return Ok(p.to_path_buf());
    }

    let proj = ProjectDirs::from("com", "tally", "tally").context("resolve platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}
