use std::fs;
use std::path::{Path, PathBuf};

use crate::home::{classhub_config_path, resolve_classhub_home_dir};

const CLASSHUB_TOML_SAMPLE: &str = include_str!("../../../classhub.toml.sample");

pub fn run_config_init(conf_dir: Option<PathBuf>) -> Result<(), String> {
    let home = resolve_classhub_home_dir(conf_dir.as_deref());

    for path in init_directories(&home) {
        fs::create_dir_all(&path)
            .map_err(|error| format!("create {} failed: {error}", path.display()))?;
        println!("created: {}", path.display());
    }

    let config_path = classhub_config_path(&home);
    if config_path.exists() {
        println!("kept: {}", config_path.display());
    } else {
        fs::write(&config_path, CLASSHUB_TOML_SAMPLE)
            .map_err(|error| format!("write {} failed: {error}", config_path.display()))?;
        println!("created: {}", config_path.display());
    }

    Ok(())
}

fn init_directories(home: &Path) -> Vec<PathBuf> {
    vec![home.to_path_buf(), home.join("logs")]
}
