use std::path::{Path, PathBuf};

const DEFAULT_CLASSHUB_HOME_DIR_NAME: &str = ".classhub";
pub const CLASSHUB_CONFIG_FILE_NAME: &str = "classhub.toml";

pub fn resolve_classhub_home_dir(conf_dir: Option<&Path>) -> PathBuf {
    conf_dir
        .map(resolve_conf_dir_arg)
        .unwrap_or_else(|| home_dir().join(DEFAULT_CLASSHUB_HOME_DIR_NAME))
}

pub fn classhub_config_path(home: &Path) -> PathBuf {
    home.join(CLASSHUB_CONFIG_FILE_NAME)
}

fn resolve_conf_dir_arg(path: &Path) -> PathBuf {
    let expanded = expand_path_with_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_path_with_home(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" {
        return home_dir();
    }
    if let Some(suffix) = raw.strip_prefix("~/") {
        return home_dir().join(suffix);
    }
    path.to_path_buf()
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
