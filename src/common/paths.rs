use std::path::PathBuf;

pub fn system_config_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("clockface")
        .join("clockface.toml")
}
