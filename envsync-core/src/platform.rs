//! Platform-specific locations for envsync state

use std::path::PathBuf;

const APP_DIR: &str = "envsync";

/// Get the platform-specific data directory
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\envsync
/// - macOS: ~/Library/Application Support/envsync
/// - Linux/Other: ~/.local/share/envsync
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
///
/// Returns:
/// - Windows: %APPDATA%\envsync
/// - macOS: ~/Library/Application Support/envsync
/// - Linux/Other: ~/.config/envsync
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Default TOML config file
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Default key-value database (metadata, identity records, offline queue)
pub fn get_default_database_path() -> PathBuf {
    get_data_dir().join("envsync.db")
}

/// Default secret file (tokens, device keys, wrapped key material)
pub fn get_default_secrets_path() -> PathBuf {
    get_config_dir().join("secrets.json")
}

/// Ensure the data directory exists, creating it if necessary
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = get_data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Ensure the config directory exists, creating it if necessary
pub fn ensure_config_dir() -> std::io::Result<PathBuf> {
    let dir = get_config_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
