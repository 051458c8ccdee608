use std::path::PathBuf;

use directories::BaseDirs;

pub fn user_home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|base| base.home_dir().to_path_buf())
}

/// Root data directory (`~/.berea`), overridable with `BEREA_HOME`.
pub fn berea_home_dir() -> Result<PathBuf, String> {
    if let Some(override_dir) = std::env::var_os("BEREA_HOME") {
        let path = PathBuf::from(override_dir);
        if path.is_relative() {
            return Err("BEREA_HOME must be an absolute path".to_string());
        }
        std::fs::create_dir_all(&path)
            .map_err(|e| format!("failed to create BEREA_HOME directory: {e}"))?;
        return Ok(path);
    }

    let home = user_home_dir()
        .ok_or_else(|| "failed to resolve user home; set BEREA_HOME or HOME".to_string())?;
    let dir = home.join(".berea");
    std::fs::create_dir_all(&dir).map_err(|e| format!("failed to create ~/.berea: {e}"))?;
    Ok(dir)
}

/// Path of the local draft database.
pub fn draft_db_path() -> Result<PathBuf, String> {
    Ok(berea_home_dir()?.join("drafts.db"))
}

/// Path of the TOML config file, overridable with `BEREA_CONFIG`.
pub fn config_path() -> Result<PathBuf, String> {
    if let Some(override_path) = std::env::var_os("BEREA_CONFIG") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(berea_home_dir()?.join("config.toml"))
}
