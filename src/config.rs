use crate::model::PersistedState;
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "playdeck";
const STATE_FILE: &str = "state.json";
const LOG_FILE: &str = "playdeck.log";

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("PLAYDECK_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME")
        && !xdg.is_empty()
    {
        return Ok(PathBuf::from(xdg).join(APP_DIR));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn state_path() -> Result<PathBuf> {
    Ok(config_root()?.join(STATE_FILE))
}

pub fn log_path() -> Result<PathBuf> {
    Ok(config_root()?.join(LOG_FILE))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

pub fn load_state() -> Result<PersistedState> {
    let path = state_path()?;
    if !path.exists() {
        return Ok(PersistedState::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let state: PersistedState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse state file {}", path.display()))?;
    Ok(state)
}

/// Writes both preferences. A volume outside `0..=1` keeps the previously saved one.
pub fn save_state(state: &PersistedState) -> Result<()> {
    ensure_config_dir()?;
    let path = state_path()?;

    let mut to_write = state.clone();
    if !(0.0..=1.0).contains(&state.volume) {
        log::warn!("not saving out-of-range volume {}", state.volume);
        to_write.volume = load_state().map_or(PersistedState::default().volume, |saved| saved.volume);
    }

    let json = serde_json::to_string_pretty(&to_write)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Both cases share one test because they mutate the same process-wide variable.
    #[test]
    fn state_round_trips_and_rejects_out_of_range_volume() {
        let dir = tempdir().expect("tempdir");
        unsafe {
            env::set_var("PLAYDECK_CONFIG_DIR", dir.path().to_string_lossy().as_ref());
        }

        assert_eq!(load_state().expect("missing file"), PersistedState::default());

        let state = PersistedState {
            playlist_visible: false,
            volume: 0.4,
        };
        save_state(&state).expect("save");
        assert_eq!(load_state().expect("load"), state);

        save_state(&PersistedState {
            playlist_visible: true,
            volume: 3.0,
        })
        .expect("save");
        let loaded = load_state().expect("load");
        assert!(loaded.playlist_visible);
        assert_eq!(loaded.volume, 0.4);

        assert_eq!(log_path().expect("log path"), dir.path().join(LOG_FILE));
    }

    #[test]
    fn strips_windows_verbatim_prefix() {
        let cleaned = strip_windows_verbatim_prefix(Path::new(r"\\?\E:\Music\a.mp3"));
        assert_eq!(cleaned, PathBuf::from(r"E:\Music\a.mp3"));
        let unc = strip_windows_verbatim_prefix(Path::new(r"\\?\UNC\nas\share\b.flac"));
        assert_eq!(unc, PathBuf::from(r"\\nas\share\b.flac"));
    }
}
