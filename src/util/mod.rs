use std::path::PathBuf;

pub mod http;
pub mod path;

const CACHE_DIR_ENV: &str = "CDRIP_CACHE_DIR";

/// Root of all on-disk caches: `$CDRIP_CACHE_DIR`, else
/// `$XDG_CACHE_HOME/cdrip`, else `~/.cache/cdrip`.
pub fn cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }

    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("cdrip")
}
