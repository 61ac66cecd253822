use std::path::{Component, Path, PathBuf};

/// Path to `target` as seen from the directory holding `collection`
/// (a .cue or .m3u file).
pub fn relative_path(target: &str, collection: &str) -> String {
    let target = Path::new(target);
    let target_dir = target.parent().unwrap_or_else(|| Path::new(""));
    let collection_dir = Path::new(collection)
        .parent()
        .unwrap_or_else(|| Path::new(""));
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    if target_dir == collection_dir {
        return file_name;
    }

    let target_parts: Vec<Component<'_>> = target_dir.components().collect();
    let collection_parts: Vec<Component<'_>> = collection_dir.components().collect();
    let common = target_parts
        .iter()
        .zip(collection_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..collection_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part.as_os_str());
    }
    relative.push(file_name);

    relative.to_string_lossy().into_owned()
}

/// Translates a FILE argument from a .cue or .toc into an existing path.
///
/// Tries the path as given, with Windows separators converted, relative to
/// the referencing file, and finally with `.wav`/`.flac` swapped in.
pub fn real_path(reference: &Path, file: &str) -> Option<PathBuf> {
    let given = PathBuf::from(file);
    if given.exists() {
        return Some(given);
    }

    let reference_dir = reference.parent().unwrap_or_else(|| Path::new(""));
    let converted: PathBuf = file.split('\\').collect::<Vec<_>>().join("/").into();

    let mut candidates = Vec::new();
    for path in [given, converted] {
        if path.is_absolute() {
            candidates.push(path);
        } else {
            candidates.push(reference_dir.join(&path));
            if let Some(name) = path.file_name() {
                candidates.push(reference_dir.join(name));
            }
        }
    }

    for candidate in &candidates {
        if candidate.exists() {
            return Some(candidate.clone());
        }
    }

    for candidate in &candidates {
        for ext in ["wav", "flac"] {
            let alternate = candidate.with_extension(ext);
            if alternate.exists() {
                return Some(alternate);
            }
        }
    }

    None
}

/// Shortens an over-long file name on word boundaries, keeping the
/// extension. Used when the file system refuses a name as too long.
pub fn shrink_path(path: &Path) -> PathBuf {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let full_length = name.len() + ext.len();
    let mut target: usize = 127;
    if full_length <= target {
        target = (1usize << full_length.max(1).ilog2()) - 1;
    }
    let target = target.saturating_sub(ext.len() + 1);

    let mut pieces = Vec::new();
    let mut length = 0;
    for word in name.split(' ') {
        if length + 1 + word.len() > target {
            break;
        }
        pieces.push(word);
        length += 1 + word.len();
    }

    path.with_file_name(format!("{}{ext}", pieces.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_same_directory_is_basename() {
        assert_eq!(relative_path("/music/a/track.flac", "/music/a/disc.cue"), "track.flac");
        assert_eq!(relative_path("data.wav", ""), "data.wav");
    }

    #[test]
    fn relative_path_walks_up_and_down() {
        assert_eq!(
            relative_path("/music/a/b/track.flac", "/music/a/disc.cue"),
            "b/track.flac"
        );
        assert_eq!(
            relative_path("/music/x/track.flac", "/music/a/disc.cue"),
            "../x/track.flac"
        );
    }

    #[test]
    fn real_path_finds_flac_for_wav_reference() {
        let dir = tempfile::tempdir().unwrap();
        let cue = dir.path().join("disc.cue");
        std::fs::write(dir.path().join("track01.flac"), b"").unwrap();

        let found = real_path(&cue, "track01.wav").unwrap();
        assert_eq!(found, dir.path().join("track01.flac"));
        assert!(real_path(&cue, "missing.wav").is_none());
    }

    #[test]
    fn real_path_converts_windows_separators() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("a.wav"), b"").unwrap();

        let found = real_path(&dir.path().join("disc.cue"), "sub\\a.wav").unwrap();
        assert_eq!(found, dir.path().join("sub").join("a.wav"));
    }

    #[test]
    fn shrink_path_keeps_extension_and_whole_words() {
        let long = format!("/out/{} end.flac", "word ".repeat(40).trim_end());
        let shrunk = shrink_path(Path::new(&long));
        let name = shrunk.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".flac"));
        assert!(name.len() <= 127);
        assert!(name.starts_with("word word"));
    }
}
