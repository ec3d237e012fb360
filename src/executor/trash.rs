use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;

/// The reversible deletion target: a rename into the user's trash
/// directory under a collision-free name.
pub fn trash_dir(home: &Path) -> PathBuf {
    home.join(".Trash")
}

/// Move a file or directory into the trash, returning the trashed
/// location so the transaction journal can reverse the move.
pub fn move_to_trash(path: &Path, trash: &Path) -> io::Result<PathBuf> {
    if !trash.exists() {
        fs::create_dir_all(trash)?;
    }

    let original_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut target = trash.join(original_name);

    if target.exists() {
        let stem = original_name.to_string_lossy().to_string();
        let (base, ext) = split_name_ext(&stem);
        let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut counter = 1u32;
        loop {
            let candidate = if ext.is_empty() {
                format!("{base} ({ts}-{counter})")
            } else {
                format!("{base} ({ts}-{counter}).{ext}")
            };
            target = trash.join(candidate);
            if !target.exists() {
                break;
            }
            counter += 1;
        }
    }

    fs::rename(path, &target)?;
    Ok(target)
}

/// Reverse a trash move, recreating the original parent if needed.
pub fn restore_from_trash(trashed: &Path, original: &Path) -> io::Result<()> {
    if let Some(parent) = original.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(trashed, original)
}

/// Split a name into (base, extension) without touching the filesystem.
fn split_name_ext(name: &str) -> (String, String) {
    if let Some(idx) = name.rfind('.') {
        let (base, ext) = name.split_at(idx);
        (base.to_string(), ext.trim_start_matches('.').to_string())
    } else {
        (name.to_string(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn trash_move_and_restore_roundtrip() {
        let home = TempDir::new().unwrap();
        let trash = trash_dir(home.path());
        let file = home.path().join("doomed.txt");
        fs::write(&file, b"contents").unwrap();

        let trashed = move_to_trash(&file, &trash).unwrap();
        assert!(!file.exists());
        assert!(trashed.starts_with(&trash));

        restore_from_trash(&trashed, &file).unwrap();
        assert!(file.exists());
        assert_eq!(fs::read(&file).unwrap(), b"contents");
    }

    #[test]
    fn name_collisions_get_unique_targets() {
        let home = TempDir::new().unwrap();
        let trash = trash_dir(home.path());

        let first = home.path().join("same.txt");
        fs::write(&first, b"one").unwrap();
        let first_trashed = move_to_trash(&first, &trash).unwrap();

        let second = home.path().join("same.txt");
        fs::write(&second, b"two").unwrap();
        let second_trashed = move_to_trash(&second, &trash).unwrap();

        assert_ne!(first_trashed, second_trashed);
        assert!(first_trashed.exists());
        assert!(second_trashed.exists());
    }

    #[test]
    fn directories_move_whole() {
        let home = TempDir::new().unwrap();
        let trash = trash_dir(home.path());
        let dir = home.path().join("bundle");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/file"), b"x").unwrap();

        let trashed = move_to_trash(&dir, &trash).unwrap();
        assert!(!dir.exists());
        assert!(trashed.join("nested/file").exists());
    }

    #[test]
    fn split_name_ext_handles_plain_names() {
        assert_eq!(split_name_ext("a.txt"), ("a".into(), "txt".into()));
        assert_eq!(split_name_ext("noext"), ("noext".into(), String::new()));
    }
}
