//! Filesystem operations.

use std::path::{Path, PathBuf};

use log::debug;
use tokio::fs;
use walkdir::WalkDir;

use super::{OpError, OpResult};

/// Read a file as UTF-8 text.
pub async fn read_file(path: &Path) -> OpResult<String> {
    let display = path.display().to_string();
    let bytes = fs::read(path)
        .await
        .map_err(|e| OpError::from_io(&display, e))?;

    String::from_utf8(bytes).map_err(|_| {
        OpError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{display} is not valid UTF-8 text"),
        ))
    })
}

/// Write `content` to `path`, creating parent directories as needed.
///
/// Content lands in a temporary sibling first and is renamed over the target,
/// so a concurrent reader sees either the previous or the new content.
pub async fn write_file(path: &Path, content: &str) -> OpResult<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| OpError::InvalidInput(format!("{} has no file name", path.display())))?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let tmp_path = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));

    if let Err(e) = fs::write(&tmp_path, content.as_bytes()).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Delete a file, or a directory with everything below it.
pub async fn delete_path(path: &Path) -> OpResult<()> {
    let display = path.display().to_string();
    let meta = fs::symlink_metadata(path)
        .await
        .map_err(|e| OpError::from_io(&display, e))?;

    if meta.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }

    debug!("Deleted {}", display);
    Ok(())
}

/// List every descendant of a directory, relative to it, sorted.
pub async fn list_dir(path: &Path) -> OpResult<Vec<String>> {
    let display = path.display().to_string();
    let meta = fs::metadata(path)
        .await
        .map_err(|e| OpError::from_io(&display, e))?;
    if !meta.is_dir() {
        return Err(OpError::NotADirectory(display));
    }

    let root = path.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || walk_relative(&root))
        .await
        .map_err(|e| OpError::Io(std::io::Error::other(e.to_string())))??;

    Ok(entries)
}

fn walk_relative(root: &Path) -> OpResult<Vec<String>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| {
            OpError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop detected")),
            )
        })?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        entries.push(relative);
    }

    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.txt");

        write_file(&path, "X").await.unwrap();
        assert_eq!(read_file(&path).await.unwrap(), "X");
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c.txt");

        write_file(&path, "first").await.unwrap();
        write_file(&path, "second").await.unwrap();
        assert_eq!(read_file(&path).await.unwrap(), "second");

        // No temporary files left behind
        let listing = list_dir(&dir.path().join("a/b")).await.unwrap();
        assert_eq!(listing, vec!["c.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = read_file(&dir.path().join("missing.txt")).await;
        assert!(matches!(result, Err(OpError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_binary_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = read_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
        assert!(matches!(err, OpError::Io(_)));
    }

    #[tokio::test]
    async fn test_delete_then_read_is_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        write_file(&path, "bye").await.unwrap();

        delete_path(&path).await.unwrap();
        assert!(matches!(read_file(&path).await, Err(OpError::NotFound(_))));
        assert!(matches!(delete_path(&path).await, Err(OpError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_directory_recursively() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        write_file(&tree.join("x/y.txt"), "y").await.unwrap();

        delete_path(&tree).await.unwrap();
        assert!(!tree.exists());
    }

    #[tokio::test]
    async fn test_list_is_recursive_and_relative() {
        let dir = TempDir::new().unwrap();
        write_file(&dir.path().join("top.txt"), "1").await.unwrap();
        write_file(&dir.path().join("sub/inner.txt"), "2").await.unwrap();

        let listing = list_dir(dir.path()).await.unwrap();
        let expected: Vec<String> = vec![
            "sub".to_string(),
            Path::new("sub").join("inner.txt").to_string_lossy().to_string(),
            "top.txt".to_string(),
        ];
        assert_eq!(listing, expected);
    }

    #[tokio::test]
    async fn test_list_rejects_missing_and_files() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        write_file(&file, "data").await.unwrap();

        assert!(matches!(
            list_dir(&dir.path().join("nope")).await,
            Err(OpError::NotFound(_))
        ));
        assert!(matches!(
            list_dir(&file).await,
            Err(OpError::NotADirectory(_))
        ));
    }
}
