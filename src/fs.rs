use std::fs;
use std::io;
use std::path::Path;

/// Write a file holding secrets with owner-only permissions (0600 on Unix).
///
/// On non-Unix platforms, writes the file without special permission settings.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_private_file(path: &Path, content: &[u8]) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        // `mode` only applies on creation; tighten files written by older versions.
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        file.write_all(content)?;
    }
    #[cfg(not(unix))]
    {
        fs::write(path, content)?;
    }
    Ok(())
}

/// Mark `path` executable by its owner (0700 on Unix).
///
/// # Errors
///
/// Returns an error if the permissions cannot be changed.
pub fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Remove `path` if present. A symlink is removed itself, never followed.
///
/// # Errors
///
/// Returns any error other than `NotFound`.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Create `dir` and its parents, restricting `dir` to its owner (0700 on Unix).
///
/// # Errors
///
/// Returns an error if the directory cannot be created or its permissions set.
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `content` to a file this call creates, owner-executable (0700 on
/// Unix). Whatever was at `path` before is unlinked first; the create is
/// exclusive, so a symlink planted in between fails the call instead of
/// redirecting the write.
///
/// # Errors
///
/// Returns an error if the old entry cannot be removed or the new file cannot
/// be created or written.
pub fn write_new_executable(path: &Path, content: &[u8]) -> io::Result<()> {
    use std::io::Write;
    remove_if_exists(path)?;
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o700);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

/// Copy a binary to `dst`, unlinking any existing file first so a running
/// process holding the old inode is unaffected.
///
/// # Errors
///
/// Returns an error if `src` is not a regular file or any filesystem step fails.
pub fn replace_binary(src: &Path, dst: &Path) -> io::Result<()> {
    if !fs::metadata(src)?.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", src.display()),
        ));
    }
    remove_if_exists(dst)?;
    fs::copy(src, dst)?;
    make_executable(dst)
}
