use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

/// Expand a leading `~` or `$HOME` to the user's home directory.
///
/// `~user` forms and embedded variables are passed through untouched; the
/// paths this driver handles (identity files, the ControlPath directory)
/// only ever use the two simple spellings.
pub(crate) fn expand_user(path: &str) -> PathBuf {
    let rest = if let Some(rest) = path.strip_prefix('~') {
        rest
    } else if let Some(rest) = path.strip_prefix("$HOME") {
        rest
    } else {
        return PathBuf::from(path);
    };

    if !rest.is_empty() && !rest.starts_with('/') {
        return PathBuf::from(path);
    }

    match dirs::home_dir() {
        Some(home) => home.join(rest.trim_start_matches('/')),
        None => PathBuf::from(path),
    }
}

/// Create `path` (and any missing parents) with the given mode.
///
/// An already-existing directory is fine: concurrent first invocations may
/// race to create the ControlPath directory, and the filesystem settles who
/// wins.
pub(crate) fn makedirs_safe(path: &Path, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
}

/// Whether the current process may write into `path`.
pub(crate) fn is_writable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::W_OK).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde_and_home() {
        let home = dirs::home_dir().expect("no home dir in test environment");

        assert_eq!(expand_user("~"), home);
        assert_eq!(expand_user("~/.ansible/cp"), home.join(".ansible/cp"));
        assert_eq!(expand_user("$HOME/.ansible/cp"), home.join(".ansible/cp"));
    }

    #[test]
    fn leaves_other_paths_alone() {
        assert_eq!(expand_user("/var/tmp"), PathBuf::from("/var/tmp"));
        assert_eq!(expand_user("~otheruser/x"), PathBuf::from("~otheruser/x"));
        assert_eq!(expand_user("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn makedirs_tolerates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b");

        makedirs_safe(&target, 0o700).unwrap();
        makedirs_safe(&target, 0o700).unwrap();

        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        assert!(is_writable(&target));
    }
}
