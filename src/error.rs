use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors that occur while driving the OpenSSH client programs.
///
/// Since we are wrapping `ssh`, `scp` and `sftp`, which in turn talk to a
/// remote host we do not control, most failures can only be diagnosed from
/// the child's exit code and whatever it printed to stderr. The variants
/// below are the cases we can tell apart reliably; everything else comes
/// back to the caller as a non-zero exit code in
/// [`CommandOutput`](crate::CommandOutput).
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The local host cannot support the requested invocation, e.g. the
    /// `sshpass` program is missing, or the ControlPath directory cannot be
    /// created or written.
    Configuration(String),

    /// The local file given to [`put_file`](crate::Connection::put_file)
    /// does not exist.
    FileNotFound(PathBuf),

    /// The privilege escalation prompt (or success marker) did not show up
    /// within the negotiation deadline.
    EscalationTimeout {
        /// The deadline that expired, in seconds.
        timeout: u64,
        /// Output accumulated up to the point the child was terminated.
        output: String,
    },

    /// Privilege escalation was refused: wrong become password, a missing
    /// one, or an unexpected repeated prompt.
    EscalationFailed(String),

    /// The connection itself failed: the client exited with 255 while we
    /// were pipelining data, or we could not write to its stdin at all.
    ConnectionFailure(String),

    /// The installed client is too old for an option we rely on
    /// (`ControlPersist`).
    VersionIncompatibility(String),

    /// `sshpass` exited with code 6: it cannot answer an interactive
    /// host-key prompt, which is what strict host-key checking produces for
    /// an unknown host.
    HostKeyWithPassword,

    /// `scp`/`sftp` exited non-zero while transferring a file.
    TransferFailed {
        /// The remote path the transfer was about.
        path: PathBuf,
        /// Everything the client printed to stdout.
        stdout: String,
        /// Everything the client printed to stderr.
        stderr: String,
    },

    /// IO error while spawning the child or shuffling bytes through its
    /// pipes.
    ChildIo(io::Error),
}

impl Error {
    /// Whether another attempt could plausibly succeed. Pre-spawn failures
    /// (missing sshpass, missing upload source) will recur identically and
    /// are excluded; everything that involves the network is fair game for
    /// the retry policy.
    pub(crate) fn is_retryable(&self) -> bool {
        !matches!(self, Error::Configuration(_) | Error::FileNotFound(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "{}", msg),
            Error::FileNotFound(path) => {
                write!(f, "file or module does not exist: {}", path.display())
            }
            Error::EscalationTimeout { timeout, output } => write!(
                f,
                "Timeout ({}s) waiting for privilege escalation prompt: {}",
                timeout, output
            ),
            Error::EscalationFailed(msg) => write!(f, "{}", msg),
            Error::ConnectionFailure(msg) => write!(f, "{}", msg),
            Error::VersionIncompatibility(msg) => write!(f, "{}", msg),
            Error::HostKeyWithPassword => write!(
                f,
                "using an SSH password instead of a key is not possible because host key \
                 checking is enabled and sshpass does not support this; add this host's \
                 fingerprint to your known_hosts file to manage this host"
            ),
            Error::TransferFailed {
                path,
                stdout,
                stderr,
            } => write!(
                f,
                "failed to transfer file {}:\n{}\n{}",
                path.display(),
                stdout,
                stderr
            ),
            Error::ChildIo(_) => {
                write!(f, "failure while driving the ssh child process")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ChildIo(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::ChildIo(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn error_sanity() {
        let ioe = || io::Error::new(io::ErrorKind::Other, "test");

        let e = Error::ChildIo(ioe());
        assert!(!format!("{}", e).is_empty());
        let source = e
            .source()
            .expect("source missing")
            .downcast_ref::<io::Error>()
            .expect("source not io");
        assert_eq!(source.kind(), io::ErrorKind::Other);

        let e = Error::FileNotFound(PathBuf::from("/no/such/file"));
        assert!(format!("{}", e).contains("/no/such/file"));
        assert!(e.source().is_none());
    }

    #[test]
    fn retryability() {
        assert!(!Error::Configuration("x".into()).is_retryable());
        assert!(!Error::FileNotFound(PathBuf::from("/x")).is_retryable());
        assert!(Error::ConnectionFailure("x".into()).is_retryable());
        assert!(Error::EscalationFailed("x".into()).is_retryable());
        assert!(Error::ChildIo(io::Error::new(io::ErrorKind::Other, "x")).is_retryable());
    }
}
