use std::io::{self, Write as _};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process;

use crate::command::SshCommand;
use crate::error::Error;

/// Writable handle to the child's stdin: the pty master when one could be
/// allocated, a plain pipe otherwise. Dropping it closes the stream.
#[derive(Debug)]
pub(crate) enum StdinHandle {
    Pty(tokio::fs::File),
    Piped(process::ChildStdin),
}

impl StdinHandle {
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            StdinHandle::Pty(f) => {
                f.write_all(data).await?;
                f.flush().await
            }
            StdinHandle::Piped(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
        }
    }
}

/// A spawned client process with its three streams.
#[derive(Debug)]
pub(crate) struct Child {
    pub(crate) proc: process::Child,
    pub(crate) stdin: Option<StdinHandle>,
    pub(crate) stdout: process::ChildStdout,
    pub(crate) stderr: process::ChildStderr,
}

/// Spawn the composed command.
///
/// Without pipelined input we give the child a real pty for stdin so the
/// client does not trip over `tcgetattr`; if no pty can be had, we fall
/// back to a plain pipe without complaint. With pipelined input a pipe is
/// what we want in the first place.
///
/// If the command carries an sshpass pipe, the password is written into it
/// here: the read end must be gone from this process before the child uses
/// it, and the write end is used exactly once.
pub(crate) fn spawn(
    cmd: &mut SshCommand,
    password: Option<&str>,
    pipelined: bool,
) -> Result<Child, Error> {
    let mut spawned = None;

    if !pipelined {
        if let Ok(pty) = nix::pty::openpty(None, None) {
            let mut command = base_command(&cmd.argv);
            command.stdin(Stdio::from(pty.slave));
            if let Ok(child) = command.spawn() {
                let master = tokio::fs::File::from_std(std::fs::File::from(pty.master));
                spawned = Some((child, Some(StdinHandle::Pty(master))));
            }
        }
    }

    let (mut proc, stdin) = match spawned {
        Some(pair) => pair,
        None => {
            let mut command = base_command(&cmd.argv);
            command.stdin(Stdio::piped());
            let mut child = command.spawn().map_err(Error::ChildIo)?;
            let stdin = child.stdin.take().map(StdinHandle::Piped);
            (child, stdin)
        }
    };

    if let Some((read, write)) = cmd.sshpass_pipe.take() {
        drop(read);
        if let Some(password) = password {
            let mut fh = std::fs::File::from(write);
            fh.write_all(password.as_bytes())
                .and_then(|_| fh.write_all(b"\n"))
                .map_err(|e| {
                    Error::ConnectionFailure(format!("failed to pass the password to sshpass: {}", e))
                })?;
        }
    }

    let stdout = proc.stdout.take().ok_or_else(|| missing_stream("stdout"))?;
    let stderr = proc.stderr.take().ok_or_else(|| missing_stream("stderr"))?;

    Ok(Child {
        proc,
        stdin,
        stdout,
        stderr,
    })
}

fn base_command(argv: &[String]) -> process::Command {
    let mut command = process::Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

fn missing_stream(name: &str) -> Error {
    Error::ChildIo(io::Error::new(
        io::ErrorKind::Other,
        format!("child {} was not captured", name),
    ))
}
