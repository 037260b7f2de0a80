use std::borrow::Cow;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::escalate::BecomePredicates;
use crate::command::{Binary, CommandBuilder, SshCommand};
use crate::config::{GlobalConfig, HostOverrides, HostVarSource};
use crate::context::PlayContext;
use crate::diag::{Diagnostics, TracingDiagnostics};
use crate::error::Error;
use crate::runner::{CommandOutput, Runner};

/// A connection to a single remote host, executed through the OpenSSH
/// command-line clients.
///
/// There is no connect-time handshake: each operation invokes `ssh`, `scp`
/// or `sftp` afresh, and persistent connections are the client's own
/// business via its `ControlMaster` multiplexing. Because everything runs
/// through the stock clients, the user's existing configuration (e.g.
/// `.ssh/config`) keeps working unchanged.
///
/// [`exec_command`](Connection::exec_command) runs a remote command,
/// negotiating a privilege-escalation prompt on the way when the
/// [`PlayContext`] asks for one, and retries transport failures with
/// exponential backoff. [`put_file`](Connection::put_file) and
/// [`fetch_file`](Connection::fetch_file) transfer files in either
/// direction.
#[derive(Debug)]
pub struct Connection {
    ctx: PlayContext,
    cfg: GlobalConfig,
    overrides: HostOverrides,
    predicates: BecomePredicates,
    diag: Arc<dyn Diagnostics>,
    connected: bool,
}

impl Connection {
    /// A connection for `ctx` under `cfg`, logging through [`tracing`].
    pub fn new(ctx: PlayContext, cfg: GlobalConfig) -> Self {
        Self::with_diagnostics(ctx, cfg, Arc::new(TracingDiagnostics))
    }

    /// Like [`new`](Connection::new), but with a caller-supplied diagnostic
    /// sink.
    pub fn with_diagnostics(
        ctx: PlayContext,
        cfg: GlobalConfig,
        diag: Arc<dyn Diagnostics>,
    ) -> Self {
        let predicates = BecomePredicates::for_method(
            &ctx.become_method,
            ctx.prompt.as_deref(),
            ctx.success_key.as_deref(),
        );
        Self {
            ctx,
            cfg,
            overrides: HostOverrides::default(),
            predicates,
            diag,
            connected: false,
        }
    }

    /// Replace the escalation line predicates, for become methods the stock
    /// set does not know.
    pub fn with_become_predicates(mut self, predicates: BecomePredicates) -> Self {
        self.predicates = predicates;
        self
    }

    /// Pick up this host's inventory overrides (`ansible_ssh_args`,
    /// `ansible_ssh_extra_args`).
    pub fn set_host_overrides(&mut self, host: &dyn HostVarSource) {
        self.overrides = HostOverrides::from_vars(&host.get_vars());
    }

    /// Mark the connection established. The clients own all actual
    /// connection management, so there is nothing else to do.
    pub fn connect(&mut self) {
        self.connected = true;
    }

    /// Whether [`connect`](Connection::connect) has been called without a
    /// [`close`](Connection::close) since.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Drop the connection mark.
    ///
    /// A running ControlPersist master could be asked to stop here, but
    /// callers currently close after every task, so the master is left to
    /// expire on its own.
    pub fn close(&mut self) {
        self.connected = false;
    }

    /// Compose the full argument vector for one invocation of `binary`,
    /// with `extras` appended verbatim at the end.
    ///
    /// Exposed mainly so callers can inspect exactly what would run; the
    /// vector is deterministic for identical inputs.
    pub fn build_command(&self, binary: Binary, extras: &[&str]) -> Result<SshCommand, Error> {
        CommandBuilder {
            ctx: &self.ctx,
            overrides: &self.overrides,
            cfg: &self.cfg,
            diag: self.diag.as_ref(),
        }
        .build(binary, extras)
    }

    /// Run `cmd` on the remote host.
    ///
    /// `in_data` is pipelined into the remote command's stdin; without it,
    /// the remote side gets a tty (`-tt`). `sudoable` enables the
    /// escalation error predicates during negotiation.
    ///
    /// Transport failures (exit code 255, and any runtime error) are
    /// retried up to the configured budget with exponential backoff; the
    /// final attempt's outcome is returned as-is. A non-zero exit code of
    /// the remote program is not an error here: it comes back in the
    /// [`CommandOutput`].
    pub async fn exec_command(
        &self,
        cmd: &str,
        in_data: Option<&[u8]>,
        sudoable: bool,
    ) -> Result<CommandOutput, Error> {
        with_retries(self.cfg.retries, self.diag.as_ref(), cmd, || {
            self.exec_command_once(cmd, in_data, sudoable)
        })
        .await
    }

    async fn exec_command_once(
        &self,
        cmd: &str,
        in_data: Option<&[u8]>,
        sudoable: bool,
    ) -> Result<CommandOutput, Error> {
        self.diag.vvv(
            &format!(
                "ESTABLISH SSH CONNECTION FOR USER: {}",
                self.ctx.remote_user.as_deref().unwrap_or_default()
            ),
            Some(&self.ctx.remote_addr),
        );

        if self.ctx.become_enabled
            && !self
                .cfg
                .become_methods
                .iter()
                .any(|m| m == &self.ctx.become_method)
        {
            return Err(Error::Configuration(format!(
                "privilege escalation method {} is not supported by this connection",
                self.ctx.become_method
            )));
        }

        // A tty would put the remote end into interactive mode, which
        // pipelined payloads cannot survive; request one only when there is
        // nothing to pipe.
        let command = if in_data.is_some() {
            self.build_command(Binary::Ssh, &[self.ctx.remote_addr.as_str(), cmd])?
        } else {
            self.build_command(Binary::Ssh, &["-tt", self.ctx.remote_addr.as_str(), cmd])?
        };

        self.runner().run(command, in_data, sudoable).await
    }

    /// Copy a local file to the remote host.
    ///
    /// Uses `sftp` with a pipelined `put` command, or plain `scp` when the
    /// configuration prefers it.
    pub async fn put_file(&self, in_path: &Path, out_path: &str) -> Result<(), Error> {
        self.diag.vvv(
            &format!("PUT {} TO {}", in_path.display(), out_path),
            Some(&self.ctx.remote_addr),
        );

        if !in_path.exists() {
            return Err(Error::FileNotFound(in_path.to_path_buf()));
        }

        let host = bracketed(&self.ctx.remote_addr);
        let local = in_path.to_string_lossy();

        let (command, in_data) = if self.cfg.scp_if_ssh {
            let target = format!("{}:{}", host, quote(out_path));
            (
                self.build_command(Binary::Scp, &[local.as_ref(), target.as_str()])?,
                None,
            )
        } else {
            let line = transfer_command("put", local.as_ref(), out_path);
            (
                self.build_command(Binary::Sftp, &[host.as_str()])?,
                Some(line.into_bytes()),
            )
        };

        let out = self.runner().run(command, in_data.as_deref(), true).await?;
        if out.code != 0 {
            return Err(transfer_failed(out_path, out));
        }
        Ok(())
    }

    /// Copy a remote file to the local host.
    pub async fn fetch_file(&self, in_path: &str, out_path: &Path) -> Result<(), Error> {
        self.diag.vvv(
            &format!("FETCH {} TO {}", in_path, out_path.display()),
            Some(&self.ctx.remote_addr),
        );

        let host = bracketed(&self.ctx.remote_addr);
        let local = out_path.to_string_lossy();

        let (command, in_data) = if self.cfg.scp_if_ssh {
            let source = format!("{}:{}", host, quote(in_path));
            (
                self.build_command(Binary::Scp, &[source.as_str(), local.as_ref()])?,
                None,
            )
        } else {
            let line = transfer_command("get", in_path, local.as_ref());
            (
                self.build_command(Binary::Sftp, &[host.as_str()])?,
                Some(line.into_bytes()),
            )
        };

        let out = self.runner().run(command, in_data.as_deref(), true).await?;
        if out.code != 0 {
            return Err(transfer_failed(in_path, out));
        }
        Ok(())
    }

    fn runner(&self) -> Runner<'_> {
        Runner {
            ctx: &self.ctx,
            cfg: &self.cfg,
            predicates: &self.predicates,
            diag: self.diag.as_ref(),
        }
    }
}

/// The retry shell around one command: `retries + 1` attempts in total,
/// re-attempting on exit code 255 and on any retryable error, pausing
/// `min(30, 2^attempt - 1)` seconds in between. The last attempt's outcome
/// is returned verbatim.
async fn with_retries<F, Fut>(
    retries: u32,
    diag: &dyn Diagnostics,
    label: &str,
    mut attempt_fn: F,
) -> Result<CommandOutput, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CommandOutput, Error>>,
{
    let attempts = retries + 1;
    let mut attempt = 0;

    loop {
        let last = attempt + 1 >= attempts;
        let pause = retry_pause(attempt);

        match attempt_fn().await {
            Ok(out) if out.code != 255 || last => return Ok(out),
            Ok(_) => diag.vv(&format!(
                "ssh_retry: attempt {}: ssh returned 255 for ({}...), pausing for {}s",
                attempt,
                label,
                pause.as_secs()
            )),
            Err(err) if !err.is_retryable() || last => return Err(err),
            Err(err) => diag.vv(&format!(
                "ssh_retry: attempt {}: caught error ({}) from ({}...), pausing for {}s",
                attempt,
                err,
                label,
                pause.as_secs()
            )),
        }

        sleep(pause).await;
        attempt += 1;
    }
}

fn retry_pause(attempt: u32) -> Duration {
    let pause = (1u64 << attempt.min(6)) - 1;
    Duration::from_secs(pause.min(30))
}

/// scp and sftp require square brackets around IPv6 addresses, and accept
/// them for hostnames and IPv4 addresses too.
fn bracketed(host: &str) -> String {
    format!("[{}]", host)
}

fn quote(s: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(s)).into_owned()
}

fn transfer_command(op: &str, first: &str, second: &str) -> String {
    format!("{} {} {}\n", op, quote(first), quote(second))
}

fn transfer_failed(path: &str, out: CommandOutput) -> Error {
    Error::TransferFailed {
        path: PathBuf::from(path),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::RecordingDiagnostics;
    use std::cell::Cell;

    fn output(code: i32, stdout: &[u8]) -> CommandOutput {
        CommandOutput {
            code,
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
        }
    }

    #[test]
    fn backoff_is_capped_exponential() {
        let secs: Vec<u64> = (0..7).map(|a| retry_pause(a).as_secs()).collect();
        assert_eq!(secs, [0, 1, 3, 7, 15, 30, 30]);
    }

    #[tokio::test]
    async fn retries_a_transport_failure_once() {
        let diag = RecordingDiagnostics::default();
        let calls = Cell::new(0u32);

        let out = with_retries(3, &diag, "echo hi", || {
            let n = calls.get();
            calls.set(n + 1);
            async move {
                if n == 0 {
                    Ok(output(255, b""))
                } else {
                    Ok(output(0, b"ok\n"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.get(), 2);
        assert_eq!(out.code, 0);
        assert_eq!(out.stdout, b"ok\n");
        assert!(diag.lines().iter().any(|l| l.contains("ssh_retry")));
    }

    #[tokio::test]
    async fn configuration_errors_are_not_retried() {
        let diag = RecordingDiagnostics::default();
        let calls = Cell::new(0u32);

        let err = with_retries(3, &diag, "echo hi", || {
            calls.set(calls.get() + 1);
            async { Err(Error::Configuration("sshpass missing".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 1);
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_the_last_outcome() {
        let diag = RecordingDiagnostics::default();
        let calls = Cell::new(0u32);

        let err = with_retries(1, &diag, "echo hi", || {
            calls.set(calls.get() + 1);
            async { Err(Error::ConnectionFailure("unreachable".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 2);
        assert!(matches!(err, Error::ConnectionFailure(_)));
    }

    #[tokio::test]
    async fn exhausted_255_comes_back_as_output() {
        let diag = RecordingDiagnostics::default();

        let out = with_retries(1, &diag, "echo hi", || async { Ok(output(255, b"")) })
            .await
            .unwrap();
        assert_eq!(out.code, 255);
    }

    #[test]
    fn transfer_command_quotes_paths() {
        assert_eq!(transfer_command("put", "/a", "/b c"), "put /a '/b c'\n");
        assert_eq!(
            transfer_command("get", "/remote file", "/local file"),
            "get '/remote file' '/local file'\n"
        );
    }

    #[tokio::test]
    async fn upload_of_a_missing_file_fails_early() {
        let conn = Connection::new(PlayContext::new("h1"), GlobalConfig::default());
        let err = conn
            .put_file(Path::new("/definitely/not/here"), "/tmp/x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_become_method_is_a_configuration_error() {
        let mut ctx = PlayContext::new("h1");
        ctx.become_enabled = true;
        ctx.become_method = "runas".to_string();
        let conn = Connection::new(ctx, GlobalConfig::default());

        let err = conn.exec_command("whoami", None, true).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
