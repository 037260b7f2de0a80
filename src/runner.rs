use std::borrow::Cow;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time;

use crate::child::{self, Child, StdinHandle};
use crate::command::SshCommand;
use crate::config::GlobalConfig;
use crate::context::PlayContext;
use crate::diag::Diagnostics;
use crate::error::Error;
use crate::escalate::BecomePredicates;
use crate::negotiate::{NegotiationState, OutputScanner, Source};

/// What one client invocation produced.
///
/// Exit code 255 is the client reporting a transport failure; 1..254 is the
/// status of the remote program and is the caller's to interpret.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// The child's exit code.
    pub code: i32,
    /// Accumulated standard output, with negotiated prompt/success lines
    /// already stripped.
    pub stdout: Vec<u8>,
    /// Accumulated standard error.
    pub stderr: Vec<u8>,
}

/// Drives one spawned client to completion: multiplexes its output pipes,
/// walks the escalation state machine, feeds pipelined input, and turns the
/// exit into a typed outcome.
pub(crate) struct Runner<'a> {
    pub(crate) ctx: &'a PlayContext,
    pub(crate) cfg: &'a GlobalConfig,
    pub(crate) predicates: &'a BecomePredicates,
    pub(crate) diag: &'a dyn Diagnostics,
}

enum Event {
    Stdout(std::io::Result<usize>),
    Stderr(std::io::Result<usize>),
    Empty,
}

impl Runner<'_> {
    pub(crate) async fn run(
        &self,
        mut cmd: SshCommand,
        in_data: Option<&[u8]>,
        sudoable: bool,
    ) -> Result<CommandOutput, Error> {
        let display: Vec<String> = cmd
            .argv
            .iter()
            .map(|a| shell_escape::unix::escape(Cow::Borrowed(a.as_str())).into_owned())
            .collect();
        self.diag
            .vvv(&format!("EXEC {}", display.join(" ")), Some(&self.ctx.remote_addr));

        let pipelined = in_data.is_some();
        let mut child = child::spawn(&mut cmd, self.ctx.password.as_deref(), pipelined)?;

        // Escalation can only be negotiated on an ssh invocation; scp and
        // sftp go straight to sending.
        let mut state = NegotiationState::ReadyToSend;
        if cmd.argv.iter().any(|a| a == "ssh") {
            if let Some(prompt) = &self.ctx.prompt {
                state = NegotiationState::AwaitingPrompt;
                self.diag
                    .debug(&format!("Initial state: {}: {}", state.name(), prompt));
            } else if self.ctx.become_enabled {
                if let Some(key) = &self.ctx.success_key {
                    state = NegotiationState::AwaitingEscalation;
                    self.diag
                        .debug(&format!("Initial state: {}: {}", state.name(), key));
                }
            }
        }

        if state == NegotiationState::ReadyToSend && pipelined {
            if let Some(data) = in_data {
                send_initial_data(&mut child.stdin, data, self.diag).await?;
            }
            state.advance();
        }

        let mut scanner = OutputScanner::new(
            self.predicates,
            self.ctx.prompt.is_some(),
            self.ctx.success_key.is_some(),
            sudoable,
        );
        let mut stdout_acc: Vec<u8> = Vec::new();
        let mut stderr_acc: Vec<u8> = Vec::new();

        let mut poll_timeout = Duration::from_secs(self.ctx.timeout);
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut exit_status = None;
        let mut obuf = vec![0u8; 8192];
        let mut ebuf = vec![0u8; 8192];

        loop {
            let event = if stdout_open || stderr_open {
                let readable = async {
                    tokio::select! {
                        r = child.stdout.read(&mut obuf), if stdout_open => Event::Stdout(r),
                        r = child.stderr.read(&mut ebuf), if stderr_open => Event::Stderr(r),
                    }
                };
                time::timeout(poll_timeout, readable)
                    .await
                    .unwrap_or(Event::Empty)
            } else {
                Event::Empty
            };
            let poll_empty = matches!(event, Event::Empty);

            // The deadline only matters while a prompt or escalation answer
            // is still outstanding; after that the child may take as long
            // as it likes.
            if poll_empty && state <= NegotiationState::AwaitingEscalation {
                terminate(&child);
                return Err(Error::EscalationTimeout {
                    timeout: self.ctx.timeout,
                    output: String::from_utf8_lossy(&stdout_acc).into_owned(),
                });
            }

            match event {
                Event::Stdout(read) => {
                    let n = read.map_err(Error::ChildIo)?;
                    if n == 0 {
                        stdout_open = false;
                    }
                    let chunk = &obuf[..n];
                    self.diag.debug(&format!(
                        "stdout chunk (state={}):\n>>>{}<<<\n",
                        state.name(),
                        String::from_utf8_lossy(chunk)
                    ));
                    if state < NegotiationState::ReadyToSend {
                        let visible = scanner.scan(Source::Stdout, state, chunk, self.diag);
                        stdout_acc.extend_from_slice(&visible);
                    } else {
                        stdout_acc.extend(scanner.take_remainder(Source::Stdout));
                        stdout_acc.extend_from_slice(chunk);
                    }
                }
                Event::Stderr(read) => {
                    let n = read.map_err(Error::ChildIo)?;
                    if n == 0 {
                        stderr_open = false;
                    }
                    let chunk = &ebuf[..n];
                    self.diag.debug(&format!(
                        "stderr chunk (state={}):\n>>>{}<<<\n",
                        state.name(),
                        String::from_utf8_lossy(chunk)
                    ));
                    if state < NegotiationState::ReadyToSend {
                        let visible = scanner.scan(Source::Stderr, state, chunk, self.diag);
                        stderr_acc.extend_from_slice(&visible);
                    } else {
                        stderr_acc.extend(scanner.take_remainder(Source::Stderr));
                        stderr_acc.extend_from_slice(chunk);
                    }
                }
                Event::Empty => {}
            }

            if state == NegotiationState::AwaitingPrompt && scanner.flags.become_prompt {
                self.diag.debug("Sending become_pass in response to prompt");
                let pass = self.ctx.become_pass.as_deref().unwrap_or_default();
                if let Some(stdin) = child.stdin.as_mut() {
                    stdin
                        .write_all(format!("{}\n", pass).as_bytes())
                        .await
                        .map_err(|e| {
                            Error::ConnectionFailure(format!(
                                "failed to send the become password: {}",
                                e
                            ))
                        })?;
                }
                scanner.flags.become_prompt = false;
                state.advance();
            }

            if state == NegotiationState::AwaitingEscalation {
                if scanner.flags.become_success {
                    self.diag.debug("Escalation succeeded");
                    scanner.flags.become_success = false;
                    state.advance();
                } else if scanner.flags.become_error {
                    self.diag.debug("Escalation failed");
                    terminate(&child);
                    scanner.flags.become_error = false;
                    return Err(Error::EscalationFailed(format!(
                        "Incorrect {} password",
                        self.ctx.become_method
                    )));
                } else if scanner.flags.become_nopasswd_error {
                    self.diag.debug("Escalation requires a password");
                    terminate(&child);
                    scanner.flags.become_nopasswd_error = false;
                    return Err(Error::EscalationFailed(format!(
                        "Missing {} password",
                        self.ctx.become_method
                    )));
                } else if scanner.flags.become_prompt {
                    // A repeated prompt means the password was not accepted;
                    // normally the "try again" line gets here first.
                    self.diag.debug("Escalation prompt repeated");
                    terminate(&child);
                    scanner.flags.become_prompt = false;
                    return Err(Error::EscalationFailed(format!(
                        "Incorrect {} password",
                        self.ctx.become_method
                    )));
                }
            }

            if state == NegotiationState::ReadyToSend {
                if let Some(data) = in_data {
                    send_initial_data(&mut child.stdin, data, self.diag).await?;
                }
                state.advance();
            }

            if exit_status.is_none() {
                exit_status = child.proc.try_wait().map_err(Error::ChildIo)?;
            }

            match exit_status {
                Some(_) => {
                    if (!stdout_open && !stderr_open) || poll_empty {
                        break;
                    }
                    // With ControlMaster in play, the first connection
                    // backgrounds itself and we never see EOF on stderr.
                    // Once stdout is done and the child has exited, give
                    // stderr one final zero-timeout poll.
                    if !stdout_open && stderr_open {
                        poll_timeout = Duration::ZERO;
                    }
                }
                None => {
                    if !stdout_open && !stderr_open {
                        exit_status = Some(child.proc.wait().await.map_err(Error::ChildIo)?);
                        break;
                    }
                }
            }
        }

        // Close stdin only after the child is gone and its output is fully
        // read; closing earlier loses output on some clients.
        drop(child.stdin.take());

        let status = match exit_status {
            Some(status) => status,
            None => child.proc.wait().await.map_err(Error::ChildIo)?,
        };
        let code = status.code().unwrap_or(-1);

        diagnose_exit(self.cfg, &cmd.argv, code, &stderr_acc, pipelined)?;

        Ok(CommandOutput {
            code,
            stdout: stdout_acc,
            stderr: stderr_acc,
        })
    }
}

/// Write the pipelined payload and close stdin. Closing is not optional:
/// `sftp -b -` waits for more commands until its input ends.
async fn send_initial_data(
    stdin: &mut Option<StdinHandle>,
    data: &[u8],
    diag: &dyn Diagnostics,
) -> Result<(), Error> {
    diag.debug("Sending initial data");

    let mut handle = stdin.take().ok_or_else(connection_lost)?;
    handle.write_all(data).await.map_err(|_| connection_lost())?;
    drop(handle);

    diag.debug(&format!("Sent initial data ({} bytes)", data.len()));
    Ok(())
}

fn connection_lost() -> Error {
    Error::ConnectionFailure(
        "data could not be sent to the remote host; make sure this host can be reached over ssh"
            .to_string(),
    )
}

/// Best-effort SIGTERM; a child that already exited is fine.
fn terminate(child: &Child) {
    if let Some(pid) = child.proc.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
}

/// Turn an exit code plus stderr into the failure modes we can identify.
fn diagnose_exit(
    cfg: &GlobalConfig,
    argv: &[String],
    code: i32,
    stderr: &[u8],
    pipelined: bool,
) -> Result<(), Error> {
    if cfg.host_key_checking && argv.first().map(String::as_str) == Some("sshpass") && code == 6 {
        return Err(Error::HostKeyWithPassword);
    }

    let stderr = String::from_utf8_lossy(stderr);
    if code != 0
        && (stderr.contains("Bad configuration option: ControlPersist")
            || stderr.contains("unknown configuration option: ControlPersist"))
    {
        return Err(Error::VersionIncompatibility(
            "the installed ssh does not support ControlPersist; clear the configured ssh_args \
             to fall back to the defaults"
                .to_string(),
        ));
    }

    if code == 255 && pipelined {
        return Err(connection_lost());
    }

    Ok(())
}
