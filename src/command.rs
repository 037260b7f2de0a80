use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use once_cell::sync::OnceCell;

use crate::config::{GlobalConfig, HostOverrides};
use crate::context::PlayContext;
use crate::diag::Diagnostics;
use crate::error::Error;
use crate::paths;

/// Which OpenSSH client program a command is composed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binary {
    /// The remote login client.
    Ssh,
    /// The secure copy client.
    Scp,
    /// The interactive file transfer client.
    Sftp,
}

impl Binary {
    fn as_str(self) -> &'static str {
        match self {
            Binary::Ssh => "ssh",
            Binary::Scp => "scp",
            Binary::Sftp => "sftp",
        }
    }
}

/// A fully composed client invocation.
///
/// The argument vector is final: nothing mutates it between here and
/// `exec`. Next to the vector ride the two out-of-band artefacts argument
/// composition may have produced: the pipe `sshpass` reads the password
/// from, and the knowledge that this invocation uses a persistent control
/// master.
#[derive(Debug)]
pub struct SshCommand {
    pub(crate) argv: Vec<String>,
    pub(crate) sshpass_pipe: Option<(OwnedFd, OwnedFd)>,
    pub(crate) persistent: bool,
}

impl SshCommand {
    /// The argument vector, starting with the program name.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Whether this invocation runs through a persistent control master.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

/// Composes argument vectors from the layered configuration.
///
/// OpenSSH honours the first occurrence of an `-o` option, so precedence
/// between configuration layers is expressed purely by insertion order;
/// the build is deterministic for identical inputs.
pub(crate) struct CommandBuilder<'a> {
    pub(crate) ctx: &'a PlayContext,
    pub(crate) overrides: &'a HostOverrides,
    pub(crate) cfg: &'a GlobalConfig,
    pub(crate) diag: &'a dyn Diagnostics,
}

impl CommandBuilder<'_> {
    pub(crate) fn build(&self, binary: Binary, extras: &[&str]) -> Result<SshCommand, Error> {
        let mut argv = Vec::new();
        let mut sshpass_pipe = None;

        // Password authentication runs the client under sshpass, which
        // reads the password from an inherited descriptor.
        if self.ctx.password.is_some() {
            if !sshpass_available() {
                return Err(Error::Configuration(
                    "to use password authentication, the sshpass program must be installed"
                        .to_string(),
                ));
            }
            let (read, write) = nix::unistd::pipe().map_err(|e| {
                Error::Configuration(format!("failed to open a pipe for sshpass: {}", e))
            })?;
            argv.push("sshpass".to_string());
            argv.push(format!("-d{}", read.as_raw_fd()));
            sshpass_pipe = Some((read, write));
        }

        argv.push(binary.as_str().to_string());

        // Batch mode lets us catch failed sftp transfers through the exit
        // code.
        if binary == Binary::Sftp && self.cfg.sftp_batch_mode {
            argv.push("-b".to_string());
            argv.push("-".to_string());
        } else if binary == Binary::Ssh {
            argv.push("-C".to_string());
        }

        if self.ctx.verbosity > 3 {
            argv.push("-vvv".to_string());
        } else if binary == Binary::Ssh {
            // Older sftp releases reject -q.
            argv.push("-q".to_string());
        }

        if let Some(args) = non_empty(&self.overrides.ssh_args) {
            self.add_args(&mut argv, "inventory set ansible_ssh_args", split_args(args)?);
        } else if let Some(args) = non_empty(&self.cfg.ssh_args) {
            self.add_args(&mut argv, "configured ssh_args", split_args(args)?);
        } else {
            self.add_args(
                &mut argv,
                "default arguments",
                vec![
                    "-o".to_string(),
                    "ControlMaster=auto".to_string(),
                    "-o".to_string(),
                    "ControlPersist=60s".to_string(),
                ],
            );
        }

        if !self.cfg.host_key_checking {
            self.add_args(
                &mut argv,
                "host key checking disabled",
                vec!["-o".to_string(), "StrictHostKeyChecking=no".to_string()],
            );
        }

        if let Some(port) = self.ctx.port {
            self.add_args(
                &mut argv,
                "remote port set",
                vec!["-o".to_string(), format!("Port={}", port)],
            );
        }

        if let Some(key) = &self.ctx.private_key_file {
            let expanded = paths::expand_user(&key.to_string_lossy());
            self.add_args(
                &mut argv,
                "private key file set",
                vec![
                    "-o".to_string(),
                    format!("IdentityFile=\"{}\"", expanded.display()),
                ],
            );
        }

        if self.ctx.password.is_none() {
            self.add_args(
                &mut argv,
                "no password set",
                vec![
                    "-o".to_string(),
                    "KbdInteractiveAuthentication=no".to_string(),
                    "-o".to_string(),
                    "PreferredAuthentications=gssapi-with-mic,gssapi-keyex,hostbased,publickey"
                        .to_string(),
                    "-o".to_string(),
                    "PasswordAuthentication=no".to_string(),
                ],
            );
        }

        if let Some(user) = &self.ctx.remote_user {
            if effective_user().as_deref() != Some(user.as_str()) {
                self.add_args(
                    &mut argv,
                    "remote user differs from local user",
                    vec!["-o".to_string(), format!("User={}", user)],
                );
            }
        }

        self.add_args(
            &mut argv,
            "connection timeout set",
            vec![
                "-o".to_string(),
                format!("ConnectTimeout={}", self.ctx.timeout),
            ],
        );

        // Caller-supplied extra arguments shadow the inventory's.
        if let Some(extra) = non_empty(&self.ctx.ssh_extra_args) {
            self.add_args(&mut argv, "caller added ssh_extra_args", split_args(extra)?);
        } else if let Some(extra) = non_empty(&self.overrides.ssh_extra_args) {
            self.add_args(
                &mut argv,
                "inventory added ansible_ssh_extra_args",
                split_args(extra)?,
            );
        }

        // If some layer turned ControlPersist on without saying where the
        // control sockets go, pick the spot ourselves.
        let cp_in_use = argv.iter().any(|a| a.contains("ControlPersist"));
        let cp_path_set = argv.iter().any(|a| a.contains("ControlPath"));

        if cp_in_use && !cp_path_set {
            let dir = paths::expand_user(&self.cfg.control_path_dir);
            self.add_args(
                &mut argv,
                "found only ControlPersist; added ControlPath",
                vec![
                    "-o".to_string(),
                    format!(
                        "ControlPath={}",
                        render_control_path(&self.cfg.control_path, &dir)
                    ),
                ],
            );

            paths::makedirs_safe(&dir, 0o700).map_err(|e| {
                Error::Configuration(format!(
                    "cannot create ControlPath directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            if !paths::is_writable(&dir) {
                return Err(Error::Configuration(format!(
                    "cannot write to ControlPath {}",
                    dir.display()
                )));
            }
        }

        for extra in extras {
            argv.push((*extra).to_string());
        }

        Ok(SshCommand {
            argv,
            sshpass_pipe,
            persistent: cp_in_use,
        })
    }

    fn add_args(&self, argv: &mut Vec<String>, reason: &str, args: Vec<String>) {
        self.diag.vvvvv(
            &format!("SSH: {}: ({})", reason, args.join(")(")),
            Some(&self.ctx.remote_addr),
        );
        argv.extend(args);
    }
}

/// Shell-like split of a free-form argument string, dropping empty tokens.
fn split_args(argstring: &str) -> Result<Vec<String>, Error> {
    let tokens = shlex::split(argstring).ok_or_else(|| {
        Error::Configuration(format!("unbalanced quoting in ssh arguments: {}", argstring))
    })?;
    Ok(tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn render_control_path(template: &str, dir: &Path) -> String {
    template
        .replace("%(directory)s", &dir.to_string_lossy())
        .replace("%%", "%")
}

fn effective_user() -> Option<String> {
    nix::unistd::User::from_uid(nix::unistd::geteuid())
        .ok()
        .flatten()
        .map(|user| user.name)
}

/// Whether `sshpass` exists on PATH. Probed once per process; the answer is
/// a function of the host environment and does not change underneath us.
fn sshpass_available() -> bool {
    static SSHPASS_AVAILABLE: OnceCell<bool> = OnceCell::new();

    *SSHPASS_AVAILABLE.get_or_init(|| {
        std::process::Command::new("sshpass")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok()
    })
}
