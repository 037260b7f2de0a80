use std::path::PathBuf;

/// Everything the driver needs to know about one remote target.
///
/// This is plain data handed in by the caller; the driver never mutates it.
/// Only [`remote_addr`](Self::remote_addr) is required, the rest defaults to
/// "let the client and its configuration decide".
#[derive(Debug, Clone)]
pub struct PlayContext {
    /// Host name or address to connect to.
    pub remote_addr: String,

    /// Log in as this user. Only passed to the client when it differs from
    /// the effective local user.
    pub remote_user: Option<String>,

    /// TCP port, when not the client's default.
    pub port: Option<u16>,

    /// Identity file (`-o IdentityFile`), `~`-expanded before use.
    pub private_key_file: Option<PathBuf>,

    /// Connection password. Setting this switches the invocation to
    /// `sshpass`-fed password authentication.
    pub password: Option<String>,

    /// Connect timeout in seconds; doubles as the privilege-escalation
    /// negotiation deadline.
    pub timeout: u64,

    /// Caller verbosity. Above 3, the clients run with `-vvv`.
    pub verbosity: u32,

    /// Password prompt the become method will print, e.g.
    /// `[sudo] password:`. Setting this makes the driver wait for the
    /// prompt before anything else.
    pub prompt: Option<String>,

    /// Marker line the become wrapper emits once escalation succeeded.
    pub success_key: Option<String>,

    /// Run the remote command through a privilege escalation method.
    pub become_enabled: bool,

    /// Which escalation method, e.g. `sudo`. Used to pick the error-line
    /// predicates and to word failure messages.
    pub become_method: String,

    /// Password answered to the escalation prompt.
    pub become_pass: Option<String>,

    /// Extra client arguments supplied by the caller. Takes precedence over
    /// any inventory-supplied extra arguments.
    pub ssh_extra_args: Option<String>,
}

impl PlayContext {
    /// A context for `remote_addr` with every knob at its default.
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            remote_user: None,
            port: None,
            private_key_file: None,
            password: None,
            timeout: 10,
            verbosity: 0,
            prompt: None,
            success_key: None,
            become_enabled: false,
            become_method: "sudo".to_string(),
            become_pass: None,
            ssh_extra_args: None,
        }
    }
}
