use std::collections::HashMap;

/// Process-global configuration for the driver.
///
/// Nothing in this crate reads the environment; every global knob arrives
/// through this struct, and the defaults below are what you get from
/// [`GlobalConfig::default`].
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Run `sftp` in batch mode (`-b -`) so failed transfers are reported
    /// through the exit code. Disable only for clients too old to support
    /// the option.
    pub sftp_batch_mode: bool,

    /// Base ssh option string, applied when the host does not override it.
    /// `None` (or an empty string) falls back to the built-in
    /// `-o ControlMaster=auto -o ControlPersist=60s` pair.
    pub ssh_args: Option<String>,

    /// Whether the client should insist on known host keys. When disabled,
    /// `-o StrictHostKeyChecking=no` is passed.
    pub host_key_checking: bool,

    /// Template for the synthesised `ControlPath` value. `%(directory)s` is
    /// replaced with the expanded [`control_path_dir`](Self::control_path_dir)
    /// and `%%` collapses to a literal `%`, leaving the `%h`/`%p`/`%r`
    /// expansions for ssh itself.
    pub control_path: String,

    /// Directory the control sockets live in. Created with mode 0700 on
    /// first use; must be writable.
    pub control_path_dir: String,

    /// Use `scp` for file transfers instead of `sftp`.
    pub scp_if_ssh: bool,

    /// How many times a failed `exec_command` is re-attempted on top of the
    /// initial try.
    pub retries: u32,

    /// Privilege escalation methods this connection accepts. `runas` is not
    /// in the default set; it cannot work over this transport.
    pub become_methods: Vec<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            sftp_batch_mode: true,
            ssh_args: None,
            host_key_checking: true,
            control_path: "%(directory)s/ansible-ssh-%%h-%%p-%%r".to_string(),
            control_path_dir: "~/.ansible/cp".to_string(),
            scp_if_ssh: false,
            retries: 0,
            become_methods: ["sudo", "su", "pbrun", "pfexec", "doas"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Free-form argument overrides a single host carries in the inventory.
#[derive(Debug, Clone, Default)]
pub struct HostOverrides {
    /// Replaces the configured/default base option block entirely.
    pub ssh_args: Option<String>,

    /// Appended after the computed options, unless the play context already
    /// supplies its own extra arguments.
    pub ssh_extra_args: Option<String>,
}

impl HostOverrides {
    pub(crate) fn from_vars(vars: &HashMap<String, String>) -> Self {
        Self {
            ssh_args: vars.get("ansible_ssh_args").cloned(),
            ssh_extra_args: vars.get("ansible_ssh_extra_args").cloned(),
        }
    }
}

/// Source of per-host inventory variables.
///
/// The driver only looks at `ansible_ssh_args` and
/// `ansible_ssh_extra_args`; everything else in the map is ignored.
pub trait HostVarSource {
    /// The host's variables as a flat string map.
    fn get_vars(&self) -> HashMap<String, String>;
}

impl HostVarSource for HashMap<String, String> {
    fn get_vars(&self) -> HashMap<String, String> {
        self.clone()
    }
}
