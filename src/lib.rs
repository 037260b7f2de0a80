//! Remote execution through the OpenSSH client programs (**only works on
//! unix**).
//!
//! This crate drives the stock OpenSSH command-line clients (`ssh`, `scp`,
//! `sftp`, plus `sshpass` for password authentication) to run commands and
//! move files on a remote host. Since everything is executed through the
//! real clients, all your existing configuration (e.g. in `.ssh/config`)
//! continues to work as expected, and persistent connections come from the
//! client's own `ControlMaster` multiplexing rather than from anything this
//! crate manages.
//!
//! # Running remote commands
//!
//! A [`Connection`] is configured once from a [`PlayContext`] (who and what
//! to connect to) and a [`GlobalConfig`] (the process-wide knobs), and then
//! invoked per operation:
//!
//! ```rust,no_run
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), openssh_driver::Error> {
//! use openssh_driver::{Connection, GlobalConfig, PlayContext};
//!
//! let mut ctx = PlayContext::new("ssh.example.com");
//! ctx.remote_user = Some("me".to_string());
//!
//! let conn = Connection::new(ctx, GlobalConfig::default());
//! let out = conn.exec_command("whoami", None, true).await?;
//! assert_eq!(out.stdout, b"me\n");
//! # Ok(()) }
//! ```
//!
//! Passing `in_data` pipelines a payload into the remote command's stdin
//! instead of giving the remote side a tty. The remote exit code is never
//! an error by itself: whatever the remote program returns comes back in
//! [`CommandOutput`], and only transport-level failures (the client's
//! reserved exit code 255, and a handful of conditions we can identify from
//! stderr) turn into an [`Error`]. Those transport failures are retried
//! with capped exponential backoff, governed by
//! [`GlobalConfig::retries`].
//!
//! # Privilege escalation
//!
//! When the [`PlayContext`] requests become-style escalation, the driver
//! watches the child's output line by line: it answers the password prompt,
//! waits for the success marker, and strips both from the output you see,
//! while error lines (a wrong or missing password) surface as
//! [`Error::EscalationFailed`]. The line classifiers are injected as a
//! [`BecomePredicates`] record, so escalation methods beyond the built-in
//! ones can bring their own.
//!
//! # Errors
//!
//! Since we are wrapping the clients, which in turn run a remote command we
//! do not control, there is no fully reliable way to tell a connection
//! failure from a remote program failure. We do our best with the usual
//! heuristics (exit code 255, known stderr lines); see [`Error`] for the
//! cases we can distinguish.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links,
    rust_2018_idioms,
    unreachable_pub
)]
// only enables the nightly `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(unix))]
compile_error!("This crate can only be used on unix");

mod escalate;
pub use escalate::{BecomePredicates, LinePredicate};

mod child;

mod command;
pub use command::{Binary, SshCommand};

mod config;
pub use config::{GlobalConfig, HostOverrides, HostVarSource};

mod connection;
pub use connection::Connection;

mod context;
pub use context::PlayContext;

mod diag;
pub use diag::{Diagnostics, TracingDiagnostics};

mod error;
pub use error::Error;

mod negotiate;

mod paths;

mod runner;
pub use runner::CommandOutput;
