//! Golden tests for argument composition: the vectors handed to the
//! clients must come out byte-for-byte right, and identically on every
//! build.

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use openssh_driver::{Binary, Connection, GlobalConfig, PlayContext};

fn config(tmp: &TempDir) -> GlobalConfig {
    GlobalConfig {
        control_path_dir: tmp.path().join("cp").to_string_lossy().into_owned(),
        ..GlobalConfig::default()
    }
}

fn has_option(argv: &[String], value: &str) -> bool {
    argv.windows(2)
        .any(|pair| pair[0] == "-o" && pair[1] == value)
}

#[test]
fn vanilla_command_vector() {
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = PlayContext::new("h1");
    ctx.remote_user = Some("alice".to_string());

    let conn = Connection::new(ctx, config(&tmp));
    let cmd = conn
        .build_command(Binary::Ssh, &["-tt", "h1", "echo hi"])
        .unwrap();
    let argv = cmd.argv();

    assert_eq!(argv[0], "ssh");
    assert!(argv.contains(&"-C".to_string()));
    assert!(argv.contains(&"-q".to_string()));
    assert!(has_option(argv, "ControlMaster=auto"));
    assert!(has_option(argv, "ControlPersist=60s"));
    assert!(has_option(argv, "ConnectTimeout=10"));
    assert!(has_option(argv, "User=alice"));
    assert_eq!(&argv[argv.len() - 3..], ["-tt", "h1", "echo hi"]);
    assert!(cmd.is_persistent());
}

#[test]
fn no_password_means_no_sshpass_and_no_password_auth() {
    let tmp = tempfile::tempdir().unwrap();
    let conn = Connection::new(PlayContext::new("h1"), config(&tmp));

    let cmd = conn.build_command(Binary::Ssh, &["h1", "true"]).unwrap();
    let argv = cmd.argv();

    assert_ne!(argv[0], "sshpass");
    assert!(has_option(argv, "PasswordAuthentication=no"));
    assert!(has_option(argv, "KbdInteractiveAuthentication=no"));
    assert!(has_option(
        argv,
        "PreferredAuthentications=gssapi-with-mic,gssapi-keyex,hostbased,publickey"
    ));
}

#[test]
fn pipelined_vector_has_no_tty_request() {
    let tmp = tempfile::tempdir().unwrap();
    let conn = Connection::new(PlayContext::new("h1"), config(&tmp));

    let cmd = conn.build_command(Binary::Ssh, &["h1", "cat"]).unwrap();
    assert!(!cmd.argv().contains(&"-tt".to_string()));
}

#[test]
fn control_path_is_synthesised_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();
    let conn = Connection::new(PlayContext::new("h1"), config(&tmp));

    let cmd = conn.build_command(Binary::Ssh, &["h1", "true"]).unwrap();
    let control_paths: Vec<&String> = cmd
        .argv()
        .iter()
        .filter(|a| a.contains("ControlPath"))
        .collect();
    assert_eq!(control_paths.len(), 1);
    assert!(control_paths[0].starts_with("ControlPath="));
    assert!(control_paths[0].ends_with("/ansible-ssh-%h-%p-%r"));

    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(tmp.path().join("cp"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o700);
}

#[test]
fn building_is_deterministic() {
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = PlayContext::new("h1");
    ctx.port = Some(2222);
    ctx.private_key_file = Some("~/.ssh/id_ed25519".into());
    let conn = Connection::new(ctx, config(&tmp));

    let first = conn.build_command(Binary::Ssh, &["h1", "true"]).unwrap();
    let second = conn.build_command(Binary::Ssh, &["h1", "true"]).unwrap();
    assert_eq!(first.argv(), second.argv());

    assert!(has_option(first.argv(), "Port=2222"));
}

#[test]
fn host_overrides_replace_the_base_option_block() {
    let tmp = tempfile::tempdir().unwrap();
    let mut conn = Connection::new(PlayContext::new("h1"), config(&tmp));

    let mut vars = std::collections::HashMap::new();
    vars.insert(
        "ansible_ssh_args".to_string(),
        "-o ServerAliveInterval=30".to_string(),
    );
    conn.set_host_overrides(&vars);

    let cmd = conn.build_command(Binary::Ssh, &["h1", "true"]).unwrap();
    assert!(has_option(cmd.argv(), "ServerAliveInterval=30"));
    assert!(!has_option(cmd.argv(), "ControlMaster=auto"));
    assert!(!cmd.is_persistent());
}
