//! Integration tests for refurb CLI

use std::process::Command;

fn refurb() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_refurb"));
    command.env_remove("RUST_LOG").env("REFURB_COLOR", "never");
    command
}

#[test]
fn test_cli_version() {
    let output = refurb()
        .arg("--version")
        .output()
        .expect("Failed to execute refurb");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("refurb"));
}

#[test]
fn test_cli_help() {
    let output = refurb()
        .arg("--help")
        .output()
        .expect("Failed to execute refurb");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Disk re-imaging and fan-out copy pipeline"));
    for command in ["plan", "partition", "restore", "image", "wipe", "sync", "fanout", "read-table"] {
        assert!(stdout.contains(command), "missing {command}");
    }
}

#[test]
fn test_cli_invalid_command() {
    let output = refurb()
        .arg("invalid-command")
        .output()
        .expect("Failed to execute refurb");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized subcommand"));
}

#[test]
fn test_json_plan_output() {
    let config = tempfile::NamedTempFile::new().unwrap();
    let output = refurb()
        .args(["--json", "--config"])
        .arg(config.path())
        .args(["plan", "--size", "68719476736", "--kind", "efi"])
        .output()
        .expect("Failed to execute refurb");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(value["type"], "Plan");
    assert_eq!(value["data"]["entries"].as_array().unwrap().len(), 4);
}

#[test]
fn test_fanout_copies_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "").unwrap();
    let source = dir.path().join("source.bin");
    std::fs::write(&source, vec![42u8; 100_000]).unwrap();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");

    let output = refurb()
        .arg("--config")
        .arg(&config)
        .arg("fanout")
        .arg("--source")
        .arg(&source)
        .arg(&a)
        .arg(&b)
        .output()
        .expect("Failed to execute refurb");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(std::fs::read(&a).unwrap().len(), 100_000);
    assert_eq!(std::fs::read(&b).unwrap().len(), 100_000);
}

#[test]
fn test_missing_device_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "").unwrap();
    let output = refurb()
        .arg("--config")
        .arg(&config)
        .args(["read-table", "/dev/refurb-no-such-disk"])
        .output()
        .expect("Failed to execute refurb");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"));
}

#[test]
fn test_fanout_with_a_dead_destination_still_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "").unwrap();
    let source = dir.path().join("source.bin");
    std::fs::write(&source, vec![42u8; 50_000]).unwrap();
    let good = dir.path().join("good.bin");
    let bad = dir.path().join("missing-dir").join("bad.bin");

    let run = |targets: &[&std::path::Path]| {
        refurb()
            .arg("--config")
            .arg(&config)
            .arg("fanout")
            .arg("--source")
            .arg(&source)
            .args(targets)
            .output()
            .expect("Failed to execute refurb")
    };

    let output = run(&[&good, &bad]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(std::fs::read(&good).unwrap().len(), 50_000);

    let output = run(&[&bad]);
    assert_eq!(output.status.code(), Some(1));
}
