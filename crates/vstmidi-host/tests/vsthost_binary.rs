//! Startup failures of the `vsthost` binary: exit code and the status word
//! written to stdout must agree.

use std::process::{Command, Stdio};
use vstmidi_bridge::protocol::{format_checksum, plugin_checksum};
use vstmidi_bridge::WorkerStatus;

fn run(args: &[&str]) -> (Option<i32>, Vec<u8>) {
    let output = Command::new(env!("CARGO_BIN_EXE_vsthost"))
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .expect("vsthost starts");
    (output.status.code(), output.stdout)
}

fn assert_refused(args: &[&str], status: WorkerStatus) {
    let (code, stdout) = run(args);
    assert_eq!(code, Some(status.code() as i32), "exit code for {args:?}");
    assert_eq!(
        stdout,
        status.code().to_le_bytes(),
        "status word on stdout for {args:?}"
    );
}

#[test]
fn test_wrong_argument_count() {
    assert_refused(&[], WorkerStatus::InvalidArguments);
    assert_refused(&["/tmp/only-a-path.so"], WorkerStatus::InvalidArguments);
    assert_refused(&["a", "b", "c"], WorkerStatus::InvalidArguments);
}

#[test]
fn test_malformed_checksum() {
    assert_refused(&["/tmp/synth.so", "not-hex"], WorkerStatus::MalformedChecksum);
    assert_refused(&["/tmp/synth.so", "123456789"], WorkerStatus::MalformedChecksum);
}

#[test]
fn test_checksum_mismatch() {
    let other = format_checksum(plugin_checksum("/tmp/other.so"));
    assert_refused(&["/tmp/synth.so", &other], WorkerStatus::ChecksumMismatch);
}

#[test]
fn test_missing_plugin_module() {
    let dir = std::env::temp_dir().join("vsthost-missing-plugin");
    let path = dir.join("does-not-exist.so");
    let path = path.to_string_lossy();
    let checksum = format_checksum(plugin_checksum(&path));
    assert_refused(&[&path, &checksum], WorkerStatus::CannotLoadPlugin);
}
