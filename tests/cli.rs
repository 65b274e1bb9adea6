use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use std::process::{Command, Output};

fn pdf_diff(data_dir: &TempDir) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_pdf-diff"));
    command
        .current_dir(data_dir.path())
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(data_dir.child("data").path());
    command
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[test]
fn test_requires_two_documents() {
    let temp = TempDir::new().unwrap();

    let output = pdf_diff(&temp).output().unwrap();
    assert!(!output.status.success());
    assert!(predicate::str::contains("Usage").eval(&stderr(&output)));

    let output = pdf_diff(&temp).arg("only-one.pdf").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_rejects_invalid_color() {
    let temp = TempDir::new().unwrap();
    temp.child("a.pdf").write_str("a").unwrap();
    temp.child("b.pdf").write_str("b").unwrap();

    let output = pdf_diff(&temp)
        .args(["a.pdf", "b.pdf", "--color=red"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(predicate::str::contains("Invalid highlight color").eval(&stderr(&output)));
    temp.child("data").assert(predicate::path::missing());
}

#[test]
fn test_missing_document_fails() {
    let temp = TempDir::new().unwrap();
    temp.child("a.pdf").write_str("a").unwrap();

    let output = pdf_diff(&temp).args(["a.pdf", "absent.pdf"]).output().unwrap();

    assert!(!output.status.success());
    assert!(predicate::str::contains("Failed to compare").eval(&stderr(&output)));
}

#[test]
fn test_status_rejects_malformed_id() {
    let temp = TempDir::new().unwrap();

    let output = pdf_diff(&temp).args(["status", "not-a-job"]).output().unwrap();

    assert!(!output.status.success());
    assert!(predicate::str::contains("Invalid comparison id").eval(&stderr(&output)));
}

#[test]
fn test_status_of_unknown_job() {
    let temp = TempDir::new().unwrap();
    let id = format!("{}-{}", sha256_hex(b"a"), sha256_hex(b"b"));

    let output = pdf_diff(&temp).args(["status", &id]).output().unwrap();

    assert!(!output.status.success());
    assert!(predicate::str::contains("has not been compared").eval(&stderr(&output)));
}

#[test]
fn test_status_of_finished_job() {
    let temp = TempDir::new().unwrap();
    let id = format!("{}-{}", sha256_hex(b"a"), sha256_hex(b"b"));
    let entry = temp.child("data").child("generated").child(&id);
    entry.child("image-2.png").touch().unwrap();
    entry.child("image-1.png").touch().unwrap();

    let output = pdf_diff(&temp).args(["status", &id]).output().unwrap();
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(predicate::str::contains("done (2 pages)").eval(&text));
    assert!(text.find("image-1.png").unwrap() < text.find("image-2.png").unwrap());

    let output = pdf_diff(&temp)
        .args(["status", &id, "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["status"], "done");
    assert_eq!(json["images"][0]["page"], 1);
}

#[cfg(unix)]
#[test]
fn test_rasterizer_failure_is_recorded() {
    let temp = TempDir::new().unwrap();
    temp.child("a.pdf").write_str("first").unwrap();
    temp.child("b.pdf").write_str("second").unwrap();
    temp.child("pdf-diff.toml")
        .write_str("[rasterizer]\nprogram = \"false\"\n")
        .unwrap();

    let output = pdf_diff(&temp).args(["a.pdf", "b.pdf"]).output().unwrap();
    assert!(!output.status.success());
    assert!(predicate::str::contains("Rasterizer error").eval(&stderr(&output)));

    let id = format!("{}-{}", sha256_hex(b"first"), sha256_hex(b"second"));
    temp.child("data")
        .child("generated")
        .child(&id)
        .child(".failed")
        .assert(predicate::path::is_file());
    temp.child("data")
        .child(sha256_hex(b"first"))
        .assert(predicate::path::missing());

    let output = pdf_diff(&temp).args(["status", &id]).output().unwrap();
    assert!(!output.status.success());
    assert!(predicate::str::contains("failed").eval(&stderr(&output)));
}

#[cfg(unix)]
#[test]
fn test_terminate_signal_cancels_the_job() {
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    let temp = TempDir::new().unwrap();
    temp.child("a.pdf").write_str("first").unwrap();
    temp.child("b.pdf").write_str("second").unwrap();
    let slow = temp.child("slow-render");
    slow.write_str("#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(slow.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    temp.child("pdf-diff.toml")
        .write_str(&format!(
            "[rasterizer]\nprogram = \"{}\"\n",
            slow.path().display()
        ))
        .unwrap();

    let mut child = pdf_diff(&temp)
        .args(["a.pdf", "b.pdf"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .unwrap();

    let id = format!("{}-{}", sha256_hex(b"first"), sha256_hex(b"second"));
    let rendering = temp.child("data").child(sha256_hex(b"first")).child(".tmp");
    let started = Instant::now();
    while !rendering.path().exists() {
        assert!(started.elapsed() < Duration::from_secs(10), "render never started");
        std::thread::sleep(Duration::from_millis(20));
    }

    let killed = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(killed.success());

    let output = child.wait_with_output().unwrap();
    assert!(!output.status.success());
    assert!(predicate::str::contains("cancelled").eval(&stderr(&output)));
    temp.child("data")
        .child("generated")
        .child(&id)
        .assert(predicate::path::missing());
    temp.child("data")
        .child(sha256_hex(b"first"))
        .assert(predicate::path::missing());
}
