//! Command-line behavior of the `typthon` binary.

use std::fs;
use std::process::Command;

fn typthon() -> Command {
    Command::new(env!("CARGO_BIN_EXE_typthon"))
}

const GOOD: &str = "def add(a: int, b: int) -> int:\n    return a + b\n\ndef main() -> int:\n    return add(40, 2)\n";

#[test]
fn test_version() {
    let output = typthon().arg("version").output().expect("runs");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.starts_with("typthon compiler version "), "{}", text);
}

#[test]
fn test_assembly_output_for_each_arch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("prog.py");
    fs::write(&source, GOOD).expect("write source");

    for (arch, marker) in [("amd64", "addq"), ("arm64", "add x"), ("riscv64", "add ")] {
        let output_path = dir.path().join(format!("prog-{}.s", arch));
        let output = typthon()
            .args(["compile", "-S", "--arch", arch, "--opt", "1", "-o"])
            .arg(&output_path)
            .arg(&source)
            .output()
            .expect("runs");
        assert!(
            output.status.success(),
            "{}: {}",
            arch,
            String::from_utf8_lossy(&output.stderr)
        );
        let text = fs::read_to_string(&output_path).expect("assembly written");
        assert!(text.contains(".globl"), "{}", text);
        assert!(text.contains(marker), "{}: {}", arch, text);
    }
}

#[test]
fn test_emit_ir_and_stats() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("prog.py");
    fs::write(&source, GOOD).expect("write source");
    let output = typthon()
        .args(["compile", "-S", "--emit-ir", "--stats", "--arch", "riscv64", "-o"])
        .arg(dir.path().join("prog.s"))
        .arg(&source)
        .output()
        .expect("runs");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fn add("), "{}", stdout);
    assert!(stdout.contains("Functions compiled: 2"), "{}", stdout);
}

#[test]
fn test_failures_exit_with_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("bad.py");
    fs::write(&source, "def f() -> int:\n    return missing\n").expect("write source");
    let output_path = dir.path().join("bad.s");
    let output = typthon()
        .args(["compile", "-S", "--arch", "amd64", "-o"])
        .arg(&output_path)
        .arg(&source)
        .output()
        .expect("runs");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("in function 'f'"), "{}", stderr);
    assert!(stderr.contains("undefined variable: missing"), "{}", stderr);
    assert!(!output_path.exists());
}

#[test]
fn test_missing_source_fails() {
    let output = typthon()
        .args(["compile", "/nonexistent/typthon/source.py", "-S"])
        .output()
        .expect("runs");
    assert_eq!(output.status.code(), Some(1));
}
