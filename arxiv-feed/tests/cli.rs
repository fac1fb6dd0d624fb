use std::io::Write;
use std::process::{Command, Stdio};

use arxiv_feed::Entry;

fn parse_stdout(stdout: &[u8]) -> Vec<Entry> {
    serde_json::from_slice(stdout).expect("CLI prints entry JSON")
}

fn expected(json: &str) -> Vec<Entry> {
    serde_json::from_str(json).expect("expected fixture is valid JSON")
}

#[test]
fn cli_reads_file_path() {
    let output = Command::new(env!("CARGO_BIN_EXE_arxiv_feed"))
        .arg("tests/fixtures/xml/search-results.xml")
        .output()
        .expect("run CLI");

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        parse_stdout(&output.stdout),
        expected(include_str!("fixtures/expected/search-results.json"))
    );
}

#[test]
fn cli_reads_stdin_when_no_args() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_arxiv_feed"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");

    child
        .stdin
        .as_mut()
        .expect("stdin open")
        .write_all(include_str!("fixtures/xml/id-list.xml").as_bytes())
        .expect("write stdin");

    let output = child.wait_with_output().expect("read CLI output");
    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        parse_stdout(&output.stdout),
        expected(include_str!("fixtures/expected/id-list.json"))
    );
}

#[test]
fn cli_rejects_malformed_feed() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_arxiv_feed"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");

    child
        .stdin
        .as_mut()
        .expect("stdin open")
        .write_all(b"<feed><entry></feed>")
        .expect("write stdin");

    let output = child.wait_with_output().expect("read CLI output");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("malformed feed"));
}
