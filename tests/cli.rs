use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_cli_scan_show_ls_cycle() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    let input_path = source_dir.path().join("input.txt");
    let mut input = fs::File::create(&input_path)?;
    writeln!(input, "plain featureless-eligible text content")?;

    let work_dir = tempdir()?;

    // 1. Scan the input file.
    let mut cmd = Command::cargo_bin("bang")?;
    cmd.current_dir(work_dir.path()).arg("scan").arg(&input_path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("scanned into"));

    let meta_root = work_dir.path().join("input.txt-meta");
    assert!(meta_root.exists());

    // 2. List every meta directory the scan produced.
    let mut cmd = Command::cargo_bin("bang")?;
    cmd.arg("ls").arg(&meta_root);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("root"));

    // 3. Show the root meta directory's recorded labels.
    let mut cmd = Command::cargo_bin("bang")?;
    cmd.arg("show").arg(&meta_root).arg("root");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("labels:"));

    Ok(())
}
