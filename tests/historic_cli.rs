use assert_cmd::Command;
use predicates::prelude::*;

fn historic() -> Command {
    Command::cargo_bin("galaxy-stats-historic").unwrap()
}

// Usage errors are rejected before the config file is read, so it need not exist.
const ARGS: [&str; 6] = [
    "-c",
    "missing-galaxy.yml",
    "-s",
    "2019-04-01",
    "-e",
    "2019-04-02",
];

#[test]
fn test_unsupported_interval_unit_exits_1() {
    historic()
        .args(ARGS)
        .args(["-i", "3w"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains(
            "timerange 3w is invalid, valid examples: 1h 2d 1M",
        ));
}

#[test]
fn test_missing_interval_exits_1() {
    historic()
        .args(ARGS)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--interval"));
}

#[test]
fn test_bad_resolution_exits_1() {
    historic()
        .args(ARGS)
        .args(["-i", "1h", "-r", "5x"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("resolution 5x is invalid"));
}

#[test]
fn test_malformed_start_exits_1() {
    historic()
        .args(["-c", "missing-galaxy.yml", "-s", "april", "-e", "2019-04-02", "-i", "1d"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("timestamp april is invalid"));
}

#[test]
fn test_inverted_range_exits_1() {
    historic()
        .args(["-c", "missing-galaxy.yml", "-s", "2019-04-02", "-e", "2019-04-01", "-i", "1d"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must be before end"));
}

#[test]
fn test_help_exits_0() {
    historic()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--interval"));
}
