use std::path::{Path, PathBuf};

use predicates::prelude::*;
use rusqlite::{params, Connection};
use serde_json::Value;
use tempfile::{tempdir, TempDir};

fn bin(workdir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("forge").expect("binary");
    cmd.current_dir(workdir)
        .env_remove("FORGE_DATA_DIR")
        .env_remove("FORGE_SQLITE_BUSY_MS")
        .arg("--data-dir")
        .arg(workdir.join("projects"));
    cmd
}

fn write_source(project_dir: &Path, rows: &[(&str, &str, &str, &str)]) {
    std::fs::create_dir_all(project_dir).expect("project dir");
    let conn = Connection::open(project_dir.join("intel.sqlite")).expect("open source");
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entities (id TEXT PRIMARY KEY, type TEXT, label TEXT, attributes_json TEXT);
         DELETE FROM entities;",
    )
    .expect("schema");
    for (id, kind, label, attrs) in rows {
        conn.execute(
            "INSERT INTO entities VALUES (?1, ?2, ?3, ?4)",
            params![id, kind, label, attrs],
        )
        .expect("insert");
    }
}

fn fixture() -> (TempDir, PathBuf) {
    let tmp = tempdir().expect("tmpdir");
    let project = tmp.path().join("projects").join("alpha");
    write_source(
        &project,
        &[
            ("E1", "PERSON", "Dr. Smith", r#"{"role":"scientist"}"#),
            ("L1", "LOCATION", "Lab7", r#"{"city":"Basel"}"#),
        ],
    );
    (tmp, project)
}

fn json_output(cmd: &mut assert_cmd::Command) -> Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).expect("json stdout")
}

fn entry_hash(report: &Value, id: &str) -> String {
    report["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .find(|e| e["entity_id"] == id)
        .and_then(|e| e["current_hash"].as_str())
        .expect("hash")
        .to_string()
}

#[test]
fn projects_lists_fixture() {
    let (tmp, _) = fixture();
    bin(tmp.path())
        .arg("projects")
        .assert()
        .success()
        .stdout(predicate::str::contains("alpha").and(predicate::str::contains("2 entities")));
}

#[test]
fn accept_then_drift_then_diff() {
    let (tmp, project) = fixture();

    let report = json_output(bin(tmp.path()).args(["drift", "alpha", "--json"]));
    assert_eq!(report["summary"]["new"], 2);
    let hash = entry_hash(&report, "E1");

    bin(tmp.path())
        .args(["adjudicate", "alpha", "E1", "accept", "--hash", &hash, "--revision", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("E1 accepted at revision 1"));

    let report = json_output(bin(tmp.path()).args(["drift", "alpha", "--json"]));
    assert_eq!(report["entries"].as_array().map(|a| a.len()), Some(1));

    write_source(
        &project,
        &[
            ("E1", "PERSON", "Dr. Smith", r#"{"role":"scientist","affiliation":"Lab7"}"#),
            ("L1", "LOCATION", "Lab7", r#"{"city":"Basel"}"#),
        ],
    );
    let diff = json_output(bin(tmp.path()).args(["diff", "alpha", "E1", "--json"]));
    assert_eq!(diff["status"], "changed");
    assert_eq!(diff["deltas"][0]["field"], "affiliation");
    assert_eq!(diff["deltas"][0]["change_kind"], "added");

    // The hash accepted earlier is no longer current.
    bin(tmp.path())
        .args(["adjudicate", "alpha", "E1", "reject", "--hash", &hash])
        .assert()
        .failure()
        .stderr(predicate::str::contains("stale adjudication"));

    let history = json_output(bin(tmp.path()).args(["history", "alpha", "E1", "--json"]));
    assert_eq!(history.as_array().map(|a| a.len()), Some(1));
}

#[test]
fn bulk_accepts_everything_pending() {
    let (tmp, _) = fixture();
    bin(tmp.path())
        .args(["bulk", "alpha", "accept", "--notes", "initial import"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 applied"));
    bin(tmp.path())
        .args(["drift", "alpha"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 new, 0 changed"));
}

#[test]
fn personas_and_promotable() {
    let (tmp, _) = fixture();
    let promotable = json_output(bin(tmp.path()).args(["promotable", "alpha", "--json"]));
    assert_eq!(promotable.as_array().map(|a| a.len()), Some(1));

    bin(tmp.path())
        .args(["personas", "set", "alpha", "E1", "--prompt", "Curious scientist"])
        .assert()
        .success();
    bin(tmp.path())
        .args(["personas", "set", "alpha", "ghost", "--prompt", "Nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown entity"));

    let promotable = json_output(bin(tmp.path()).args(["promotable", "alpha", "--json"]));
    assert_eq!(promotable.as_array().map(|a| a.len()), Some(0));
    bin(tmp.path())
        .args(["personas", "list", "alpha"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Curious scientist"));
}

#[test]
fn bookmarks_roundtrip_with_negative_coordinates() {
    let (tmp, _) = fixture();
    bin(tmp.path())
        .args([
            "bookmarks", "set", "alpha", "L1", "--lat", "-33.86", "--lon", "151.2", "--tags",
            "lab,hq",
        ])
        .assert()
        .success();
    let view = json_output(bin(tmp.path()).args(["bookmarks", "show", "alpha", "L1", "--json"]));
    assert_eq!(view["tags"], serde_json::json!(["lab", "hq"]));
    assert!(view.get("warning").is_none());
    bin(tmp.path())
        .args(["bookmarks", "delete", "alpha", "L1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));
}

#[test]
fn narratives_list_by_title() {
    let (tmp, _) = fixture();
    for (id, title) in [("main", "The Outbreak"), ("prologue", "Before the Lab")] {
        bin(tmp.path())
            .args(["narratives", "set", "alpha", id, "--title", title, "--mood", "tense"])
            .assert()
            .success();
    }
    let list = json_output(bin(tmp.path()).args(["narratives", "list", "alpha", "--json"]));
    let titles: Vec<&str> = list
        .as_array()
        .expect("list")
        .iter()
        .filter_map(|n| n["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Before the Lab", "The Outbreak"]);
    bin(tmp.path())
        .args(["narratives", "delete", "alpha", "main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));
    bin(tmp.path())
        .args(["narratives", "show", "alpha", "main"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no narrative context"));
}

#[test]
fn history_prints_short_hashes() {
    let (tmp, _) = fixture();
    let report = json_output(bin(tmp.path()).args(["drift", "alpha", "--json"]));
    let hash = entry_hash(&report, "E1");
    bin(tmp.path())
        .args(["adjudicate", "alpha", "E1", "accept", "--hash", &hash])
        .assert()
        .success();
    bin(tmp.path())
        .args(["history", "alpha", "E1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&hash[..12]).and(predicate::str::contains(&hash[12..]).not()));
}

#[test]
fn unknown_project_fails() {
    let (tmp, _) = fixture();
    bin(tmp.path())
        .args(["drift", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown project"));
}

#[test]
fn config_schema_prints_json() {
    let tmp = tempdir().expect("tmpdir");
    let schema = json_output(bin(tmp.path()).args(["config", "schema"]));
    assert!(schema["properties"]["overlay"].is_object());
}
