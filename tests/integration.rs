//! Integration tests for the rapport import commands

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Isolated config file and store in a temporary directory
struct TestEnv {
    temp_dir: TempDir,
    config_path: PathBuf,
    store_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        Self::with_config("")
    }

    /// Create an environment; `extra` is appended to the generated config.
    fn with_config(extra: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let store_path = temp_dir.path().join("data").join("contacts.json");

        let config = format!("store = '{}'\n{}", store_path.display(), extra);
        fs::write(&config_path, config).unwrap();

        Self {
            temp_dir,
            config_path,
            store_path,
        }
    }

    fn cmd(&self) -> AssertCommand {
        let mut cmd = AssertCommand::cargo_bin("rapport").unwrap();
        cmd.env_remove("RAPPORT_LOG")
            .env_remove("RAPPORT_CONFIG")
            .arg("--config")
            .arg(&self.config_path);
        cmd
    }

    fn write_input(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn seed_store(&self, document: &str) {
        fs::create_dir_all(self.store_path.parent().unwrap()).unwrap();
        fs::write(&self.store_path, document).unwrap();
    }

    fn stored(&self) -> Value {
        let content = fs::read_to_string(&self.store_path).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    fn stored_contacts(&self) -> Vec<Value> {
        self.stored()["contacts"].as_array().cloned().unwrap_or_default()
    }
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

// =============================================================================
// Delimited imports
// =============================================================================

#[test]
fn test_csv_import_with_synonym_headers() {
    let env = TestEnv::new();
    let input = env.write_input(
        "contacts.csv",
        "\u{feff}Full Name,E-mail Address,Phone Number,Organization,Vibe Score,Tags\r\n\
         Ada Lovelace,ada@example.com,+44 20 7946 0000,Analytical Engines,999,math; pioneer\r\n\
         ,nobody@example.com,,,,\r\n\
         \"Hopper, Grace\",grace@navy.mil,,US Navy,abc,\r\n",
    );

    env.cmd()
        .args(["import", path_arg(&input)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 contacts."))
        .stdout(predicate::str::contains("Dropped 1 rows:"))
        .stdout(predicate::str::contains("empty name: 1"));

    let contacts = env.stored_contacts();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0]["name"], "Ada Lovelace");
    assert_eq!(contacts[0]["company"], "Analytical Engines");
    assert_eq!(contacts[0]["vibeScore"], 10);
    assert_eq!(contacts[0]["vibeLabel"], "hot");
    assert_eq!(contacts[0]["tags"], serde_json::json!(["math", "pioneer"]));
    assert_eq!(contacts[1]["name"], "Hopper, Grace");
    assert_eq!(contacts[1]["vibeScore"], 5);
    assert_eq!(contacts[1]["vibeLabel"], "warm");
    assert_ne!(contacts[0]["id"], contacts[1]["id"]);
}

#[test]
fn test_positional_tsv_import() {
    let env = TestEnv::new();
    let input = env.write_input(
        "people.tsv",
        "John Smith\tjohn@acme.com\tNotes here\t2024-01-05\t8\tvip\n",
    );

    env.cmd()
        .args(["import", path_arg(&input)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 contacts."));

    let contact = &env.stored_contacts()[0];
    assert_eq!(contact["email"], "john@acme.com");
    assert_eq!(contact["notes"], "Notes here");
    assert_eq!(contact["lastContactDate"], "2024-01-05");
    assert_eq!(contact["vibeScore"], 8);
    assert_eq!(contact["reminderDays"], 30);
}

#[test]
fn test_malformed_quote_row_is_dropped_with_warning() {
    let env = TestEnv::new();
    let input = env.write_input("broken.csv", "Name,Notes\nAda,\"never closed\nGrace,ok\n");

    env.cmd()
        .args(["import", path_arg(&input)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 contacts."))
        .stdout(predicate::str::contains("malformed quoting: 1"))
        .stderr(predicate::str::contains("warning: line 2: unterminated quote"));
}

#[test]
fn test_header_only_csv_fails_without_touching_store() {
    let env = TestEnv::new();
    let input = env.write_input("empty.csv", "Name,Email\n");

    env.cmd()
        .args(["import", path_arg(&input)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no contacts found in input"));

    assert!(!env.store_path.exists());
}

#[test]
fn test_unsupported_extension_fails() {
    let env = TestEnv::new();
    let input = env.write_input("contacts.pdf", "%PDF-1.4");

    env.cmd()
        .args(["import", path_arg(&input)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported file format: pdf"));

    assert!(!env.store_path.exists());
}

#[test]
fn test_import_appends_to_existing_store() {
    let env = TestEnv::new();
    env.seed_store(
        r##"{"contacts": [{"id": "keep-me", "name": "Existing", "vibeScore": 2,
            "vibeLabel": "cold", "createdAt": "2023-01-01T00:00:00Z"}],
            "categories": [{"id": "cat-1", "name": "Clients", "color": "#f00"}],
            "premium": true}"##,
    );
    let input = env.write_input("new.csv", "Name,Category\nAda,friends\nGrace,\n");

    env.cmd()
        .args(["import", path_arg(&input), "--category", "clients"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 contacts."));

    let stored = env.stored();
    assert_eq!(stored["premium"], true);
    let contacts = stored["contacts"].as_array().unwrap();
    assert_eq!(contacts.len(), 3);
    assert_eq!(contacts[0]["id"], "keep-me");
    assert!(contacts[1..].iter().all(|c| c["category"] == "cat-1"));
}

#[test]
fn test_unknown_category_is_ignored_with_warning() {
    let env = TestEnv::new();
    let input = env.write_input("new.csv", "Name\nAda\n");

    env.cmd()
        .args(["import", path_arg(&input), "--category", "Vendors"])
        .assert()
        .success()
        .stderr(predicate::str::contains("unknown category `Vendors` ignored"));

    assert!(env.stored_contacts()[0].get("category").is_none());
}

#[test]
fn test_dry_run_leaves_store_alone() {
    let env = TestEnv::new();
    let input = env.write_input("contacts.csv", "Name,Email\nAda,ada@example.com\n");

    env.cmd()
        .args(["import", path_arg(&input), "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would import 1 contacts (dry run)."))
        .stdout(predicate::str::contains("Ada <ada@example.com>"));

    assert!(!env.store_path.exists());
}

#[test]
fn test_stdin_import_requires_format() {
    let env = TestEnv::new();

    env.cmd()
        .args(["import", "-"])
        .write_stdin("Name\nAda\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires --format"));

    env.cmd()
        .args(["import", "-", "--format", "csv"])
        .write_stdin("Name\nAda\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 contacts."));
}

// =============================================================================
// vCard, spreadsheet, free text, images
// =============================================================================

#[test]
fn test_vcard_import() {
    let env = TestEnv::new();
    let input = env.write_input(
        "export.vcf",
        "BEGIN:VCARD\r\n\
         VERSION:3.0\r\n\
         N:Lovelace;Ada;;;\r\n\
         TEL;TYPE=CELL:+1 555 123 4567\r\n\
         EMAIL;TYPE=WORK:ada@example.com\r\n\
         NOTE:call at 10:30\r\n\
         END:VCARD\r\n\
         BEGIN:VCARD\r\n\
         VERSION:3.0\r\n\
         ORG:Nameless Corp\r\n\
         END:VCARD\r\n",
    );

    env.cmd()
        .args(["import", path_arg(&input)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 contacts."))
        .stdout(predicate::str::contains("no name, phone or email: 1"));

    let contact = &env.stored_contacts()[0];
    assert_eq!(contact["name"], "Ada Lovelace");
    assert_eq!(contact["phone"], "+1 555 123 4567");
    assert_eq!(contact["email"], "ada@example.com");
    assert_eq!(contact["notes"], "call at 10:30");
    assert_eq!(contact["vibeLabel"], "warm");
}

#[test]
fn test_spreadsheet_without_converter_fails() {
    let env = TestEnv::new();
    let input = env.write_input("book.xlsx", "PK\u{3}\u{4}");

    env.cmd()
        .args(["import", path_arg(&input)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("spreadsheet conversion failed"));

    assert!(!env.store_path.exists());
}

#[cfg(unix)]
#[test]
fn test_spreadsheet_through_configured_converter() {
    let env = TestEnv::with_config(
        "[commands]\nsheet_to_csv = ['sh', '-c', 'cat \"$1\"', 'sh', '{input}']\n",
    );
    let input = env.write_input("book.xlsx", "Name,Email\nAda,ada@example.com\n");

    env.cmd()
        .args(["import", path_arg(&input)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 contacts."));

    assert_eq!(env.stored_contacts()[0]["email"], "ada@example.com");
}

#[test]
fn test_paste_from_stdin_reports_detected_fields() {
    let env = TestEnv::new();

    env.cmd()
        .arg("paste")
        .write_stdin("Jane Doe\nSenior Engineer\nAcme Inc\njane@example.com\n(555) 123-4567\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Detected: Email: jane@example.com"))
        .stdout(predicate::str::contains("Detected: Name: Jane Doe"))
        .stdout(predicate::str::contains("Imported 1 contacts."));

    let contact = &env.stored_contacts()[0];
    assert_eq!(contact["name"], "Jane Doe");
    assert_eq!(contact["email"], "jane@example.com");
}

#[test]
fn test_paste_without_name_is_dropped() {
    let env = TestEnv::new();

    env.cmd()
        .arg("paste")
        .write_stdin("reach me at someone@example.com\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 0 contacts."))
        .stdout(predicate::str::contains("empty name: 1"));

    assert!(!env.store_path.exists());
}

#[test]
fn test_scan_without_recognizer_fails() {
    let env = TestEnv::new();
    let image = env.write_input("card.png", "not really a png");

    env.cmd()
        .args(["scan", path_arg(&image)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no image recognizer configured"));
}

#[test]
fn test_scan_unknown_image_type_needs_mime() {
    let env = TestEnv::new();
    let image = env.write_input("card.dat", "bytes");

    env.cmd()
        .args(["scan", path_arg(&image)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--mime"));
}

// =============================================================================
// Listing and configuration
// =============================================================================

#[test]
fn test_list_filters_contacts() {
    let env = TestEnv::new();
    let input = env.write_input(
        "contacts.csv",
        "Name,Email,Company,Vibe\nAda Lovelace,ada@example.com,Engines,9\nGrace Hopper,grace@navy.mil,Navy,3\n",
    );
    env.cmd().args(["import", path_arg(&input)]).assert().success();

    env.cmd()
        .args(["list", "navy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Grace Hopper\tgrace@navy.mil\t3\tcold"))
        .stdout(predicate::str::contains("Ada").not());

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ada Lovelace\tada@example.com\t9\thot"));
}

#[test]
fn test_list_shows_contacts_without_vibe_label() {
    let env = TestEnv::new();
    env.seed_store(
        r#"{"contacts": [{"id": "1700000000000_1", "name": "Old Friend",
            "lastContactDate": "2023-11-14", "vibeScore": 7, "notes": "",
            "createdAt": "2023-11-14T22:13:20.000Z"}]}"#,
    );

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Old Friend\t\t7\twarm"));
}

#[test]
fn test_invalid_config_is_an_error() {
    let env = TestEnv::with_config("[import]\npositional_columns = ['name', 'shoe size']\n");

    env.cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("shoe size"));
}
