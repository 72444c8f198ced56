use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

fn bin() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("crypass"))
}

/// Temp workspace with an empty config file and a key directory.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{}").unwrap();
        fs::create_dir(dir.path().join("keys")).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn keys(&self) -> PathBuf {
        self.path("keys")
    }

    fn cmd(&self) -> Command {
        let mut cmd = bin();
        cmd.current_dir(self.dir.path())
            .env_remove("CRYPASS_LOG")
            .arg("--config")
            .arg(self.path("config.json"));
        cmd
    }

    fn encrypt(&self, target: &Path) -> Command {
        let mut cmd = self.cmd();
        cmd.arg("--yes")
            .arg("encrypt")
            .arg("-t")
            .arg(target)
            .arg("-k")
            .arg(self.keys())
            .arg("-n")
            .arg("bob");
        cmd
    }

    fn decrypt(&self, target: &Path) -> Command {
        let mut cmd = self.cmd();
        cmd.arg("--yes")
            .arg("decrypt")
            .arg("-t")
            .arg(target)
            .arg("-k")
            .arg(self.keys());
        cmd
    }
}

#[test]
fn encrypt_then_decrypt_file() {
    let ws = Workspace::new();
    let file = ws.path("report.docx");
    fs::write(&file, b"quarterly numbers").unwrap();

    ws.encrypt(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 succeeded, 0 failed"));

    let container = ws.path("report.docx.encrypted");
    assert!(container.exists());
    assert!(ws.keys().join("bob.report.docx.ini").exists());
    assert!(fs::read_to_string(&container).unwrap().starts_with("Aes|||"));

    fs::remove_file(&file).unwrap();
    ws.decrypt(&container)
        .assert()
        .success()
        .stdout(predicate::str::contains("decrypted"));

    assert_eq!(fs::read(&file).unwrap(), b"quarterly numbers");
}

#[test]
fn encrypt_then_decrypt_directory() {
    let ws = Workspace::new();
    let project = ws.path("project");
    fs::create_dir_all(project.join("src")).unwrap();
    fs::write(project.join("src/main.rs"), b"fn main() {}").unwrap();

    ws.encrypt(&project).assert().success();

    let container = ws.path("project.zip.encrypted");
    assert!(container.exists());
    assert!(!ws.path("project.zip").exists());

    fs::remove_dir_all(&project).unwrap();
    ws.decrypt(&container).assert().success();

    assert_eq!(fs::read(project.join("src/main.rs")).unwrap(), b"fn main() {}");
    assert!(!ws.path("project.zip").exists());
}

#[test]
fn missing_target_fails() {
    let ws = Workspace::new();

    ws.encrypt(&ws.path("ghost.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("was not found"));

    assert_eq!(fs::read_dir(ws.keys()).unwrap().count(), 0);
}

#[test]
fn missing_key_directory_fails() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"x").unwrap();

    ws.cmd()
        .arg("--yes")
        .arg("encrypt")
        .arg("-t")
        .arg(&file)
        .arg("-k")
        .arg(ws.path("nowhere"))
        .arg("-n")
        .arg("bob")
        .assert()
        .failure()
        .stderr(predicate::str::contains("key directory"));

    assert!(!ws.path("a.txt.encrypted").exists());
}

#[test]
fn missing_name_fails() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"x").unwrap();

    ws.cmd()
        .arg("--yes")
        .arg("encrypt")
        .arg("-t")
        .arg(&file)
        .arg("-k")
        .arg(ws.keys())
        .assert()
        .failure()
        .stderr(predicate::str::contains("key name"));
}

#[test]
fn missing_drive_and_key_fails() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"x").unwrap();

    ws.cmd()
        .arg("--yes")
        .arg("encrypt")
        .arg("-t")
        .arg(&file)
        .arg("-n")
        .arg("bob")
        .assert()
        .failure()
        .stderr(predicate::str::contains("drive label"));
}

#[test]
fn unsupported_algorithm_fails() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"x").unwrap();

    ws.encrypt(&file)
        .arg("-a")
        .arg("Blowfish")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not supported"));
}

#[test]
fn declining_the_prompt_changes_nothing() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"x").unwrap();

    ws.cmd()
        .arg("encrypt")
        .arg("-t")
        .arg(&file)
        .arg("-k")
        .arg(ws.keys())
        .arg("-n")
        .arg("bob")
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("terminating"));

    assert!(!ws.path("a.txt.encrypted").exists());
    assert_eq!(fs::read_dir(ws.keys()).unwrap().count(), 0);
}

#[test]
fn accepting_the_prompt_proceeds() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"x").unwrap();

    ws.cmd()
        .arg("encrypt")
        .arg("-t")
        .arg(&file)
        .arg("-k")
        .arg(ws.keys())
        .arg("-n")
        .arg("bob")
        .write_stdin("y\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Operation: encrypt"));

    assert!(ws.path("a.txt.encrypted").exists());
}

#[test]
fn decrypt_with_wrong_keys_exits_non_zero() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"secret").unwrap();
    ws.encrypt(&file).assert().success();

    for entry in fs::read_dir(ws.keys()).unwrap() {
        fs::remove_file(entry.unwrap().path()).unwrap();
    }
    fs::remove_file(&file).unwrap();

    ws.decrypt(&ws.path("a.txt.encrypted"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("no key record matches"));

    assert!(!file.exists());
}

#[test]
fn decrypt_rejects_plain_files() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"plain").unwrap();

    ws.decrypt(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not an encrypted container"));
}

#[test]
fn invalid_config_is_reported() {
    let ws = Workspace::new();
    fs::write(ws.path("config.json"), r#"{ "chunk_size": 4 }"#).unwrap();
    let file = ws.path("a.txt");
    fs::write(&file, b"x").unwrap();

    ws.encrypt(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn zip_named_file_is_rejected() {
    let ws = Workspace::new();
    let file = ws.path("notes.zip");
    fs::write(&file, b"not an archive").unwrap();

    ws.encrypt(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ends in .zip"));

    assert!(!ws.path("notes.zip.encrypted").exists());
    assert_eq!(fs::read_dir(ws.keys()).unwrap().count(), 0);
}

#[test]
fn drive_key_directory_cannot_leave_the_drive() {
    let ws = Workspace::new();
    let file = ws.path("a.txt");
    fs::write(&file, b"x").unwrap();

    ws.cmd()
        .arg("--yes")
        .arg("encrypt")
        .arg("-t")
        .arg(&file)
        .arg("-d")
        .arg("NO-SUCH-DRIVE")
        .arg("-k")
        .arg("../../x")
        .arg("-n")
        .arg("bob")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must stay below the drive root"));

    assert!(!ws.path("a.txt.encrypted").exists());
}
