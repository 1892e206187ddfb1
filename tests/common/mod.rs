// Shared fixtures for integration tests

#![allow(dead_code)]

use rtm_backup::EngineConfig;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};

pub const PASSPHRASE: &str = "integration-test-passphrase";

/// Create an RTM database at `path`: two epics, three stories, one test case,
/// one defect, and optionally a `users` table holding personal data.
pub async fn create_rtm_database(path: &Path, with_users: bool) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();

    let mut statements = vec![
        "CREATE TABLE epics (id INTEGER PRIMARY KEY, title TEXT NOT NULL)",
        "CREATE TABLE user_stories (id INTEGER PRIMARY KEY, epic_id INTEGER, title TEXT NOT NULL)",
        "CREATE TABLE test_cases (id INTEGER PRIMARY KEY, story_id INTEGER, name TEXT NOT NULL)",
        "CREATE TABLE defects (id INTEGER PRIMARY KEY, test_case_id INTEGER, summary TEXT NOT NULL)",
        "INSERT INTO epics (title) VALUES ('Checkout'), ('Überweisung 🚀')",
        "INSERT INTO user_stories (epic_id, title) VALUES (1, 'Pay by card'), (1, 'Pay by invoice'), (2, 'SEPA')",
        "INSERT INTO test_cases (story_id, name) VALUES (1, 'card declined')",
        "INSERT INTO defects (test_case_id, summary) VALUES (1, 'wrong error text')",
    ];
    if with_users {
        statements.push("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL)");
        statements.push("INSERT INTO users (email) VALUES ('ada@example.com')");
    }

    for statement in statements {
        sqlx::query(statement).execute(&mut conn).await.unwrap();
    }
    conn.close().await.unwrap();
}

/// Add one more epic to an existing database
pub async fn add_epic(path: &Path, title: &str) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .connect()
        .await
        .unwrap();
    sqlx::query("INSERT INTO epics (title) VALUES (?1)")
        .bind(title)
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();
}

/// Workspace with a live database and `destinations` empty destination dirs
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub database: PathBuf,
    pub destinations: Vec<PathBuf>,
}

impl Fixture {
    pub async fn new(destinations: usize, with_users: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("rtm.db");
        create_rtm_database(&database, with_users).await;

        let destinations: Vec<PathBuf> = (0..destinations)
            .map(|i| {
                let path = dir.path().join(format!("dest{}", i));
                std::fs::create_dir(&path).unwrap();
                path
            })
            .collect();

        Self {
            dir,
            database,
            destinations,
        }
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig::new(&self.database, self.destinations.clone())
    }

    /// Files in destination `index`, sorted by name
    pub fn files_in(&self, index: usize) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.destinations[index])
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Write `name` into `dir` with a modification time `age` in the past
pub fn write_aged(dir: &Path, name: &str, age: std::time::Duration) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"snapshot bytes").unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(std::time::SystemTime::now() - age).unwrap();
    path
}
