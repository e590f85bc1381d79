//! File-based migration source.
//!
//! Scripts live in one directory and are named
//! `<version>_<title>.<up|down>.<ext>`, e.g. `0003_add_orders.up.sql`.
//! Anything else in the directory is ignored.

use crate::error::{DbError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

const FILE_SCHEME: &str = "file://";

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([0-9]+)_(.*)\.(up|down)\.(.*)$").expect("migration file pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: u64,
    pub title: String,
    pub direction: Direction,
    pub path: PathBuf,
}

/// One transition of a migration plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run the up script of `version`; the schema ends at `version`.
    Up { version: u64 },
    /// Run the down script of `version`; the schema ends at `to`
    /// (`None` once the first migration is undone).
    Down { version: u64, to: Option<u64> },
}

impl Step {
    /// Version recorded once the step finishes.
    pub fn target(&self) -> Option<u64> {
        match self {
            Step::Up { version } => Some(*version),
            Step::Down { to, .. } => *to,
        }
    }
}

/// Migration scripts indexed by version.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    root: PathBuf,
    up: BTreeMap<u64, MigrationFile>,
    down: BTreeMap<u64, MigrationFile>,
}

impl FileSource {
    /// Open a `file://<path>` source URL.
    pub fn open(url: &str) -> Result<Self> {
        let path = url
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| DbError::invalid_source(format!("expected a file:// URL, got {}", url)))?;
        if path.is_empty() {
            return Err(DbError::invalid_source("empty migrations path"));
        }
        Self::from_dir(path)
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(DbError::invalid_source(format!(
                "migrations directory not found: {}",
                root.display()
            )));
        }

        let mut source = Self {
            root: root.clone(),
            ..Self::default()
        };

        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(file) = name.to_str().and_then(|n| parse_file_name(n, entry.path())) else {
                debug!("Skipping non-migration file {:?}", name);
                continue;
            };
            source.insert(file)?;
        }

        debug!(
            "Loaded {} migrations from {}",
            source.versions().len(),
            root.display()
        );
        Ok(source)
    }

    fn insert(&mut self, file: MigrationFile) -> Result<()> {
        let index = match file.direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
        };
        if let Some(existing) = index.get(&file.version) {
            return Err(DbError::invalid_source(format!(
                "duplicate {} migration for version {}: {} and {}",
                file.direction,
                file.version,
                existing.path.display(),
                file.path.display()
            )));
        }
        index.insert(file.version, file);
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every known version, ascending.
    pub fn versions(&self) -> Vec<u64> {
        let mut versions: Vec<u64> = self.up.keys().chain(self.down.keys()).copied().collect();
        versions.sort_unstable();
        versions.dedup();
        versions
    }

    pub fn contains(&self, version: u64) -> bool {
        self.up.contains_key(&version) || self.down.contains_key(&version)
    }

    pub fn first(&self) -> Option<u64> {
        self.versions().first().copied()
    }

    /// Smallest known version above `version`.
    pub fn next(&self, version: u64) -> Option<u64> {
        self.versions().into_iter().find(|v| *v > version)
    }

    /// Largest known version below `version`.
    pub fn prev(&self, version: u64) -> Option<u64> {
        self.versions().into_iter().rev().find(|v| *v < version)
    }

    pub async fn read_up(&self, version: u64) -> Result<String> {
        read_script(self.up.get(&version), version).await
    }

    pub async fn read_down(&self, version: u64) -> Result<String> {
        read_script(self.down.get(&version), version).await
    }

    /// Steps leading from `current` (`None` = never migrated) to `target`
    /// (0 = no version).
    pub fn plan(&self, current: Option<u64>, target: u64) -> Result<Vec<Step>> {
        if target != 0 && !self.contains(target) {
            return Err(DbError::MissingMigration(target));
        }

        let current = current.unwrap_or(0);
        if current != 0 && !self.contains(current) {
            return Err(DbError::MissingMigration(current));
        }
        let versions = self.versions();

        let steps = if target > current {
            versions
                .iter()
                .filter(|v| **v > current && **v <= target)
                .map(|v| Step::Up { version: *v })
                .collect()
        } else {
            versions
                .iter()
                .rev()
                .filter(|v| **v > target && **v <= current)
                .map(|v| Step::Down {
                    version: *v,
                    to: self.prev(*v),
                })
                .collect()
        };
        Ok(steps)
    }
}

fn parse_file_name(name: &str, path: PathBuf) -> Option<MigrationFile> {
    let captures = file_name_pattern().captures(name)?;
    let version = captures[1].parse().ok()?;
    let direction = match &captures[3] {
        "up" => Direction::Up,
        _ => Direction::Down,
    };
    Some(MigrationFile {
        version,
        title: captures[2].to_string(),
        direction,
        path,
    })
}

async fn read_script(file: Option<&MigrationFile>, version: u64) -> Result<String> {
    let file = file.ok_or(DbError::MissingMigration(version))?;
    Ok(tokio::fs::read_to_string(&file.path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    fn sample() -> (TempDir, FileSource) {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "1_create_users.up.sql", "CREATE TABLE users (id INT);");
        write(tmp.path(), "1_create_users.down.sql", "DROP TABLE users;");
        write(tmp.path(), "2_add_email.up.sql", "ALTER TABLE users ADD email TEXT;");
        write(tmp.path(), "2_add_email.down.sql", "ALTER TABLE users DROP email;");
        write(tmp.path(), "5_orders.up.sql", "CREATE TABLE orders (id INT);");
        write(tmp.path(), "5_orders.down.sql", "DROP TABLE orders;");
        write(tmp.path(), "README.md", "not a migration");
        let source = FileSource::from_dir(tmp.path()).unwrap();
        (tmp, source)
    }

    #[test]
    fn test_parse_file_name() {
        let file = parse_file_name("0003_add_orders.up.sql", PathBuf::from("x")).unwrap();
        assert_eq!(file.version, 3);
        assert_eq!(file.title, "add_orders");
        assert_eq!(file.direction, Direction::Up);

        assert!(parse_file_name("add_orders.sql", PathBuf::from("x")).is_none());
        assert!(parse_file_name("3_add_orders.sideways.sql", PathBuf::from("x")).is_none());
    }

    #[test]
    fn test_scans_directory() {
        let (_tmp, source) = sample();
        assert_eq!(source.versions(), vec![1, 2, 5]);
        assert_eq!(source.first(), Some(1));
        assert_eq!(source.next(2), Some(5));
        assert_eq!(source.prev(5), Some(2));
        assert_eq!(source.prev(1), None);
        assert!(!source.contains(3));
    }

    #[test]
    fn test_open_requires_file_url() {
        let (tmp, _) = sample();
        let url = format!("file://{}", tmp.path().display());
        assert_eq!(FileSource::open(&url).unwrap().versions().len(), 3);

        assert!(matches!(
            FileSource::open("s3://bucket/migrations"),
            Err(DbError::InvalidSource(_))
        ));
        assert!(matches!(
            FileSource::open("file:///definitely/not/here"),
            Err(DbError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "1_a.up.sql", "");
        write(tmp.path(), "01_b.up.sql", "");
        let err = FileSource::from_dir(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate up migration for version 1"));
    }

    #[test]
    fn test_plan_up_from_nothing() {
        let (_tmp, source) = sample();
        assert_eq!(
            source.plan(None, 2).unwrap(),
            vec![Step::Up { version: 1 }, Step::Up { version: 2 }]
        );
    }

    #[test]
    fn test_plan_down_to_nothing() {
        let (_tmp, source) = sample();
        assert_eq!(
            source.plan(Some(5), 0).unwrap(),
            vec![
                Step::Down { version: 5, to: Some(2) },
                Step::Down { version: 2, to: Some(1) },
                Step::Down { version: 1, to: None },
            ]
        );
    }

    #[test]
    fn test_plan_same_version_is_empty() {
        let (_tmp, source) = sample();
        assert!(source.plan(Some(2), 2).unwrap().is_empty());
    }

    #[test]
    fn test_plan_unknown_target() {
        let (_tmp, source) = sample();
        assert!(matches!(
            source.plan(Some(1), 3),
            Err(DbError::MissingMigration(3))
        ));
    }

    #[test]
    fn test_plan_unknown_current() {
        let (_tmp, source) = sample();
        assert!(matches!(
            source.plan(Some(7), 2),
            Err(DbError::MissingMigration(7))
        ));
    }

    #[tokio::test]
    async fn test_read_scripts() {
        let (_tmp, source) = sample();
        assert_eq!(source.read_down(1).await.unwrap(), "DROP TABLE users;");
        assert!(matches!(
            source.read_up(4).await,
            Err(DbError::MissingMigration(4))
        ));
    }
}
