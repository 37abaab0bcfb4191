#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};
use ticket_cleaner::{config::CleanerConfig, data::RawRow, io_utils, pipeline::Pipeline};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Pipeline built from the ticket fixture configuration.
pub fn ticket_pipeline() -> Pipeline {
    let config = CleanerConfig::load(&fixture_path("tickets.yaml")).expect("fixture config");
    Pipeline::new(config).expect("fixture pipeline")
}

/// Rows of the ticket fixture table.
pub fn ticket_rows() -> Vec<RawRow> {
    io_utils::read_rows(&fixture_path("tickets.csv"), None, encoding_rs::UTF_8)
        .expect("fixture rows")
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.temp_dir.path().join(name)).expect("read temp file")
    }
}
