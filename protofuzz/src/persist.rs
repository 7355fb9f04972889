//! On-disk output layout (spec §6): `queue/`, `favor_test_cases/`,
//! `crash_test_cases/`, `tmout_test_cases/`, each holding
//! `id:NNNNNN.raw` files of concatenated message bytes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::testcase::Message;

#[derive(Debug, Error)]
#[error("failed to persist test case under {dir}: {source}")]
pub struct PersistError {
    dir: String,
    #[source]
    source: io::Error,
}

fn file_name(index: u64) -> String {
    format!("id:{:06}.raw", index)
}

fn write_case(dir: &Path, subdir: &str, index: u64, messages: &[Message]) -> Result<PathBuf, PersistError> {
    let target_dir = dir.join(subdir);
    fs::create_dir_all(&target_dir).map_err(|source| PersistError {
        dir: target_dir.display().to_string(),
        source,
    })?;

    let path = target_dir.join(file_name(index));
    let concatenated: Vec<u8> = messages.iter().flatten().copied().collect();
    fs::write(&path, &concatenated).map_err(|source| PersistError {
        dir: target_dir.display().to_string(),
        source,
    })?;
    Ok(path)
}

pub fn save_to_queue(output_dir: &Path, index: u64, messages: &[Message]) -> Result<PathBuf, PersistError> {
    write_case(output_dir, "queue", index, messages)
}

pub fn save_to_favor(output_dir: &Path, index: u64, messages: &[Message]) -> Result<PathBuf, PersistError> {
    write_case(output_dir, "favor_test_cases", index, messages)
}

pub fn save_to_crash(output_dir: &Path, index: u64, messages: &[Message]) -> Result<PathBuf, PersistError> {
    write_case(output_dir, "crash_test_cases", index, messages)
}

pub fn save_to_tmout(output_dir: &Path, index: u64, messages: &[Message]) -> Result<PathBuf, PersistError> {
    write_case(output_dir, "tmout_test_cases", index, messages)
}
