//! Outstanding-work discovery
//!
//! A job is an `in_*.json` file whose `out_*.json` result (or `out_*_RAW.txt`
//! side file) does not exist yet. Re-running after an interrupted run picks
//! up exactly the jobs that were never consumed.

use std::path::{Path, PathBuf};

use dispatch_pool::Job;
use tracing::{debug, info};

use crate::config::Layout;

const INPUT_PREFIX: &str = "in_";
const OUTPUT_PREFIX: &str = "out_";
const RESULT_EXT: &str = ".json";
const RAW_SUFFIX: &str = "_RAW.txt";

const PAIR_INPUT_PREFIX: &str = "working_split_IN--";
const PAIR_OUTPUT_PREFIX: &str = "working_split_OUT--API-";

/// `in_split_0001.json` → `out_split_0001.json`. `None` for non-input names.
pub fn output_name(input_name: &str) -> Option<String> {
    if input_name.starts_with(INPUT_PREFIX) && input_name.ends_with(RESULT_EXT) {
        Some(input_name.replacen(INPUT_PREFIX, OUTPUT_PREFIX, 1))
    } else {
        None
    }
}

/// Raw side file for a result path: `out_x.json` → `out_x_RAW.txt`.
///
/// Without `raw_dir` it sits next to the result. With `raw_dir` it goes under
/// a subdirectory named after the result's directory, so pairs holding the
/// same file names never share a raw file.
pub fn raw_path(destination: &Path, raw_dir: Option<&Path>) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(RESULT_EXT).unwrap_or(&name);
    let raw_name = format!("{stem}{RAW_SUFFIX}");
    match raw_dir {
        Some(dir) => {
            let bucket = destination.parent().and_then(Path::file_name);
            match bucket {
                Some(bucket) => dir.join(bucket).join(raw_name),
                None => dir.join(raw_name),
            }
        }
        None => destination.with_file_name(raw_name),
    }
}

/// Inputs in `input_dir` without a result or raw file, sorted by name.
pub fn pending_jobs(input_dir: &Path, output_dir: &Path, raw_dir: Option<&Path>) -> common::Result<Vec<Job>> {
    let entries = std::fs::read_dir(input_dir).map_err(|e| common::Error::io_at(input_dir, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| common::Error::io_at(input_dir, e))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    names.sort();

    let mut jobs = Vec::new();
    let mut finished = 0usize;
    for name in names {
        let Some(out_name) = output_name(&name) else {
            continue;
        };
        let destination = output_dir.join(out_name);
        if destination.exists() || raw_path(&destination, raw_dir).exists() {
            finished += 1;
            continue;
        }
        jobs.push(Job::new(input_dir.join(&name), destination));
    }

    debug!(
        input_dir = %input_dir.display(),
        pending = jobs.len(),
        finished,
        "scanned input directory"
    );
    Ok(jobs)
}

/// One input/output directory pair under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirPair {
    pub index: u32,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Every `working_split_IN--{n}` under `base_dir` with its
/// `working_split_OUT--API-{n}` partner, in numeric order.
///
/// Missing output directories are created.
pub fn detect_pairs(base_dir: &Path) -> common::Result<Vec<DirPair>> {
    let entries = std::fs::read_dir(base_dir).map_err(|e| common::Error::io_at(base_dir, e))?;

    let mut pairs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| common::Error::io_at(base_dir, e))?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Some(index) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.strip_prefix(PAIR_INPUT_PREFIX))
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };

        let output = base_dir.join(format!("{PAIR_OUTPUT_PREFIX}{index}"));
        if !output.is_dir() {
            std::fs::create_dir_all(&output).map_err(|e| common::Error::io_at(&output, e))?;
            info!(dir = %output.display(), "created output directory");
        }
        pairs.push(DirPair {
            index,
            input: entry.path(),
            output,
        });
    }

    if pairs.is_empty() {
        return Err(common::Error::Config(format!(
            "no {PAIR_INPUT_PREFIX}{{n}} directories found in {}",
            base_dir.display()
        )));
    }

    pairs.sort_by_key(|p| p.index);
    Ok(pairs)
}

/// All outstanding jobs for a layout, in directory then file order.
pub fn discover(layout: &Layout, raw_dir: Option<&Path>) -> common::Result<Vec<Job>> {
    match layout {
        Layout::Single { input, output } => {
            if !output.is_dir() {
                std::fs::create_dir_all(output).map_err(|e| common::Error::io_at(output, e))?;
            }
            pending_jobs(input, output, raw_dir)
        }
        Layout::Paired { base } => {
            let mut jobs = Vec::new();
            for pair in detect_pairs(base)? {
                let pending = pending_jobs(&pair.input, &pair.output, raw_dir)?;
                info!(
                    pair = pair.index,
                    input = %pair.input.display(),
                    pending = pending.len(),
                    "directory pair"
                );
                // File names repeat across pairs; qualify ids with the input dir.
                let dir = pair
                    .input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                jobs.extend(pending.into_iter().map(|job| {
                    let id = format!("{dir}/{}", job.id);
                    job.with_id(id)
                }));
            }
            Ok(jobs)
        }
    }
}
