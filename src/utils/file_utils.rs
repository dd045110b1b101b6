use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use memmap2::Mmap;
use tracing::warn;

use crate::error::{EchoError, Result};

/// Read a binary file using memory mapping for improved performance
/// This is more efficient for large files as it doesn't load the entire file into RAM
pub fn read_binary_file_mmap(path: impl AsRef<Path>) -> Result<Mmap> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => EchoError::NotFound(path.to_path_buf()),
        _ => EchoError::Io(e),
    })?;
    // Safety: The file is not modified while the mmap is active
    let mmap = unsafe { Mmap::map(&file) }?;
    Ok(mmap)
}

/// Expands `~` and `$VAR` / `${VAR}` references in an input argument.
pub fn expand_input(input: &str) -> String {
    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;

    if let Some(stripped) = rest.strip_prefix('~') {
        if stripped.is_empty() || stripped.starts_with('/') {
            if let Some(home) = std::env::var_os("HOME") {
                expanded.push_str(&home.to_string_lossy());
                rest = stripped;
            }
        }
    }

    while let Some(pos) = rest.find('$') {
        expanded.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, remainder) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], &braced[end + 1..]),
                None => ("", after),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], &after[end..])
        };
        match std::env::var(name) {
            Ok(value) if !name.is_empty() => expanded.push_str(&value),
            _ => {
                // Unknown variables are left untouched.
                expanded.push('$');
                rest = after;
                continue;
            }
        }
        rest = remainder;
    }
    expanded.push_str(rest);
    expanded
}

/// Resolves paths and glob patterns to a sorted, de-duplicated list of files.
///
/// Matches that are not regular files are warned about and ignored.
pub fn find_files<I, S>(inputs: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    for input in inputs {
        let pattern = expand_input(input.as_ref());
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) if path.is_file() => {
                    seen.insert(path);
                }
                Ok(path) => warn!(path = %path.display(), "not a file or does not exist; ignored"),
                Err(e) => warn!(error = %e, "unreadable glob match; ignored"),
            }
        }
    }
    Ok(seen.into_iter().collect())
}

/// Deployment id of a file: the part of its stem before the first `-`.
///
/// `250501WF-D20250501-T181250_Sv.seg` belongs to deployment `250501WF`.
pub fn deployment_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.split_once('-') {
        Some((id, _)) => id.to_string(),
        None => stem,
    }
}

/// Groups sorted paths by deployment id, keeping each group in path order.
pub fn group_by_deployment(paths: &[PathBuf]) -> Vec<(String, Vec<PathBuf>)> {
    paths
        .iter()
        .sorted()
        .map(|p| (deployment_id(p), p.clone()))
        .into_group_map()
        .into_iter()
        .map(|(id, mut files)| {
            files.sort();
            (id, files)
        })
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .collect()
}

/// Directory outputs for `input` go to. Relative `out_dir`s hang off the input's parent.
pub fn resolve_out_dir(input: &Path, out_dir: &Path) -> PathBuf {
    if out_dir.is_absolute() {
        return out_dir.to_path_buf();
    }
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    normalize(&parent.join(out_dir))
}

/// Output path for `input` with its stem transformed and a new extension.
pub fn derived_path(input: &Path, out_dir: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_suffix("_Sv").unwrap_or(&stem);
    resolve_out_dir(input, out_dir).join(format!("{stem}{suffix}.{extension}"))
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
