//! Conflict handling for batch restores out of the trash-bin.

use dfs_core::{DfsError, DfsResult};
use std::fmt;
use std::str::FromStr;

/// Default upper bound on `name (n)` attempts for
/// [`RestoreConflict::KeepBoth`].
pub const DEFAULT_MAX_RENAME_ATTEMPTS: u32 = 100;

const COMPOUND_EXTENSIONS: [&str; 3] = [".tar.gz", ".tar.bz", ".tar.bz2"];

/// What to do when the restore destination is already taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestoreConflict {
    /// Leave the item in the trash.
    #[default]
    Skip,
    /// Trash whatever occupies the destination, then restore.
    Replace,
    /// Restore next to it under `name (n).ext`.
    KeepBoth,
}

impl FromStr for RestoreConflict {
    type Err = DfsError;

    fn from_str(s: &str) -> DfsResult<Self> {
        match s {
            "skip" => Ok(Self::Skip),
            "replace" => Ok(Self::Replace),
            "keep-both" | "keep_both" => Ok(Self::KeepBoth),
            other => Err(DfsError::InvalidArgument(format!(
                "unknown restore conflict policy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for RestoreConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Replace => "replace",
            Self::KeepBoth => "keep-both",
        })
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    for ext in COMPOUND_EXTENSIONS {
        let Some(split) = name.len().checked_sub(ext.len()) else {
            continue;
        };
        if name
            .get(split..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(ext))
        {
            return name.split_at(split);
        }
    }
    match name.rfind('.') {
        Some(pos) => name.split_at(pos),
        None => (name, ""),
    }
}

/// The `n`-th alternative for `name`: `report.pdf` becomes
/// `report (1).pdf`, `backup.tar.gz` becomes `backup (1).tar.gz`.
pub fn keep_both_name(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem} ({n}){ext}")
}
