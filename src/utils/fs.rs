//! File helpers shared by the config and transcript stores.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Writes `contents` to `path` so that readers observe either the old or the new file.
///
/// The parent directory is created if absent.  Data lands in a sibling temporary file that is
/// synced and then renamed over the target.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::io(format!("cannot create {}", parent.display()), e)
            })?;
        }
    }
    let tmp_path = temp_path(path)?;
    let result = (|| -> io::Result<()> {
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(contents)?;
        tmp_file.sync_all()?;
        drop(tmp_file);
        fs::rename(&tmp_path, path)
    })();
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::io(format!("cannot write {}", path.display()), err));
    }
    Ok(())
}

/// Reads `path` as UTF-8, mapping absence to `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8(bytes)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::io(format!("cannot read {}", path.display()), err)),
    }
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        Error::validation(
            format!("{} has no file name", path.display()),
            Some("path".to_string()),
        )
    })?;
    let mut tmp_name = OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    Ok(path.with_file_name(tmp_name))
}
