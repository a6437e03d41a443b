//! One JSON file per player.
//!
//! File names are the player id with every byte outside `[A-Za-z0-9_-]`
//! written as `%XX`, so ids round-trip through directory listings.

use crate::error::Result;
use crate::models::PlayerRecord;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_EXT: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";
const CORRUPT_SUFFIX: &str = ".corrupt";

#[derive(Debug, Clone)]
pub struct RecordFiles {
  dir: PathBuf,
}

impl RecordFiles {
  /// Use `dir` for player files, creating it if needed.
  pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
    let dir = dir.as_ref().to_path_buf();
    fs::create_dir_all(&dir)?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn path_for(&self, id: &str) -> PathBuf {
    self.dir.join(format!("{}.{}", encode_id(id), RECORD_EXT))
  }

  pub fn exists(&self, id: &str) -> bool {
    self.path_for(id).is_file()
  }

  /// Read a record. A missing file is `Ok(None)`.
  pub fn read(&self, id: &str) -> Result<Option<PlayerRecord>> {
    let bytes = match fs::read(self.path_for(id)) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
  }

  /// Write a record to a temp file and rename it over the target, so a
  /// reader only ever sees the old or the new version.
  pub fn write_atomic(&self, id: &str, record: &PlayerRecord) -> Result<()> {
    let target = self.path_for(id);
    let mut tmp = target.clone().into_os_string();
    tmp.push(TEMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let bytes = serde_json::to_vec(record)?;
    let written = fs::File::create(&tmp).and_then(|mut file| {
      file.write_all(&bytes)?;
      file.sync_all()
    });
    if let Err(e) = written {
      let _ = fs::remove_file(&tmp);
      return Err(e.into());
    }
    fs::rename(&tmp, &target)?;

    debug!(player_id = %id, bytes = bytes.len(), "wrote player file");
    Ok(())
  }

  /// Remove a record's file. Returns whether one existed.
  pub fn delete(&self, id: &str) -> Result<bool> {
    match fs::remove_file(self.path_for(id)) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
      Err(e) => Err(e.into()),
    }
  }

  /// Move an unreadable file aside so it is kept for inspection but no
  /// longer shadows the id.
  pub fn quarantine(&self, id: &str) -> Result<PathBuf> {
    let path = self.path_for(id);
    let mut aside = path.clone().into_os_string();
    aside.push(CORRUPT_SUFFIX);
    let aside = PathBuf::from(aside);
    fs::rename(&path, &aside)?;
    warn!(player_id = %id, path = %aside.display(), "quarantined unreadable player file");
    Ok(aside)
  }

  /// Every id with a file on disk, sorted.
  pub fn list_ids(&self) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(&self.dir)? {
      let path = entry?.path();
      if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
        continue;
      }
      let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        continue;
      };
      match decode_id(stem) {
        Some(id) => ids.push(id),
        None => warn!(file = %path.display(), "skipping file with undecodable name"),
      }
    }
    ids.sort();
    Ok(ids)
  }

  /// Delete every record file. Returns how many were removed.
  pub fn clear(&self) -> Result<usize> {
    let ids = self.list_ids()?;
    let mut removed = 0;
    for id in &ids {
      if self.delete(id)? {
        removed += 1;
      }
    }
    Ok(removed)
  }
}

fn encode_id(id: &str) -> String {
  let mut out = String::with_capacity(id.len());
  for byte in id.bytes() {
    if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
      out.push(byte as char);
    } else {
      out.push_str(&format!("%{byte:02X}"));
    }
  }
  out
}

fn decode_id(stem: &str) -> Option<String> {
  let bytes = stem.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' {
      let hex = stem.get(i + 1..i + 3)?;
      out.push(u8::from_str_radix(hex, 16).ok()?);
      i += 3;
    } else {
      out.push(bytes[i]);
      i += 1;
    }
  }
  String::from_utf8(out).ok()
}
