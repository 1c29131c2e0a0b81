//! On-disk persistence.
//!
//! Two formats: raw contents (`AddressSpace::save`) and the database
//! snapshot (`create_database`, `save_snapshot`, `open_database`). Every
//! write lands in a temporary file next to the destination and is renamed
//! into place, so a failed save never leaves a partial file behind.
//!
//! Database layout: `MAGIC`, format version (u32 LE), blake3 hash of the
//! payload (32 bytes), then the bincode-encoded `Snapshot`.

pub mod database;

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::trace;

use crate::config::SpaceConfig;
use crate::core::{Section, Segment};
use crate::error::{Result, VspaceError};
use crate::metadata::MetadataStore;
use crate::storage::ModificationStatus;

pub const MAGIC: &[u8; 8] = b"VSPACEDB";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = MAGIC.len() + 4 + blake3::OUT_LEN;

/// Everything needed to rebuild an address space.
///
/// Only user-provenance metadata is stored; analysis regenerates the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub view_type: String,
    pub architecture: Option<String>,
    pub config: SpaceConfig,
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
    pub metadata: MetadataStore,
    pub user_functions: Vec<u64>,
    pub entry_points: Vec<u64>,
    /// Current storage bytes
    pub contents: Vec<u8>,
    /// `(start, end, status)` runs of the patch log
    pub modifications: Vec<(u64, u64, ModificationStatus)>,
}

impl Snapshot {
    /// Header plus encoded payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| VspaceError::Serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(blake3::hash(&payload).as_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Check magic, version and hash, then decode.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(VspaceError::Serialization("not a vspace database".into()));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + 4]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(VspaceError::Serialization(format!(
                "unsupported database version {}",
                version
            )));
        }
        let expected = &bytes[MAGIC.len() + 4..HEADER_LEN];
        let payload = &bytes[HEADER_LEN..];
        if blake3::hash(payload).as_bytes() != expected {
            return Err(VspaceError::Serialization(
                "database hash mismatch".into(),
            ));
        }
        let (snapshot, _): (Snapshot, usize) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| VspaceError::Serialization(e.to_string()))?;
        Ok(snapshot)
    }
}

fn temp_beside(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok(NamedTempFile::new_in(dir)?)
}

/// Replace `path` with `contents` in one rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = temp_beside(path)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| VspaceError::Io(e.error))?;
    trace!(path = %path.display(), bytes = contents.len(), "atomic write");
    Ok(())
}

/// Like `write_atomic` but fails when `path` already exists.
pub fn write_atomic_new(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = temp_beside(path)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path)
        .map_err(|e| VspaceError::Io(e.error))?;
    trace!(path = %path.display(), bytes = contents.len(), "atomic create");
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = fs::read(path)?;
    Snapshot::decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SegmentFlags;
    use tempfile::tempdir;

    fn snapshot() -> Snapshot {
        let segment = Segment::new(0x1000, 0x10, 0, 0x10, SegmentFlags::READABLE, false).unwrap();
        let mut metadata = MetadataStore::new();
        metadata
            .kv
            .insert("note".into(), (serde_json::json!({"k": [1, 2]}), false));
        Snapshot {
            saved_at: Utc::now(),
            view_type: "Mapped".into(),
            architecture: Some("x86_64".into()),
            config: SpaceConfig::default(),
            segments: vec![segment],
            sections: Vec::new(),
            metadata,
            user_functions: vec![0x1000],
            entry_points: Vec::new(),
            contents: vec![0xaa; 0x10],
            modifications: vec![(2, 4, ModificationStatus::Changed)],
        }
    }

    #[test]
    fn test_snapshot_encode_decode() {
        let bytes = snapshot().encode().unwrap();
        assert_eq!(&bytes[..8], MAGIC);
        let decoded = Snapshot::decode(&bytes).unwrap();
        assert_eq!(decoded.view_type, "Mapped");
        assert_eq!(decoded.segments.len(), 1);
        assert_eq!(decoded.modifications, vec![(2, 4, ModificationStatus::Changed)]);
        assert_eq!(
            decoded.metadata.kv.get("note").map(|(v, _)| v.clone()),
            Some(serde_json::json!({"k": [1, 2]}))
        );
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let mut bytes = snapshot().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            Snapshot::decode(&bytes),
            Err(VspaceError::Serialization(_))
        ));
        assert!(Snapshot::decode(b"short").is_err());
    }

    #[test]
    fn test_write_atomic_replaces_and_noclobber_refuses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(write_atomic_new(&path, b"third").is_err());
        assert_eq!(fs::read(&path).unwrap(), b"second");
        // no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
