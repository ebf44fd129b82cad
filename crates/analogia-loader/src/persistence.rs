//! Snapshot blob format.
//!
//! ```text
//! "ANLG" | version: u32 LE | kind: u8 | bincode payload
//! ```
//!
//! Files are written to a sibling `.tmp` path and renamed into place.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const MAGIC: &[u8; 4] = b"ANLG";
pub const FORMAT_VERSION: u32 = 2;
const HEADER_LEN: usize = 9;

/// Which index a blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlobKind {
    EntityLinker = 1,
    EntityTable = 2,
    EntityToTables = 3,
    EmbeddingsIndex = 4,
    TypesLsh = 5,
    PredicatesLsh = 6,
    EmbeddingsLsh = 7,
}

impl BlobKind {
    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => BlobKind::EntityLinker,
            2 => BlobKind::EntityTable,
            3 => BlobKind::EntityToTables,
            4 => BlobKind::EmbeddingsIndex,
            5 => BlobKind::TypesLsh,
            6 => BlobKind::PredicatesLsh,
            7 => BlobKind::EmbeddingsLsh,
            _ => return None,
        })
    }
}

pub fn encode<T: Serialize>(kind: BlobKind, value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(kind as u8);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(kind: BlobKind, bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
        return Err(anyhow!("not an analogia snapshot blob"));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into()?);
    if version != FORMAT_VERSION {
        return Err(anyhow!("unsupported snapshot version: {version}"));
    }
    match BlobKind::from_tag(bytes[8]) {
        Some(found) if found == kind => {}
        Some(found) => return Err(anyhow!("expected a {kind:?} blob, found {found:?}")),
        None => return Err(anyhow!("unknown blob kind tag {}", bytes[8])),
    }
    Ok(bincode::deserialize(&bytes[HEADER_LEN..])?)
}

pub fn write_blob<T: Serialize>(path: &Path, kind: BlobKind, value: &T) -> Result<()> {
    let bytes = encode(kind, value).with_context(|| format!("failed to encode {}", path.display()))?;
    write_atomic(path, &bytes)
}

pub fn read_blob<T: DeserializeOwned>(path: &Path, kind: BlobKind) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    decode(kind, &bytes).with_context(|| format!("failed to load {}", path.display()))
}

/// Pretty-printed JSON, written atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use analogia_store::ids::IdAllocator;
    use analogia_store::linking::EntityLinking;

    #[test]
    fn test_blob_round_trip() {
        let ids = IdAllocator::in_memory();
        let mut linker = EntityLinking::new("wiki:", "kg:");
        linker.add_mapping("wiki:Berlin", "kg:Berlin", &ids).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entity_linker.ser");
        write_blob(&path, BlobKind::EntityLinker, &linker).unwrap();
        let back: EntityLinking = read_blob(&path, BlobKind::EntityLinker).unwrap();
        assert_eq!(back.map_to("wiki:Berlin").unwrap().as_deref(), Some("kg:Berlin"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_header_is_checked() {
        let bytes = encode(BlobKind::TypesLsh, &vec![1u32, 2, 3]).unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
        assert_eq!(bytes[8], BlobKind::TypesLsh as u8);

        let err = decode::<Vec<u32>>(BlobKind::PredicatesLsh, &bytes).unwrap_err();
        assert!(err.to_string().contains("TypesLsh"));

        let mut corrupt = bytes.clone();
        corrupt[0] = b'X';
        assert!(decode::<Vec<u32>>(BlobKind::TypesLsh, &corrupt).is_err());

        let mut future = bytes;
        future[4] = 9;
        let err = decode::<Vec<u32>>(BlobKind::TypesLsh, &future).unwrap_err();
        assert!(err.to_string().contains("version"));
    }
}
