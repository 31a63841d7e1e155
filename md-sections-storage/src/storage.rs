use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SLOTS: [Slot; 2] = [
    Slot {
        superblock: "superblock_a",
        segment: "segment_a",
    },
    Slot {
        superblock: "superblock_b",
        segment: "segment_b",
    },
];
const VERSION: u32 = 1;

struct Slot {
    superblock: &'static str,
    segment: &'static str,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Superblock {
    version: u32,
    generation: u64,
    segment_checksum: u32,
    segment_len: u64,
}

/// Crash-safe snapshot files: two superblock/segment slots written
/// alternately, so the previous snapshot survives a torn write.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    generation: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt storage: {0}")]
    Corrupt(&'static str),
    #[error("missing storage")]
    Missing,
}

impl Storage {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let generation = SLOTS
            .iter()
            .filter_map(|slot| read_superblock(&root, slot).ok().flatten())
            .map(|superblock| superblock.generation)
            .max()
            .unwrap_or(0);
        Ok(Self { root, generation })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Writes `payload` into the slot not holding the newest snapshot.
    pub fn write_snapshot(&mut self, payload: &[u8]) -> Result<(), StorageError> {
        let generation = self.generation + 1;
        let slot = &SLOTS[(generation % 2) as usize];

        replace_file(&self.root.join(slot.segment), payload)?;

        let superblock = Superblock {
            version: VERSION,
            generation,
            segment_checksum: checksum_bytes(payload),
            segment_len: payload.len() as u64,
        };
        let encoded =
            serde_json::to_vec(&superblock).map_err(|_| StorageError::Corrupt("encode"))?;
        replace_file(&self.root.join(slot.superblock), &encoded)?;

        self.generation = generation;
        Ok(())
    }

    /// Payload of the newest slot whose superblock and segment both verify.
    pub fn read_snapshot(&self) -> Result<Vec<u8>, StorageError> {
        let mut newest: Option<(u64, Vec<u8>)> = None;
        let mut last_error = None;
        let mut found_any = false;

        for slot in &SLOTS {
            match self.read_slot(slot) {
                Ok(Some((generation, segment))) => {
                    found_any = true;
                    if newest.as_ref().is_none_or(|(best, _)| generation > *best) {
                        newest = Some((generation, segment));
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    found_any = true;
                    last_error = Some(err);
                }
            }
        }

        if let Some((_, segment)) = newest {
            return Ok(segment);
        }
        match last_error {
            Some(err) if found_any => Err(err),
            _ => Err(StorageError::Missing),
        }
    }

    fn read_slot(&self, slot: &Slot) -> Result<Option<(u64, Vec<u8>)>, StorageError> {
        let Some(superblock) = read_superblock(&self.root, slot)? else {
            return Ok(None);
        };
        if superblock.version != VERSION {
            return Err(StorageError::Corrupt("version"));
        }
        let segment = match fs::read(self.root.join(slot.segment)) {
            Ok(segment) => segment,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::Corrupt("segment missing"));
            }
            Err(err) => return Err(StorageError::Io(err)),
        };
        if segment.len() as u64 != superblock.segment_len {
            return Err(StorageError::Corrupt("length mismatch"));
        }
        if checksum_bytes(&segment) != superblock.segment_checksum {
            return Err(StorageError::Corrupt("checksum mismatch"));
        }
        Ok(Some((superblock.generation, segment)))
    }
}

fn read_superblock(root: &Path, slot: &Slot) -> Result<Option<Superblock>, StorageError> {
    match fs::read(root.join(slot.superblock)) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|_| StorageError::Corrupt("decode")),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StorageError::Io(err)),
    }
}

fn replace_file(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn checksum_bytes(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn newest_generation_wins() {
        let dir = tempdir().unwrap();
        let mut storage = Storage::open(dir.path()).unwrap();
        storage.write_snapshot(b"first").unwrap();
        storage.write_snapshot(b"second").unwrap();

        let reopened = Storage::open(dir.path()).unwrap();
        assert_eq!(reopened.generation(), 2);
        assert_eq!(reopened.read_snapshot().unwrap(), b"second");
    }

    #[test]
    fn lost_superblock_falls_back_to_previous_snapshot() {
        let dir = tempdir().unwrap();
        let mut storage = Storage::open(dir.path()).unwrap();
        storage.write_snapshot(b"first").unwrap();
        storage.write_snapshot(b"second").unwrap();

        fs::remove_file(dir.path().join(SLOTS[0].superblock)).unwrap();

        assert_eq!(storage.read_snapshot().unwrap(), b"first");
    }

    #[test]
    fn corrupt_segment_falls_back_to_previous_snapshot() {
        let dir = tempdir().unwrap();
        let mut storage = Storage::open(dir.path()).unwrap();
        storage.write_snapshot(b"first").unwrap();
        storage.write_snapshot(b"second").unwrap();

        let segment_path = dir.path().join(SLOTS[0].segment);
        let mut segment = fs::read(&segment_path).unwrap();
        segment[0] ^= 0xFF;
        fs::write(&segment_path, &segment).unwrap();

        assert_eq!(storage.read_snapshot().unwrap(), b"first");
    }

    #[test]
    fn corruption_without_fallback_is_reported() {
        let dir = tempdir().unwrap();
        let mut storage = Storage::open(dir.path()).unwrap();
        storage.write_snapshot(b"payload").unwrap();

        let segment_path = dir.path().join(SLOTS[1].segment);
        let mut segment = fs::read(&segment_path).unwrap();
        segment[0] ^= 0xFF;
        fs::write(&segment_path, &segment).unwrap();

        let err = storage.read_snapshot().unwrap_err();
        match err {
            StorageError::Corrupt(msg) => assert_eq!(msg, "checksum mismatch"),
            other => panic!("Expected corruption error, got {other:?}"),
        }
    }

    #[test]
    fn version_mismatch() {
        let dir = tempdir().unwrap();
        let mut storage = Storage::open(dir.path()).unwrap();
        storage.write_snapshot(b"payload").unwrap();

        let bad_superblock = Superblock {
            version: VERSION + 1,
            generation: 1,
            segment_checksum: checksum_bytes(b"payload"),
            segment_len: 7,
        };
        let encoded = serde_json::to_vec(&bad_superblock).unwrap();
        fs::write(dir.path().join(SLOTS[1].superblock), &encoded).unwrap();

        let err = storage.read_snapshot().unwrap_err();
        match err {
            StorageError::Corrupt(msg) => assert_eq!(msg, "version"),
            other => panic!("Expected version corruption error, got {other:?}"),
        }
    }

    #[test]
    fn length_mismatch() {
        let dir = tempdir().unwrap();
        let mut storage = Storage::open(dir.path()).unwrap();
        storage.write_snapshot(b"payload").unwrap();

        fs::write(dir.path().join(SLOTS[1].segment), b"short").unwrap();

        let err = storage.read_snapshot().unwrap_err();
        match err {
            StorageError::Corrupt(msg) => assert_eq!(msg, "length mismatch"),
            other => panic!("Expected length mismatch error, got {other:?}"),
        }
    }

    #[test]
    fn missing_storage() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let err = storage.read_snapshot().unwrap_err();
        match err {
            StorageError::Missing => {}
            other => panic!("Expected Missing error, got {other:?}"),
        }
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let mut storage = Storage::open(dir.path()).unwrap();
        storage.write_snapshot(b"payload").unwrap();
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
