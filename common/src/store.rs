use crate::{
    error::{StorageFault, StoreError},
    layout::{DEFAULT_STORE_CAPACITY, ERASED_BYTE, RECORD_LEN},
};

/// Byte-addressable persistent region with explicit durability.
///
/// Writes land in a working image and only survive a power cycle once
/// [`commit`](NonVolatileStore::commit) returns `Ok`. Backends implement the
/// image methods; the field operations are shared.
pub trait NonVolatileStore {
    fn image(&self) -> &[u8];

    fn image_mut(&mut self) -> &mut [u8];

    fn commit(&mut self) -> Result<(), StorageFault>;

    /// Resets the working image to the last committed one.
    fn discard(&mut self);

    /// Applies `write` to the working image and commits it. On any error the
    /// working image is reset, so reads keep matching durable state.
    fn update<F>(&mut self, write: F) -> Result<(), StoreError>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<(), StoreError>,
    {
        let result = write(self).and_then(|()| self.commit().map_err(StoreError::from));
        if result.is_err() {
            self.discard();
        }
        result
    }

    fn capacity(&self) -> usize {
        self.image().len()
    }

    fn read_field(&self, offset: usize, len: usize) -> Result<&[u8], StoreError> {
        let capacity = self.capacity();
        let end = offset.saturating_add(len);
        self.image()
            .get(offset..end)
            .ok_or(StoreError::OutOfRange {
                begin: offset,
                end,
                capacity,
            })
    }

    /// Writes `bytes` at `offset`. Bytes past the end of `bytes` are left
    /// untouched; clear the range first when shrinking a value.
    fn write_field(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        let capacity = self.capacity();
        let end = offset.saturating_add(bytes.len());
        let target = self
            .image_mut()
            .get_mut(offset..end)
            .ok_or(StoreError::OutOfRange {
                begin: offset,
                end,
                capacity,
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn clear_range(&mut self, begin: usize, end: usize) -> Result<(), StoreError> {
        let capacity = self.capacity();
        let target = self
            .image_mut()
            .get_mut(begin..end)
            .ok_or(StoreError::OutOfRange {
                begin,
                end,
                capacity,
            })?;
        target.fill(0);
        Ok(())
    }
}

/// Returns an error when `capacity` cannot hold the record.
pub fn check_capacity(capacity: usize) -> Result<(), StoreError> {
    if capacity < RECORD_LEN {
        return Err(StoreError::TooSmall {
            capacity,
            required: RECORD_LEN,
        });
    }
    Ok(())
}

/// RAM-backed store that keeps the staged and durable images apart, so a
/// lost power cycle can be simulated with [`MemoryStore::power_cycle`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    staged: Vec<u8>,
    durable: Vec<u8>,
    commits: usize,
    fail_commits: bool,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Result<Self, StoreError> {
        check_capacity(capacity)?;
        let erased = vec![ERASED_BYTE; capacity];
        Ok(Self {
            staged: erased.clone(),
            durable: erased,
            commits: 0,
            fail_commits: false,
        })
    }

    /// Rebuilds a store from a previously committed image.
    pub fn from_image(image: Vec<u8>) -> Result<Self, StoreError> {
        check_capacity(image.len())?;
        Ok(Self {
            staged: image.clone(),
            durable: image,
            commits: 0,
            fail_commits: false,
        })
    }

    /// Drops everything written since the last successful commit.
    pub fn power_cycle(&mut self) {
        self.discard();
    }

    pub fn durable_image(&self) -> &[u8] {
        &self.durable
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Makes every following commit fail, as a worn-out medium would.
    pub fn fail_commits(&mut self, fail: bool) {
        self.fail_commits = fail;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        let erased = vec![ERASED_BYTE; DEFAULT_STORE_CAPACITY];
        Self {
            staged: erased.clone(),
            durable: erased,
            commits: 0,
            fail_commits: false,
        }
    }
}

impl NonVolatileStore for MemoryStore {
    fn image(&self) -> &[u8] {
        &self.staged
    }

    fn image_mut(&mut self) -> &mut [u8] {
        &mut self.staged
    }

    fn commit(&mut self) -> Result<(), StorageFault> {
        if self.fail_commits {
            return Err(StorageFault::new("medium rejected write"));
        }
        self.durable.clone_from(&self.staged);
        self.commits += 1;
        Ok(())
    }

    fn discard(&mut self) {
        self.staged.clone_from(&self.durable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_reads_erased_fill() {
        let store = MemoryStore::default();
        assert_eq!(store.capacity(), DEFAULT_STORE_CAPACITY);
        assert!(store.read_field(0, 32).unwrap().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn rejects_undersized_capacity() {
        assert_eq!(
            MemoryStore::new(100).unwrap_err(),
            StoreError::TooSmall {
                capacity: 100,
                required: RECORD_LEN,
            }
        );
        assert!(MemoryStore::new(RECORD_LEN).is_ok());
    }

    #[test]
    fn writes_are_lost_without_commit() {
        let mut store = MemoryStore::default();
        store.write_field(0, b"abc").unwrap();
        store.power_cycle();
        assert_eq!(store.read_field(0, 3).unwrap(), &[0xFF_u8; 3]);

        store.write_field(0, b"abc").unwrap();
        store.commit().unwrap();
        store.power_cycle();
        assert_eq!(store.read_field(0, 3).unwrap(), b"abc");
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn write_does_not_clear_trailing_bytes() {
        let mut store = MemoryStore::default();
        store.write_field(96, b"abcdef").unwrap();
        store.write_field(96, b"xy").unwrap();
        assert_eq!(store.read_field(96, 6).unwrap(), b"xycdef");

        store.clear_range(96, 102).unwrap();
        assert_eq!(store.read_field(96, 6).unwrap(), &[0_u8; 6]);
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut store = MemoryStore::new(RECORD_LEN).unwrap();
        assert!(matches!(
            store.write_field(RECORD_LEN - 1, b"ab"),
            Err(StoreError::OutOfRange { .. })
        ));
        assert!(store.read_field(RECORD_LEN, 1).is_err());
        assert!(store.clear_range(0, RECORD_LEN + 1).is_err());
    }

    #[test]
    fn failed_commit_keeps_previous_durable_image() {
        let mut store = MemoryStore::default();
        store.write_field(0, b"old").unwrap();
        store.commit().unwrap();

        store.fail_commits(true);
        store.write_field(0, b"new").unwrap();
        assert!(store.commit().is_err());
        store.power_cycle();
        assert_eq!(store.read_field(0, 3).unwrap(), b"old");
    }

    #[test]
    fn failed_update_restores_working_image() {
        let mut store = MemoryStore::default();
        store.update(|store| store.write_field(0, b"old")).unwrap();

        store.fail_commits(true);
        let err = store
            .update(|store| store.write_field(0, b"new"))
            .unwrap_err();

        assert!(matches!(err, StoreError::Fault(_)));
        assert_eq!(store.read_field(0, 3).unwrap(), b"old");
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn update_rolls_back_partial_writes() {
        let mut store = MemoryStore::default();
        let capacity = store.capacity();

        let err = store
            .update(|store| {
                store.write_field(0, b"half")?;
                store.write_field(capacity, b"x")
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::OutOfRange { .. }));
        assert_eq!(store.image(), store.durable_image());
        assert_eq!(store.commit_count(), 0);
    }
}
