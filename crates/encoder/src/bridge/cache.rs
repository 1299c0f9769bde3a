//! Arena of wrapped interop resources keyed by the source resource identity.

use std::collections::HashMap;
use std::ffi::c_void;

use hwenc_common::ResourceId;
use hwenc_gpu_hal::InteropHandle;

/// One source resource as seen through the interop device.
#[derive(Debug)]
pub struct WrappedEntry {
    pub id: ResourceId,
    /// Borrowed source texture; owned by the caller.
    pub source: *mut c_void,
    /// Older-API wrapper around `source`; owned by the bridge.
    pub wrapped: InteropHandle,
    /// 2D texture view of `wrapped`; this is what the encoder registers.
    pub view: InteropHandle,
}

// SAFETY: `source` is only compared, never dereferenced. The interop handles
// are Send on their own.
unsafe impl Send for WrappedEntry {}

/// Slot arena plus an identity index.
///
/// Slots of removed entries are recycled through a free list, so slot indices
/// stay small for long sessions that cycle through many textures.
#[derive(Debug, Default)]
pub struct WrappedResourceCache {
    slots: Vec<Option<WrappedEntry>>,
    free: Vec<usize>,
    index: HashMap<ResourceId, usize>,
}

impl WrappedResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&WrappedEntry> {
        let slot = *self.index.get(&id)?;
        self.slots.get(slot)?.as_ref()
    }

    /// Insert an entry, returning the one it replaced for the same identity.
    pub fn insert(&mut self, entry: WrappedEntry) -> Option<WrappedEntry> {
        let previous = self.remove(entry.id);
        let id = entry.id;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        previous
    }

    pub fn remove(&mut self, id: ResourceId) -> Option<WrappedEntry> {
        let slot = self.index.remove(&id)?;
        let entry = self.slots.get_mut(slot)?.take();
        self.free.push(slot);
        entry
    }

    /// Remove every entry, in slot order.
    pub fn drain(&mut self) -> Vec<WrappedEntry> {
        self.index.clear();
        self.free.clear();
        self.slots.drain(..).flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: usize) -> InteropHandle {
        InteropHandle::from_raw(raw as *mut c_void).unwrap()
    }

    fn entry(id: u64) -> WrappedEntry {
        let base = (id as usize + 1) * 0x100;
        WrappedEntry {
            id: ResourceId(id),
            source: base as *mut c_void,
            wrapped: handle(base + 0x10),
            view: handle(base + 0x20),
        }
    }

    #[test]
    fn insert_and_lookup() {
        let mut cache = WrappedResourceCache::new();
        assert!(cache.insert(entry(1)).is_none());
        assert!(cache.insert(entry(2)).is_none());

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(ResourceId(1)));
        assert_eq!(cache.get(ResourceId(2)).unwrap().view.as_ptr() as usize, 0x320);
        assert!(cache.get(ResourceId(3)).is_none());
    }

    #[test]
    fn one_entry_per_identity() {
        let mut cache = WrappedResourceCache::new();
        cache.insert(entry(7));
        let replaced = cache.insert(entry(7)).expect("previous entry returned");
        assert_eq!(replaced.id, ResourceId(7));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut cache = WrappedResourceCache::new();
        cache.insert(entry(1));
        cache.insert(entry(2));
        assert!(cache.remove(ResourceId(1)).is_some());
        assert!(cache.remove(ResourceId(1)).is_none());

        cache.insert(entry(3));
        assert_eq!(cache.slots.len(), 2);
        assert_eq!(cache.index[&ResourceId(3)], 0);
    }

    #[test]
    fn drain_empties_everything() {
        let mut cache = WrappedResourceCache::new();
        for id in 0..4 {
            cache.insert(entry(id));
        }
        cache.remove(ResourceId(2));

        let drained = cache.drain();
        assert_eq!(drained.len(), 3);
        assert!(cache.is_empty());
        assert!(!cache.contains(ResourceId(0)));
    }
}
