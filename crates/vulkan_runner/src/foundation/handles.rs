//! Generational handle registry
//!
//! Objects handed across the native boundary are addressed by opaque `u64`
//! handles. Each handle encodes a slot index and a generation, so a handle that
//! outlives its object never resolves to whatever reuses the slot. `0` is never
//! issued and always means "invalid".

use slotmap::{DefaultKey, Key, KeyData, SlotMap};

use crate::vulkan::{VulkanError, VulkanResult};

/// Arena mapping opaque handles to owned objects of one category
pub struct HandleRegistry<T> {
    slots: SlotMap<DefaultKey, T>,
    label: &'static str,
}

impl<T> HandleRegistry<T> {
    /// Create an empty registry; `label` names the category in errors and logs
    pub fn new(label: &'static str) -> Self {
        Self {
            slots: SlotMap::new(),
            label,
        }
    }

    fn key(&self, handle: u64) -> VulkanResult<DefaultKey> {
        if handle == 0 {
            return Err(VulkanError::precondition(format!("null {} handle", self.label)));
        }
        Ok(KeyData::from_ffi(handle).into())
    }

    /// Take ownership of `value` and return its handle
    pub fn insert(&mut self, value: T) -> u64 {
        self.slots.insert(value).data().as_ffi()
    }

    /// Borrow the object behind `handle`
    pub fn get(&self, handle: u64) -> VulkanResult<&T> {
        let key = self.key(handle)?;
        self.slots
            .get(key)
            .ok_or(VulkanError::ResourceNotFound { id: handle })
    }

    /// Mutably borrow the object behind `handle`
    pub fn get_mut(&mut self, handle: u64) -> VulkanResult<&mut T> {
        let key = self.key(handle)?;
        self.slots
            .get_mut(key)
            .ok_or(VulkanError::ResourceNotFound { id: handle })
    }

    /// Remove and return the object; its handle is dead from here on
    pub fn remove(&mut self, handle: u64) -> VulkanResult<T> {
        let key = self.key(handle)?;
        self.slots
            .remove(key)
            .ok_or(VulkanError::ResourceNotFound { id: handle })
    }

    /// Resolve a batch of handles, failing on the first bad one
    pub fn get_all(&self, handles: &[u64]) -> VulkanResult<Vec<&T>> {
        handles.iter().map(|&handle| self.get(handle)).collect()
    }

    /// True if `handle` names a live object
    pub fn contains(&self, handle: u64) -> bool {
        self.get(handle).is_ok()
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no object is registered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every registered object
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_never_issued() {
        let mut registry = HandleRegistry::new("fence");
        for i in 0..16 {
            assert_ne!(registry.insert(i), 0);
        }
        assert!(matches!(registry.get(0), Err(VulkanError::Precondition { .. })));
    }

    #[test]
    fn test_stale_handle_does_not_resolve_after_slot_reuse() {
        let mut registry = HandleRegistry::new("image");
        let first = registry.insert("first");
        assert_eq!(registry.remove(first).unwrap(), "first");

        let second = registry.insert("second");
        assert_ne!(first, second);
        assert_eq!(
            registry.get(first).err(),
            Some(VulkanError::ResourceNotFound { id: first })
        );
        assert_eq!(*registry.get(second).unwrap(), "second");
    }

    #[test]
    fn test_batch_resolution_fails_on_any_bad_handle() {
        let mut registry = HandleRegistry::new("semaphore");
        let a = registry.insert(1);
        let b = registry.insert(2);
        assert_eq!(registry.get_all(&[a, b]).unwrap(), vec![&1, &2]);
        assert!(registry.get_all(&[a, 0]).is_err());
        assert_eq!(registry.len(), 2);
    }
}
