//! Queue family and memory type selection
//!
//! Pure queries over capability tables reported by the physical device.

use ash::vk;

/// Queue family indices resolved for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics and transfer work
    pub graphics: u32,
    /// Family able to present to the surface
    pub present: u32,
}

impl QueueFamilyIndices {
    /// True when graphics and present share one family
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Find the first family whose flags intersect `flags`
///
/// When `present_support` is given the family must also be able to present.
pub fn find_queue_family<F>(
    families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
    present_support: Option<F>,
) -> Option<u32>
where
    F: Fn(u32) -> bool,
{
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| family.queue_flags.intersects(flags))
        .map(|(index, _)| index as u32)
        .find(|&index| present_support.as_ref().map_or(true, |supports| supports(index)))
}

/// Find a memory type allowed by `type_filter` carrying all of `required`
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&i| {
        type_filter & (1 << i) != 0
            && properties.memory_types[i as usize].property_flags.contains(required)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn test_graphics_family_is_first_match() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let found = find_queue_family(&families, vk::QueueFlags::GRAPHICS, None::<fn(u32) -> bool>);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn test_present_family_requires_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::GRAPHICS)];
        let found = find_queue_family(&families, vk::QueueFlags::GRAPHICS, Some(|i: u32| i == 1));
        assert_eq!(found, Some(1));

        let none = find_queue_family(&families, vk::QueueFlags::GRAPHICS, Some(|_: u32| false));
        assert_eq!(none, None);
    }

    #[test]
    fn test_memory_type_respects_filter_and_flags() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let staging = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&props, 0b111, staging), Some(2));
        assert_eq!(find_memory_type(&props, 0b011, staging), None);
        assert_eq!(find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
        // Superset flags still satisfy the request
        assert_eq!(find_memory_type(&props, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE), Some(2));
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices { graphics: 0, present: 0 };
        assert!(shared.is_shared());
        assert_eq!(shared.unique(), vec![0]);

        let split = QueueFamilyIndices { graphics: 0, present: 2 };
        assert_eq!(split.unique(), vec![0, 2]);
    }
}
