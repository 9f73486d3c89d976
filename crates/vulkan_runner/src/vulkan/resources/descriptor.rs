//! Descriptor pool, descriptor sets and the texture sampler

use ash::vk;
use std::sync::Arc;

use crate::vulkan::rendering::DescriptorSetLayout;
use crate::vulkan::{GpuDriver, VulkanError, VulkanResult};

/// Descriptor pool sized for a single sampled image
pub struct DescriptorPool {
    driver: Arc<dyn GpuDriver>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Pool holding one combined image sampler in one set
    pub fn new(driver: Arc<dyn GpuDriver>) -> VulkanResult<Self> {
        let pool_sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .build()];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        let pool = driver.create_descriptor_pool(&pool_info).map_err(|e| {
            log::error!("[DESCRIPTOR] Pool creation failed: {}", e);
            e
        })?;
        Ok(Self { driver, pool })
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        // Sets allocated from the pool go with it
        self.driver.destroy_descriptor_pool(self.pool);
    }
}

/// Descriptor set; keeps its pool alive
pub struct DescriptorSet {
    set: vk::DescriptorSet,
    pool: Arc<DescriptorPool>,
}

impl DescriptorSet {
    /// Get the set handle
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Pool the set was allocated from
    pub fn pool(&self) -> &Arc<DescriptorPool> {
        &self.pool
    }
}

/// Linear clamp-to-edge sampler
pub struct Sampler {
    driver: Arc<dyn GpuDriver>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear filtering and mipmapping, clamped on every axis, single LOD
    pub fn new(driver: Arc<dyn GpuDriver>) -> VulkanResult<Self> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = driver.create_sampler(&create_info).map_err(|e| {
            log::error!("[DESCRIPTOR] Sampler creation failed: {}", e);
            e
        })?;
        Ok(Self { driver, sampler })
    }

    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.driver.destroy_sampler(self.sampler);
    }
}

/// Creates descriptor objects and writes image bindings
#[derive(Clone)]
pub struct DescriptorResourceManager {
    driver: Arc<dyn GpuDriver>,
}

impl DescriptorResourceManager {
    /// Manager for the device behind `driver`
    pub fn new(driver: Arc<dyn GpuDriver>) -> Self {
        Self { driver }
    }

    /// Pool for a single image sampler set
    pub fn create_descriptor_pool(&self) -> VulkanResult<DescriptorPool> {
        DescriptorPool::new(Arc::clone(&self.driver))
    }

    /// Linear clamp-to-edge sampler
    pub fn create_sampler(&self) -> VulkanResult<Sampler> {
        Sampler::new(Arc::clone(&self.driver))
    }

    /// Allocate one set with `layout` from `pool`
    pub fn allocate_descriptor_set(
        &self,
        pool: Arc<DescriptorPool>,
        layout: &DescriptorSetLayout,
    ) -> VulkanResult<DescriptorSet> {
        let set_layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool.handle())
            .set_layouts(&set_layouts);

        let sets = self.driver.allocate_descriptor_sets(&alloc_info).map_err(|e| {
            log::error!("[DESCRIPTOR] Set allocation failed: {}", e);
            e
        })?;
        let set = sets
            .first()
            .copied()
            .ok_or_else(|| VulkanError::invalid_operation("driver returned no descriptor set"))?;
        Ok(DescriptorSet { set, pool })
    }

    /// Point binding 0 of `set` at `image_view` sampled through `sampler`
    ///
    /// The image must be in `SHADER_READ_ONLY_OPTIMAL` when the set is used. Null
    /// handles are rejected without touching the set.
    pub fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> VulkanResult<()> {
        if set == vk::DescriptorSet::null() || image_view == vk::ImageView::null() || sampler == vk::Sampler::null() {
            let e = VulkanError::precondition(format!(
                "descriptor update with null handle (set {set:?}, view {image_view:?}, sampler {sampler:?})"
            ));
            log::error!("[DESCRIPTOR] {}", e);
            return Err(e);
        }

        let image_infos = [vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(image_view)
            .sampler(sampler)
            .build()];
        let writes = [vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_infos)
            .build()];

        self.driver.update_descriptor_sets(&writes);
        log::trace!("[DESCRIPTOR] Set {:?} now samples {:?}", set, image_view);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::mock::MockDriver;
    use ash::vk::Handle;

    fn manager() -> (Arc<MockDriver>, DescriptorResourceManager) {
        let mock = Arc::new(MockDriver::new());
        let manager = DescriptorResourceManager::new(mock.clone());
        (mock, manager)
    }

    #[test]
    fn test_null_sampler_skips_update() {
        let (mock, manager) = manager();
        let result = manager.update_descriptor_set(
            vk::DescriptorSet::from_raw(1),
            vk::ImageView::from_raw(2),
            vk::Sampler::null(),
        );
        assert!(matches!(result, Err(VulkanError::Precondition { .. })));
        assert_eq!(mock.count("update_descriptor_sets"), 0);
    }

    #[test]
    fn test_set_keeps_pool_alive() {
        let (mock, manager) = manager();
        let layout = DescriptorSetLayout::new(mock.clone()).unwrap();
        let pool = Arc::new(manager.create_descriptor_pool().unwrap());
        assert_eq!(mock.handles("descriptor_pool_max_sets"), vec![1]);

        let pool_handle = pool.handle();
        let set = manager.allocate_descriptor_set(pool, &layout).unwrap();
        assert!(mock.is_live(pool_handle.as_raw()));

        let sampler = manager.create_sampler().unwrap();
        manager
            .update_descriptor_set(set.handle(), vk::ImageView::from_raw(9), sampler.handle())
            .unwrap();
        assert_eq!(mock.handles("update_descriptor_sets"), vec![set.handle().as_raw()]);

        drop(set);
        assert!(!mock.is_live(pool_handle.as_raw()));
    }
}
