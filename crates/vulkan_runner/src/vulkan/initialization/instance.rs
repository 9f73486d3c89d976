//! Vulkan instance and surface creation

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr, CString};

use crate::config::RunnerConfig;
use crate::vulkan::{VulkanError, VulkanResult};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with RAII cleanup
///
/// Shared through `Arc` by every [`DeviceContext`](super::DeviceContext), so the
/// instance is always destroyed last.
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    surface_loader: Surface,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create the instance with the surface extension plus `platform_extensions`
    ///
    /// `platform_extensions` normally comes from [`platform_extensions`] or from the
    /// window system. The generic `VK_KHR_surface` is added when missing.
    pub fn new(config: &RunnerConfig, platform_extensions: &[String]) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = to_cstring(&config.application_name)?;
        let engine_name = to_cstring("vulkan_runner")?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let enable_validation = config.validation_enabled();
        let mut extension_names = platform_extensions
            .iter()
            .map(|name| to_cstring(name))
            .collect::<VulkanResult<Vec<_>>>()?;
        let surface_name = Surface::name().to_owned();
        if !extension_names.contains(&surface_name) {
            extension_names.push(surface_name);
        }
        if enable_validation {
            extension_names.push(DebugUtils::name().to_owned());
        }
        let extensions: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let layer_names = if enable_validation {
            vec![to_cstring(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layers: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
            log::error!("[DEVICE] vkCreateInstance failed: {:?} ({})", e, e.as_raw());
            VulkanError::Api(e)
        })?;

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    log::warn!("[DEVICE] Debug messenger unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        log::info!(
            "[DEVICE] Instance created ({} extensions, validation {})",
            extensions.len(),
            if enable_validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug,
        })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(VulkanError::Api)
    }

    /// Vulkan entry point
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Instance dispatch table
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// `VK_KHR_surface` loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("[DEVICE] Instance destroyed");
    }
}

/// Instance extensions the platform needs to present to `display`
pub fn platform_extensions(display: RawDisplayHandle) -> VulkanResult<Vec<String>> {
    let names = ash_window::enumerate_required_extensions(display).map_err(VulkanError::Api)?;
    Ok(names
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
        .collect())
}

/// Wrap a native window in a presentation surface
///
/// The window handle is only borrowed for the duration of the call.
pub fn create_surface(
    instance: &VulkanInstance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> VulkanResult<vk::SurfaceKHR> {
    unsafe { ash_window::create_surface(instance.entry(), instance.instance(), display, window, None) }.map_err(
        |e| {
            log::error!("[DEVICE] Surface creation failed: {:?}", e);
            VulkanError::Api(e)
        },
    )
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|_| VulkanError::precondition(format!("interior NUL in {value:?}")))
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}
