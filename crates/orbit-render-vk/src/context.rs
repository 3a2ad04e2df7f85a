// SPDX-License-Identifier: CEPL-1.0
//! Instance-level state: loader, instance, validation messenger, surface and
//! the physical device picked for it.
use std::ffi::{c_void, CStr, CString};

use anyhow::{anyhow, Context as _, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// First graphics family; the present family is the graphics one when it
    /// can present, otherwise the first family that can.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        can_present: impl Fn(u32) -> bool,
    ) -> Option<Self> {
        let graphics = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))?
            as u32;
        let present = if can_present(graphics) {
            graphics
        } else {
            (0..families.len() as u32).find(|&i| can_present(i))?
        };
        Some(Self { graphics, present })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// What device selection needs to know about one physical device.
#[derive(Clone, Copy, Debug)]
pub struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub max_image_dimension_3d: u32,
    pub queues: Option<QueueFamilies>,
    pub has_swapchain_ext: bool,
    pub has_surface_formats: bool,
    pub has_present_modes: bool,
    pub sampler_anisotropy: bool,
}

impl DeviceCandidate {
    /// 0 means unusable. Discrete GPUs always outrank integrated ones.
    pub fn score(&self) -> u64 {
        let Some(queues) = self.queues else {
            return 0;
        };
        if !(self.has_swapchain_ext
            && self.has_surface_formats
            && self.has_present_modes
            && self.sampler_anisotropy)
        {
            return 0;
        }

        let mut score = 1;
        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 100_000;
        }
        score += u64::from(self.max_image_dimension_2d);
        score += u64::from(self.max_image_dimension_3d);
        if queues.is_shared() {
            score += 100;
        }
        score
    }
}

/// Highest count present in both masks, capped at `cap`.
pub fn max_usable_samples(
    color: vk::SampleCountFlags,
    depth: vk::SampleCountFlags,
    cap: u32,
) -> vk::SampleCountFlags {
    let both = color & depth;
    [
        (64, vk::SampleCountFlags::TYPE_64),
        (32, vk::SampleCountFlags::TYPE_32),
        (16, vk::SampleCountFlags::TYPE_16),
        (8, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
    ]
    .into_iter()
    .find(|(n, flag)| *n <= cap && both.contains(*flag))
    .map_or(vk::SampleCountFlags::TYPE_1, |(_, flag)| flag)
}

/// First candidate whose optimal-tiling features allow depth attachments.
pub fn pick_depth_format(
    candidates: &[vk::Format],
    optimal_features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&f| {
        optimal_features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan {:?}] {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan {:?}] {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan {:?}] {}", types, msg);
    } else {
        trace!("[vulkan {:?}] {}", types, msg);
    }
    vk::FALSE
}

fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

pub struct Context {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,

    pub phys: vk::PhysicalDevice,
    pub queues: QueueFamilies,
    pub props: vk::PhysicalDeviceProperties,
    pub memory_props: vk::PhysicalDeviceMemoryProperties,
    pub msaa_samples: vk::SampleCountFlags,
    pub depth_format: vk::Format,
}

impl Context {
    /// STRICT ORDER: instance → messenger → surface → physical device.
    /// The device has to be picked against the surface it will present to.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        app_name: &str,
        validation: bool,
        max_msaa_samples: u32,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        unsafe {
            let entry = Entry::load().context("load Vulkan loader")?;
            let validation = validation && layer_available(&entry, VALIDATION_LAYER);
            let instance = create_instance(&entry, dh, app_name, validation)
                .context("create_instance (with WSI + optional debug utils)")?;

            // From here on `ctx` owns everything created, so an early return
            // tears it down through Drop.
            let mut ctx = Self {
                surface_loader: surface::Instance::new(&entry, &instance),
                entry,
                instance,
                debug: None,
                surface: vk::SurfaceKHR::null(),
                phys: vk::PhysicalDevice::null(),
                queues: QueueFamilies {
                    graphics: 0,
                    present: 0,
                },
                props: vk::PhysicalDeviceProperties::default(),
                memory_props: vk::PhysicalDeviceMemoryProperties::default(),
                msaa_samples: vk::SampleCountFlags::TYPE_1,
                depth_format: vk::Format::UNDEFINED,
            };

            if validation {
                let loader = debug_utils::Instance::new(&ctx.entry, &ctx.instance);
                let messenger = loader
                    .create_debug_utils_messenger(&messenger_info(), None)
                    .context("create_debug_utils_messenger")?;
                ctx.debug = Some((loader, messenger));
            }

            ctx.surface = ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None)
                .context("ash_window::create_surface")?;

            let (phys, queues) = ctx.pick_physical_device()?;
            ctx.phys = phys;
            ctx.queues = queues;
            ctx.props = ctx.instance.get_physical_device_properties(phys);
            ctx.memory_props = ctx.instance.get_physical_device_memory_properties(phys);
            ctx.msaa_samples = max_usable_samples(
                ctx.props.limits.framebuffer_color_sample_counts,
                ctx.props.limits.framebuffer_depth_sample_counts,
                max_msaa_samples,
            );
            ctx.depth_format = pick_depth_format(&DEPTH_CANDIDATES, |f| {
                ctx.instance
                    .get_physical_device_format_properties(phys, f)
                    .optimal_tiling_features
            })
            .ok_or_else(|| anyhow!("no supported depth attachment format"))?;

            info!(
                "device: {:?} ({:?}), queues graphics={} present={}, msaa={:?}, depth={:?}",
                ctx.props.device_name_as_c_str().unwrap_or(c"?"),
                ctx.props.device_type,
                queues.graphics,
                queues.present,
                ctx.msaa_samples,
                ctx.depth_format,
            );
            Ok(ctx)
        }
    }

    unsafe fn pick_physical_device(&self) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let mut best: Option<(u64, vk::PhysicalDevice, QueueFamilies)> = None;

        for phys in self
            .instance
            .enumerate_physical_devices()
            .context("enumerate_physical_devices")?
        {
            let candidate = self.describe_device(phys)?;
            let score = candidate.score();
            let props = self.instance.get_physical_device_properties(phys);
            debug!(
                "candidate {:?} ({:?}): score {}",
                props.device_name_as_c_str().unwrap_or(c"?"),
                props.device_type,
                score
            );
            if let Some(queues) = candidate.queues {
                if score > 0 && best.map_or(true, |(s, _, _)| score > s) {
                    best = Some((score, phys, queues));
                }
            }
        }

        best.map(|(_, phys, queues)| (phys, queues))
            .ok_or_else(|| anyhow!("no suitable physical device"))
    }

    unsafe fn describe_device(&self, phys: vk::PhysicalDevice) -> Result<DeviceCandidate> {
        let props = self.instance.get_physical_device_properties(phys);
        let features = self.instance.get_physical_device_features(phys);
        let families = self
            .instance
            .get_physical_device_queue_family_properties(phys);
        let queues = QueueFamilies::find(&families, |i| {
            self.surface_loader
                .get_physical_device_surface_support(phys, i, self.surface)
                .unwrap_or(false)
        });

        let exts = self
            .instance
            .enumerate_device_extension_properties(phys)
            .context("enumerate_device_extension_properties")?;
        let has_swapchain_ext = exts
            .iter()
            .any(|e| e.extension_name_as_c_str() == Ok(swapchain::NAME));

        let (has_surface_formats, has_present_modes) = if has_swapchain_ext {
            (
                !self
                    .surface_loader
                    .get_physical_device_surface_formats(phys, self.surface)
                    .unwrap_or_default()
                    .is_empty(),
                !self
                    .surface_loader
                    .get_physical_device_surface_present_modes(phys, self.surface)
                    .unwrap_or_default()
                    .is_empty(),
            )
        } else {
            (false, false)
        };

        Ok(DeviceCandidate {
            device_type: props.device_type,
            max_image_dimension_2d: props.limits.max_image_dimension2_d,
            max_image_dimension_3d: props.limits.max_image_dimension3_d,
            queues,
            has_swapchain_ext,
            has_surface_formats,
            has_present_modes,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        })
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, format)
        }
    }
}

// STRICT TEARDOWN ORDER (after the logical device is gone):
// - Surface before the instance it was created from
// - Messenger before the instance
// - Instance last
impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn layer_available(entry: &Entry, name: &CStr) -> bool {
    let found = entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str() == Ok(name));
    if !found {
        warn!("{:?} requested but not installed; continuing without validation", name);
    }
    found
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<Instance> {
    let app = CString::new(app_name).context("application name contains NUL")?;

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: app.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut exts = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let layers = [VALIDATION_LAYER.as_ptr()];

    // Chained so instance creation and destruction are covered too.
    let mut debug_info = messenger_info();
    let mut create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        ..Default::default()
    };
    if validation {
        exts.push(debug_utils::NAME.as_ptr());
        create_info.enabled_layer_count = layers.len() as u32;
        create_info.pp_enabled_layer_names = layers.as_ptr();
        create_info.p_next = (&mut debug_info) as *mut _ as *const c_void;
    }
    create_info.enabled_extension_count = exts.len() as u32;
    create_info.pp_enabled_extension_names = exts.as_ptr();

    Ok(entry.create_instance(&create_info, None)?)
}
