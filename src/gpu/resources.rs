//! Shared render device and per-window compositing targets.
//!
//! The device is created on first use and shared by every target through an
//! `Rc`. Targets live in a registry keyed by [`TargetKey`] that only holds
//! `Weak` references: every surface drawing into a window owns one
//! [`TargetHandle`], and the target goes away with the last handle.
//!
//! GPU objects (the backend target and uploaded bitmaps) are created lazily
//! the next time a target is snapshotted or painted, so dropping them is all
//! it takes to recover from device loss.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::error::RenderError;
use crate::events::{PreparedImageCpu, SurfaceId, TargetKey};
use crate::processing::layout::{Rect, Size};

/// What one surface contributes to a frame.
#[derive(Debug, Clone, Copy)]
pub struct Layer<'a> {
    pub surface: SurfaceId,
    pub bounds: Rect,
    pub placement: Rect,
    pub image: Option<&'a PreparedImageCpu>,
    /// Bumped each time the surface places a new image.
    pub generation: u64,
    pub progress: f32,
}

/// A layer resolved to backend bitmaps, handed to [`RenderBackend`].
#[derive(Debug)]
pub struct Composite<'a, B> {
    pub surface: SurfaceId,
    pub bounds: Rect,
    pub placement: Rect,
    pub bitmap: Option<&'a B>,
    pub progress: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetOptions {
    /// Opacity of the darkening overlay laid over previous images.
    pub darken: f32,
    /// Window opacity, `0` transparent to `255` opaque.
    pub alpha: u8,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            darken: 0.6,
            alpha: 255,
        }
    }
}

/// Drawing primitives the slideshow needs from a graphics API.
///
/// Any call may fail with [`RenderError::DeviceLost`]; the manager then
/// drops every device-bound object and recreates them on the next paint.
pub trait RenderBackend {
    type Device;
    type Target;
    type Bitmap;

    fn create_device(&mut self) -> Result<Self::Device, RenderError>;

    /// Creates the presentable target for one window together with its
    /// background buffer, cleared to black.
    fn create_target(
        &mut self,
        device: &Self::Device,
        key: TargetKey,
        size: Size,
        options: &TargetOptions,
    ) -> Result<Self::Target, RenderError>;

    fn upload_bitmap(
        &mut self,
        device: &Self::Device,
        image: &PreparedImageCpu,
    ) -> Result<Self::Bitmap, RenderError>;

    /// Burns `previous` into the target's background buffer: a darkening
    /// overlay across the surface bounds, then the image at full opacity.
    fn snapshot(
        &mut self,
        device: &Self::Device,
        target: &mut Self::Target,
        previous: &Composite<'_, Self::Bitmap>,
    ) -> Result<(), RenderError>;

    /// Presents one frame: the background at full opacity, then per layer a
    /// darkening overlay at `darken * progress` and the image at `progress`.
    fn present(
        &mut self,
        device: &Self::Device,
        target: &mut Self::Target,
        layers: &[Composite<'_, Self::Bitmap>],
    ) -> Result<(), RenderError>;

    /// Polled after each paint pass. Backends that learn about device loss
    /// asynchronously report it here.
    fn device_lost(&self, _device: &Self::Device) -> bool {
        false
    }
}

struct SurfaceBitmap<B> {
    generation: u64,
    bitmap: B,
}

struct TargetGpu<B: RenderBackend> {
    device: Rc<B::Device>,
    target: B::Target,
    bitmaps: HashMap<SurfaceId, SurfaceBitmap<B::Bitmap>>,
}

struct TargetSlot<B: RenderBackend> {
    key: TargetKey,
    size: Size,
    options: TargetOptions,
    gpu: Option<TargetGpu<B>>,
}

/// Shared ownership of one registered target. Cloning adds a reference.
pub struct TargetHandle<B: RenderBackend> {
    slot: Rc<RefCell<TargetSlot<B>>>,
}

impl<B: RenderBackend> Clone for TargetHandle<B> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<B: RenderBackend> std::fmt::Debug for TargetHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.borrow();
        f.debug_struct("TargetHandle")
            .field("key", &slot.key)
            .field("size", &slot.size)
            .field("refs", &Rc::strong_count(&self.slot))
            .finish()
    }
}

impl<B: RenderBackend> TargetHandle<B> {
    pub fn key(&self) -> TargetKey {
        self.slot.borrow().key
    }

    pub fn size(&self) -> Size {
        self.slot.borrow().size
    }

    /// Number of live handles, i.e. surfaces sharing this target.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.slot)
    }

    pub fn has_gpu_resources(&self) -> bool {
        self.slot.borrow().gpu.is_some()
    }
}

pub struct RenderResourceManager<B: RenderBackend> {
    backend: B,
    device: Option<Rc<B::Device>>,
    registry: HashMap<TargetKey, Weak<RefCell<TargetSlot<B>>>>,
    devices_created: u32,
}

impl<B: RenderBackend> RenderResourceManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            device: None,
            registry: HashMap::new(),
            devices_created: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// How many times a device has been created, including recreation after
    /// loss.
    pub fn devices_created(&self) -> u32 {
        self.devices_created
    }

    pub fn live_targets(&self) -> usize {
        self.registry
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Returns the target registered under `key`, registering it first when
    /// no surface holds it yet. `size` and `options` only apply to a new
    /// registration.
    pub fn acquire(&mut self, key: TargetKey, size: Size, options: TargetOptions) -> TargetHandle<B> {
        if let Some(slot) = self.registry.get(&key).and_then(Weak::upgrade) {
            debug!(target_key = %key, refs = Rc::strong_count(&slot) + 1, "target shared");
            return TargetHandle { slot };
        }
        let slot = Rc::new(RefCell::new(TargetSlot {
            key,
            size,
            options,
            gpu: None,
        }));
        self.registry.insert(key, Rc::downgrade(&slot));
        debug!(target_key = %key, width = size.width, height = size.height, "target registered");
        TargetHandle { slot }
    }

    /// Drops `surface`'s reference. Returns `true` when it was the last one
    /// and the target was destroyed.
    pub fn release(&mut self, handle: TargetHandle<B>, surface: SurfaceId) -> bool {
        let key = {
            let mut slot = handle.slot.borrow_mut();
            if let Some(gpu) = slot.gpu.as_mut() {
                gpu.bitmaps.remove(&surface);
            }
            slot.key
        };
        let last = Rc::strong_count(&handle.slot) == 1;
        drop(handle);
        if last {
            self.registry.remove(&key);
            debug!(target_key = %key, "target destroyed");
        }
        last
    }

    /// Records a new window size. The backend target is rebuilt at the next
    /// paint.
    pub fn resize(&mut self, handle: &TargetHandle<B>, size: Size) {
        let mut slot = handle.slot.borrow_mut();
        if slot.size == size {
            return;
        }
        slot.size = size;
        slot.gpu = None;
    }

    /// Drops the device and every device-bound object. CPU-side state is
    /// untouched, so the next paint rebuilds everything from it.
    pub fn invalidate_all(&mut self) {
        self.device = None;
        let mut dropped = 0;
        self.registry.retain(|_, weak| match weak.upgrade() {
            Some(slot) => {
                if slot.borrow_mut().gpu.take().is_some() {
                    dropped += 1;
                }
                true
            }
            None => false,
        });
        info!(targets = dropped, "render resources released");
    }

    /// Composites `previous` into the target's background buffer.
    pub fn snapshot(&mut self, handle: &TargetHandle<B>, previous: &Layer<'_>) -> Result<(), RenderError> {
        let mut slot = handle.slot.borrow_mut();
        self.ensure_target(&mut slot)?;
        let Some(gpu) = slot.gpu.as_mut() else {
            return Ok(());
        };
        Self::ensure_bitmap(&mut self.backend, gpu, previous)?;
        let TargetGpu {
            device,
            target,
            bitmaps,
        } = gpu;
        let composite = resolve(previous, bitmaps);
        self.backend.snapshot(device, target, &composite)?;
        if self.backend.device_lost(device) {
            return Err(RenderError::DeviceLost);
        }
        Ok(())
    }

    /// Presents one frame for the target holding `layers`.
    pub fn paint(&mut self, handle: &TargetHandle<B>, layers: &[Layer<'_>]) -> Result<(), RenderError> {
        let mut slot = handle.slot.borrow_mut();
        self.ensure_target(&mut slot)?;
        let Some(gpu) = slot.gpu.as_mut() else {
            return Ok(());
        };
        for layer in layers {
            Self::ensure_bitmap(&mut self.backend, gpu, layer)?;
        }
        let TargetGpu {
            device,
            target,
            bitmaps,
        } = gpu;
        let composites: Vec<_> = layers.iter().map(|layer| resolve(layer, bitmaps)).collect();
        self.backend.present(device, target, &composites)?;
        if self.backend.device_lost(device) {
            return Err(RenderError::DeviceLost);
        }
        Ok(())
    }

    fn ensure_target(&mut self, slot: &mut TargetSlot<B>) -> Result<(), RenderError> {
        if slot.gpu.is_some() {
            return Ok(());
        }
        let device = match self.device.as_ref() {
            Some(device) => Rc::clone(device),
            None => {
                let device = Rc::new(self.backend.create_device()?);
                self.devices_created += 1;
                info!(generation = self.devices_created, "render device created");
                self.device = Some(Rc::clone(&device));
                device
            }
        };
        let target = self
            .backend
            .create_target(&device, slot.key, slot.size, &slot.options)?;
        debug!(target_key = %slot.key, width = slot.size.width, height = slot.size.height, "target resources created");
        slot.gpu = Some(TargetGpu {
            device,
            target,
            bitmaps: HashMap::new(),
        });
        Ok(())
    }

    fn ensure_bitmap(backend: &mut B, gpu: &mut TargetGpu<B>, layer: &Layer<'_>) -> Result<(), RenderError> {
        let Some(image) = layer.image else {
            gpu.bitmaps.remove(&layer.surface);
            return Ok(());
        };
        let current = gpu
            .bitmaps
            .get(&layer.surface)
            .is_some_and(|b| b.generation == layer.generation);
        if current {
            return Ok(());
        }
        let bitmap = backend.upload_bitmap(&gpu.device, image).inspect_err(|err| {
            if !matches!(err, RenderError::DeviceLost) {
                warn!(path = %image.path.display(), error = %err, "bitmap upload failed");
            }
        })?;
        gpu.bitmaps.insert(
            layer.surface,
            SurfaceBitmap {
                generation: layer.generation,
                bitmap,
            },
        );
        Ok(())
    }
}

fn resolve<'a, B>(
    layer: &Layer<'_>,
    bitmaps: &'a HashMap<SurfaceId, SurfaceBitmap<B>>,
) -> Composite<'a, B> {
    Composite {
        surface: layer.surface,
        bounds: layer.bounds,
        placement: layer.placement,
        bitmap: bitmaps
            .get(&layer.surface)
            .filter(|_| layer.image.is_some())
            .map(|b| &b.bitmap),
        progress: layer.progress,
    }
}
