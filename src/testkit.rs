//! In-memory stand-ins for the decoder and the GPU, used by unit and
//! integration tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::anyhow;

use crate::error::{DecodeError, RenderError};
use crate::events::{PreparedImageCpu, SurfaceId, TargetKey};
use crate::gpu::resources::{Composite, RenderBackend, TargetOptions};
use crate::processing::layout::{Rect, Size};
use crate::tasks::loader::Decoder;

/// Decodes paths to solid images of a configured size. Unknown paths decode
/// to 64x48; paths marked broken fail.
#[derive(Debug, Default)]
pub struct MemoryDecoder {
    sizes: HashMap<PathBuf, (u32, u32)>,
    broken: HashSet<PathBuf>,
    decoded: Vec<PathBuf>,
}

impl MemoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        self.sizes.insert(path.into(), (width, height));
        self
    }

    pub fn with_broken(mut self, path: impl Into<PathBuf>) -> Self {
        self.broken.insert(path.into());
        self
    }

    pub fn break_path(&mut self, path: impl Into<PathBuf>) {
        self.broken.insert(path.into());
    }

    pub fn repair_path(&mut self, path: &Path) {
        self.broken.remove(path);
    }

    /// Every path passed to `decode`, in call order.
    pub fn decoded(&self) -> &[PathBuf] {
        &self.decoded
    }
}

impl Decoder for MemoryDecoder {
    fn decode(&mut self, path: &Path) -> Result<PreparedImageCpu, DecodeError> {
        self.decoded.push(path.to_path_buf());
        if self.broken.contains(path) {
            return Err(DecodeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "corrupt test image",
            )));
        }
        let (width, height) = self.sizes.get(path).copied().unwrap_or((64, 48));
        Ok(PreparedImageCpu {
            path: path.to_path_buf(),
            width,
            height,
            pixels: vec![0x80; (width as usize) * (height as usize) * 4],
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresentedLayer {
    pub surface: SurfaceId,
    pub path: Option<PathBuf>,
    pub placement: Rect,
    pub progress: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateDevice { generation: u32 },
    CreateTarget { key: TargetKey, size: Size },
    Upload { path: PathBuf, device: u32 },
    Snapshot { key: TargetKey, path: Option<PathBuf> },
    Present { key: TargetKey, layers: Vec<PresentedLayer> },
}

#[derive(Debug)]
pub struct RecordedTarget {
    key: TargetKey,
    device: u32,
}

#[derive(Debug)]
pub struct RecordedBitmap {
    path: PathBuf,
    device: u32,
}

/// Backend that records every call. Device loss can be injected.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    devices: u32,
    lose_on_present: bool,
    lose_on_snapshot: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn lose_device_on_next_present(&mut self) {
        self.lose_on_present = true;
    }

    pub fn lose_device_on_next_snapshot(&mut self) {
        self.lose_on_snapshot = true;
    }

    /// Layers of every frame presented to `key`, oldest first.
    pub fn frames(&self, key: TargetKey) -> Vec<Vec<PresentedLayer>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Present { key: k, layers } if *k == key => Some(layers.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn present_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Present { .. }))
            .count()
    }

    fn check_device(&self, device: u32) -> Result<(), RenderError> {
        if device != self.devices {
            return Err(RenderError::Backend(anyhow!(
                "object from device {device} used with device {}",
                self.devices
            )));
        }
        Ok(())
    }
}

impl RenderBackend for RecordingBackend {
    type Device = u32;
    type Target = RecordedTarget;
    type Bitmap = RecordedBitmap;

    fn create_device(&mut self) -> Result<u32, RenderError> {
        self.devices += 1;
        self.calls.push(BackendCall::CreateDevice {
            generation: self.devices,
        });
        Ok(self.devices)
    }

    fn create_target(
        &mut self,
        device: &u32,
        key: TargetKey,
        size: Size,
        _options: &TargetOptions,
    ) -> Result<RecordedTarget, RenderError> {
        self.check_device(*device)?;
        self.calls.push(BackendCall::CreateTarget { key, size });
        Ok(RecordedTarget {
            key,
            device: *device,
        })
    }

    fn upload_bitmap(
        &mut self,
        device: &u32,
        image: &PreparedImageCpu,
    ) -> Result<RecordedBitmap, RenderError> {
        self.check_device(*device)?;
        self.calls.push(BackendCall::Upload {
            path: image.path.clone(),
            device: *device,
        });
        Ok(RecordedBitmap {
            path: image.path.clone(),
            device: *device,
        })
    }

    fn snapshot(
        &mut self,
        device: &u32,
        target: &mut RecordedTarget,
        previous: &Composite<'_, RecordedBitmap>,
    ) -> Result<(), RenderError> {
        self.check_device(*device)?;
        self.check_device(target.device)?;
        if std::mem::take(&mut self.lose_on_snapshot) {
            return Err(RenderError::DeviceLost);
        }
        self.calls.push(BackendCall::Snapshot {
            key: target.key,
            path: previous.bitmap.map(|b| b.path.clone()),
        });
        Ok(())
    }

    fn present(
        &mut self,
        device: &u32,
        target: &mut RecordedTarget,
        layers: &[Composite<'_, RecordedBitmap>],
    ) -> Result<(), RenderError> {
        self.check_device(*device)?;
        self.check_device(target.device)?;
        for bitmap in layers.iter().filter_map(|l| l.bitmap) {
            self.check_device(bitmap.device)?;
        }
        if std::mem::take(&mut self.lose_on_present) {
            return Err(RenderError::DeviceLost);
        }
        self.calls.push(BackendCall::Present {
            key: target.key,
            layers: layers
                .iter()
                .map(|l| PresentedLayer {
                    surface: l.surface,
                    path: l.bitmap.map(|b| b.path.clone()),
                    placement: l.placement,
                    progress: l.progress,
                })
                .collect(),
        });
        Ok(())
    }
}
