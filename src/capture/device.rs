use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::error::DeviceError;
use crate::models::{DeviceSettings, RasterImage};

pub const PREFERRED_WIDTH: u32 = 1920;
pub const PREFERRED_HEIGHT: u32 = 1080;

/// Requested device configuration. The rear/environment-facing device is
/// preferred, but whatever resolution the device actually grants is
/// accepted; a mismatch is never a failure.
#[derive(Debug, Clone)]
pub struct DeviceConstraints {
    pub prefer_environment_facing: bool,
    pub preferred_width: u32,
    pub preferred_height: u32,
}

impl Default for DeviceConstraints {
    fn default() -> Self {
        Self {
            prefer_environment_facing: true,
            preferred_width: PREFERRED_WIDTH,
            preferred_height: PREFERRED_HEIGHT,
        }
    }
}

/// Opaque handle to an acquired device. Sole-owner resource: exactly one
/// live handle per session, released on every exit path.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    pub id: u64,
    /// Resolution actually granted by the device.
    pub width: u32,
    pub height: u32,
}

/// Capability boundary over the concrete capture hardware so the state
/// machine can be driven against in-process fakes.
///
/// `release` must be idempotent: calling it again for an already-released
/// handle has no observable effect.
pub trait CaptureDevice: Send + Sync {
    fn acquire(&self, constraints: &DeviceConstraints) -> Result<DeviceHandle, DeviceError>;
    fn frame(&self, handle: &DeviceHandle, settings: &DeviceSettings)
        -> Result<RasterImage, DeviceError>;
    fn release(&self, handle: &DeviceHandle);
}

/// Holds an acquired handle and guarantees release on every exit path,
/// including unwind. The handle is released at most once through this
/// guard; the trait impl stays responsible for its own idempotence.
pub struct AcquiredDevice {
    device: Arc<dyn CaptureDevice>,
    handle: Option<DeviceHandle>,
}

impl AcquiredDevice {
    pub fn new(device: Arc<dyn CaptureDevice>, handle: DeviceHandle) -> Self {
        Self {
            device,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> Option<&DeviceHandle> {
        self.handle.as_ref()
    }

    pub fn frame(&self, settings: &DeviceSettings) -> Result<RasterImage, DeviceError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| DeviceError::Frame("device handle already released".into()))?;
        self.device.frame(handle, settings)
    }

    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.device.release(&handle);
        }
    }
}

impl Drop for AcquiredDevice {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("device handle dropped without explicit release; releasing now");
            self.release();
        }
    }
}

/// In-process fake device producing uniform gray frames. Used by tests
/// and the demo binary; also handy as a development stand-in where no
/// real capture hardware exists.
pub struct StubDevice {
    granted_width: u32,
    granted_height: u32,
    fail_acquire: AtomicBool,
    next_handle: AtomicU64,
    acquires: AtomicU64,
    released: Mutex<HashSet<u64>>,
}

impl StubDevice {
    pub fn new() -> Self {
        Self::with_resolution(64, 48)
    }

    /// A stub granting a resolution other than the preferred one, to
    /// exercise graceful acceptance of whatever the device offers.
    pub fn with_resolution(width: u32, height: u32) -> Self {
        Self {
            granted_width: width,
            granted_height: height,
            fail_acquire: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            acquires: AtomicU64::new(0),
            released: Mutex::new(HashSet::new()),
        }
    }

    /// Make subsequent `acquire` calls fail as if permission was denied.
    pub fn deny_access(&self) {
        self.fail_acquire.store(true, Ordering::SeqCst);
    }

    pub fn acquire_count(&self) -> u64 {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Number of distinct handles released so far. Releasing the same
    /// handle again does not move this counter.
    pub fn release_count(&self) -> u64 {
        self.released.lock().unwrap().len() as u64
    }
}

impl Default for StubDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for StubDevice {
    fn acquire(&self, _constraints: &DeviceConstraints) -> Result<DeviceHandle, DeviceError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable("permission denied".into()));
        }
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceHandle {
            id: self.next_handle.fetch_add(1, Ordering::SeqCst),
            width: self.granted_width,
            height: self.granted_height,
        })
    }

    fn frame(
        &self,
        handle: &DeviceHandle,
        _settings: &DeviceSettings,
    ) -> Result<RasterImage, DeviceError> {
        let len = (handle.width * handle.height * 3) as usize;
        Ok(RasterImage::new(vec![128u8; len], handle.width, handle.height))
    }

    fn release(&self, handle: &DeviceHandle) {
        self.released.lock().unwrap().insert(handle.id);
    }
}
