use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FlashMode {
    Off,
    On,
    Auto,
}

impl Default for FlashMode {
    fn default() -> Self {
        FlashMode::Off
    }
}

/// User-adjustable device settings for one capture attempt.
///
/// `brightness_offset` is additive and clamped to [-50, 50];
/// `contrast_offset` is applied as a multiplicative adjustment on the
/// captured raster. `zoom_factor` is forwarded to the device and never
/// goes below 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    pub zoom_factor: f32,
    pub brightness_offset: i32,
    pub contrast_offset: i32,
    pub flash_mode: FlashMode,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            zoom_factor: 1.0,
            brightness_offset: 0,
            contrast_offset: 0,
            flash_mode: FlashMode::Off,
        }
    }
}

impl DeviceSettings {
    /// Clamp all fields into their documented ranges.
    pub fn clamped(mut self) -> Self {
        self.zoom_factor = self.zoom_factor.max(1.0);
        self.brightness_offset = self.brightness_offset.clamp(-50, 50);
        self
    }
}

/// Normalized tap-to-focus coordinates, both in [0, 1].
///
/// Purely a transient UI affordance: the underlying device may or may
/// not honor it, and it auto-clears two seconds after being set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FocusHint {
    pub x: f32,
    pub y: f32,
}

impl FocusHint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }
}

/// Raw RGB8 raster produced by a capture device frame grab.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RasterImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }
}

/// Where the photo for the current capture session came from.
#[derive(Debug, Clone)]
pub enum SourceImage {
    /// Frame grabbed from the live device, adjustments already applied.
    Frame(RasterImage),
    /// Bytes handed over by the file picker, validated but not decoded.
    File { bytes: Vec<u8>, mime: String },
}
