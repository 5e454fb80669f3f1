mod capture;
mod identification;

pub use capture::{DeviceSettings, FlashMode, FocusHint, RasterImage, SourceImage};
pub use identification::{IdentificationResult, PendingIdentification};
