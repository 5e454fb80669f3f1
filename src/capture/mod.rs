mod controller;
mod device;
mod raster;
mod state;

pub use controller::{
    CaptureController, CaptureSnapshot, PickOutcome, SnapshotOutcome, StartOutcome,
    SNAPSHOT_DEBOUNCE,
};
pub use device::{
    AcquiredDevice, CaptureDevice, DeviceConstraints, DeviceHandle, StubDevice, PREFERRED_HEIGHT,
    PREFERRED_WIDTH,
};
pub use raster::{apply_adjustments, encode_jpeg, validate_picked_file, MAX_FILE_BYTES};
pub use state::{CapturePhase, CaptureSession, FOCUS_HINT_TTL};
