//! Host probing used to pick tile parameters.

mod device;

pub use device::{DeviceKind, DeviceProfile, APPLE_SHARED_BUDGET, CPU_FALLBACK_MEMORY};
