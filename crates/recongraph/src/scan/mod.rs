//! Scan lifecycle: status machine, pause gate and live registry.

pub mod pause_gate;
pub mod registry;
pub mod status;

pub use pause_gate::PauseGate;
pub use registry::{ActiveScan, ActiveScanRegistry, LiveDetails, ScanStats, SubprocessHandle};
pub use status::{ControlAction, ScanStatus};
