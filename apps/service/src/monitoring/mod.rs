/// Monitoring module - decides when a cycle may run and how a store is probed
pub mod prober;
pub mod window;

pub use prober::{HttpProber, ProbeError, ProbeOutcome, Prober};
pub use window::{ActiveWindow, Trigger, TriggerDecision, WindowError};
