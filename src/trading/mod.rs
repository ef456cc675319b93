pub mod manager;
pub mod monitor;

pub use manager::PositionManager;
pub use monitor::PositionMonitor;
