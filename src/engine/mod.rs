pub mod background;
pub mod detectors;
pub mod learning;
pub mod lifecycle;
pub mod poller;
