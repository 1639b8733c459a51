pub mod capability;
pub mod collector;
pub mod cpu;
pub mod host;
pub mod memory;
mod platform;
pub mod process;
pub mod snapshot;
