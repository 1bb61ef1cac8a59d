//! Glance host: wires the pure core to the engine and a presentation surface.
pub mod platform;
