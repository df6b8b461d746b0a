//! Building blocks of the camera session.

pub mod acquisition;
pub mod connection;
pub mod features;
pub mod frame_source;
pub mod params;
pub mod trigger;
