//! pidicon: a headless daemon that drives Pixoo-class 64x64 LED matrix
//! displays over MQTT. See `runtime` for the Scene Runtime, the core of
//! the system.

pub mod canvas;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod facade;
pub mod font;
pub mod mqtt;
pub mod router;
pub mod runtime;
pub mod scene;
pub mod store;
pub mod types;
