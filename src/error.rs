//! Error types for Whirl.
//!
//! Most scene problems never surface as errors: a broken constraint is logged
//! and degraded to "no constraint" so the frame loop keeps running. The types
//! here cover the operations that genuinely cannot continue, such as GPU
//! initialization, config parsing and empty scene geometry.

use thiserror::Error;

/// Errors that can occur during GPU initialization and read-back.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support.")]
    NoAdapter,
    /// Failed to create GPU device.
    #[error("Failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
    /// Failed to map buffer for reading.
    #[error("Failed to map GPU buffer: {0}")]
    BufferMapping(String),
}

/// Errors produced while loading or validating a [`SimConfig`](crate::SimConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config text is not valid JSON for a `SimConfig`.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while turning scene geometry into simulation arrays.
#[derive(Debug, Error, PartialEq)]
pub enum SceneError {
    /// A rigid body has no polygon path with at least three vertices.
    #[error("Rigid body '{name}' has no path with at least 3 vertices")]
    EmptyPolygon { name: String },
    /// A material index points outside the material table.
    #[error("Rigid body '{name}' references material {index}, but only {count} materials exist")]
    MaterialOutOfRange { name: String, index: usize, count: usize },
    /// A particle type's material index points outside the material table.
    #[error("Particle type {ptype} references material {index}, but only {count} materials exist")]
    TypeMaterialOutOfRange { ptype: usize, index: usize, count: usize },
    /// A phase change names a particle type that does not exist.
    #[error("Particle type {ptype} changes phase into type {into}, but only {count} types exist")]
    PhaseTargetOutOfRange { ptype: usize, into: u32, count: usize },
}

/// Errors that can occur when building or running a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// GPU initialization failed.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    /// Scene data could not be assembled.
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    /// Writing the presented frame to disk failed.
    #[error("Failed to write frame image: {0}")]
    Image(#[from] image::ImageError),
}
