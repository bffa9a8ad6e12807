//! Configuration system

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Renderer configuration
///
/// Loaded once at startup; every value here is fixed for the lifetime of
/// the renderer except the clear color.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RendererConfig {
    /// Application name reported to the Vulkan driver
    pub application_name: String,
    /// Enable validation layers (debug builds only)
    pub enable_validation: bool,
    /// Number of frames in flight (double buffering depth)
    pub frames_in_flight: usize,
    /// Directory containing compiled SPIR-V shader binaries
    pub shader_directory: String,
    /// Fixed capacity of the global texture array
    pub max_textures: u32,
    /// Capacity of the global vertex buffer, in vertices
    pub max_vertices: u32,
    /// Capacity of the global index buffer, in indices
    pub max_indices: u32,
    /// Maximum visible mesh instances per logical scene per frame
    pub max_instances: u32,
    /// Maximum lights per frame
    pub max_lights: u32,
    /// Clear color for raster passes
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "RayEngine".to_string(),
            enable_validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            shader_directory: "shaders".to_string(),
            max_textures: 128,
            max_vertices: 1 << 20,
            max_indices: 1 << 21,
            max_instances: 1024,
            max_lights: 16,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.max_textures > 0);
        assert_eq!(config.shader_directory, "shaders");
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RendererConfig {
            application_name: "TestApp".to_string(),
            max_textures: 64,
            ..Default::default()
        };

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: RendererConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.application_name, "TestApp");
        assert_eq!(parsed.max_textures, 64);
        assert_eq!(parsed.frames_in_flight, config.frames_in_flight);
    }

    #[test]
    fn test_unsupported_format() {
        let result = RendererConfig::load_from_file("renderer.yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
