use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::args::Args;
use crate::error::PipelineError;
use crate::inference::LandmarkerSettings;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub models: ModelPaths,
    pub inference: InferenceConfig,
    pub display: DisplayConfig,
    pub mesh: MeshConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub face_detection_path: String,
    pub face_mesh_path: String,
    pub segmentation_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub max_num_faces: usize,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub intra_threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub window_title: String,
    pub mirror: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// JSON list of `[a, b]` landmark index pairs. Derived from the first
    /// detected face when unset.
    pub tessellation_path: Option<String>,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            face_detection_path: "models/face_detection.onnx".to_string(),
            face_mesh_path: "models/face_mesh.onnx".to_string(),
            segmentation_path: "models/selfie_segmentation.onnx".to_string(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let settings = LandmarkerSettings::default();
        Self {
            max_num_faces: settings.max_num_faces,
            min_detection_confidence: settings.min_detection_confidence,
            min_tracking_confidence: settings.min_tracking_confidence,
            intra_threads: settings.intra_threads,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_title: "Live Face Mesh".to_string(),
            mirror: true,
        }
    }
}

impl InferenceConfig {
    pub fn landmarker_settings(&self) -> LandmarkerSettings {
        LandmarkerSettings {
            max_num_faces: self.max_num_faces.max(1),
            min_detection_confidence: self.min_detection_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
            intra_threads: self.intra_threads.max(1),
        }
    }
}

impl AppConfig {
    /// Loads `path`, falling back to defaults when it is missing or invalid,
    /// then writes the result back so new fields show up in the file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let content = fs::read_to_string(path)?;
            // Missing fields fall back to Default thanks to #[serde(default)]
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!("Loaded configuration from {}", path.display());
                    c
                }
                Err(e) => {
                    warn!("Error parsing config: {}. Loading defaults.", e);
                    Self::default()
                }
            }
        } else {
            info!("Configuration file not found. Creating default at {}", path.display());
            Self::default()
        };

        config.save_to(path)?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Largest accepted `fx`/`fy`.
pub const MAX_SCALE: f64 = 16.0;

/// Settings fixed for one run of the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    fx: f64,
    fy: f64,
    meshing_enabled: bool,
    segmentation_enabled: bool,
}

impl PipelineConfig {
    pub fn new(
        fx: f64,
        fy: f64,
        meshing_enabled: bool,
        segmentation_enabled: bool,
    ) -> Result<Self, PipelineError> {
        for (name, value) in [("fx", fx), ("fy", fy)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
            if value > MAX_SCALE {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be at most {MAX_SCALE}, got {value}"
                )));
            }
        }
        Ok(Self {
            fx,
            fy,
            meshing_enabled,
            segmentation_enabled,
        })
    }

    pub fn from_args(args: &Args) -> Result<Self, PipelineError> {
        Self::new(args.fx, args.fy, args.meshing != 0, args.segmentation != 0)
    }

    pub fn fx(&self) -> f64 {
        self.fx
    }

    pub fn fy(&self) -> f64 {
        self.fy
    }

    pub fn meshing_enabled(&self) -> bool {
        self.meshing_enabled
    }

    pub fn segmentation_enabled(&self) -> bool {
        self.segmentation_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "inference": { "max_num_faces": 3 } }"#).unwrap();
        assert_eq!(config.inference.max_num_faces, 3);
        assert_eq!(config.inference.min_detection_confidence, 0.5);
        assert_eq!(config.inference.min_tracking_confidence, 0.5);
        assert_eq!(config.models, ModelPaths::default());
        assert!(config.display.mirror);
        assert!(config.mesh.tessellation_path.is_none());
    }

    #[test]
    fn load_from_missing_file_writes_defaults() {
        let path = std::env::temp_dir().join(format!("live-face-mesh-{}.json", std::process::id()));
        let _ = fs::remove_file(&path);

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn landmarker_settings_never_drop_below_one_face() {
        let inference = InferenceConfig {
            max_num_faces: 0,
            ..InferenceConfig::default()
        };
        assert_eq!(inference.landmarker_settings().max_num_faces, 1);
    }

    #[test]
    fn pipeline_config_rejects_out_of_range_scale() {
        assert!(matches!(
            PipelineConfig::new(0.0, 1.0, true, true),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::new(1.0, f64::NAN, true, true),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::new(1e9, 1.0, true, true),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(PipelineConfig::new(MAX_SCALE, MAX_SCALE, true, false).is_ok());
    }

    #[test]
    fn pipeline_config_treats_flags_as_ints() {
        let args = Args::parse_from(["live-face-mesh", "--meshing", "0", "--segmentation", "2"]);
        let config = PipelineConfig::from_args(&args).unwrap();
        assert!(!config.meshing_enabled());
        assert!(config.segmentation_enabled());
        assert_eq!(config.fx(), 1.2);
    }
}
