use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::batch::BatchSettings;
use crate::params::logical_cores;
use crate::profile::{CropPolicy, EncodeProfile};
use crate::tools::Toolchain;

/// Configuration for the media encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Output codec name: h264, h265/hevc, vp9 or av1
    pub output_codec: String,
    /// Constant-quality value (CRF)
    pub quality_crf: u8,
    /// Preset name for x264/x265, numeric effort for vp9/av1
    pub encoding_speed: String,
    /// Encoder tuning hint (e.g. film, animation)
    pub tune: Option<String>,
    /// Extra transcoder flags, space separated, appended last
    pub custom_params: String,
    /// "auto" or "left,right,top,bottom"; unset disables cropping
    pub crop_values: Option<String>,
    /// Maximum output width; height is derived from the source
    pub limit_resolution: Option<u32>,
    /// Desired output aspect ratio ("16:9", "2.39"); pads or shrinks to reach it
    pub aspect_ratio: Option<String>,
    /// Global CPU usage budget in percent, split across workers
    pub max_cpu_usage: f64,
    /// Upper bound on concurrent files (defaults to the logical core count)
    pub max_workers: Option<usize>,
    /// External tool executables
    pub tools: Toolchain,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl EncoderConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            output_codec: "h265".to_string(),
            quality_crf: 22,
            encoding_speed: "slow".to_string(),
            tune: None,
            custom_params: String::new(),
            crop_values: None,
            limit_resolution: None,
            aspect_ratio: None,
            max_cpu_usage: 80.0,
            max_workers: None,
            tools: Toolchain::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Resolve the immutable profile shared by every pipeline in a batch
    pub fn to_profile(&self) -> crate::Result<EncodeProfile> {
        EncodeProfile::new(&self.output_codec, self.quality_crf, self.encoding_speed.clone())?
            .with_tune(self.tune.clone())
            .with_crop(CropPolicy::parse(self.crop_values.as_deref())?)
            .with_limit_width(self.limit_resolution)?
            .with_aspect_ratio(self.aspect_ratio.as_deref())?
            .with_custom_params(&self.custom_params)
    }

    /// CPU budget and concurrency limits for a batch on this host
    pub fn batch_settings(&self) -> crate::Result<BatchSettings> {
        let cores = logical_cores();
        BatchSettings::new(self.max_cpu_usage, self.max_workers.unwrap_or(cores), cores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = EncoderConfig::load_config(Some(Path::new("/nonexistent/encoder.toml"))).unwrap();
        assert_eq!(config.output_codec, "h265");
        assert_eq!(config.quality_crf, 22);
        assert_eq!(config.tools.ffmpeg, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_toml_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoder.toml");
        std::fs::write(
            &path,
            r#"
output_codec = "av1"
quality_crf = 30
encoding_speed = "6"
crop_values = "auto"
max_cpu_usage = 50.0

[tools]
ffmpeg = "/opt/ffmpeg/bin/ffmpeg"
"#,
        )
        .unwrap();

        let config = EncoderConfig::load_config(Some(&path)).unwrap();
        assert_eq!(config.output_codec, "av1");
        assert_eq!(config.tools.ffmpeg, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.tools.mkvmerge, PathBuf::from("mkvmerge"));

        let profile = config.to_profile().unwrap();
        assert_eq!(profile.crop, CropPolicy::Auto);
        assert_eq!(profile.speed, "6");
    }

    #[test]
    fn test_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoder.json");
        std::fs::write(
            &path,
            r#"{"output_codec": "h264", "custom_params": "-g 48", "limit_resolution": 1280}"#,
        )
        .unwrap();

        let profile = EncoderConfig::load_config(Some(&path)).unwrap().to_profile().unwrap();
        assert_eq!(profile.custom_flags, vec!["-g", "48"]);
        assert_eq!(profile.limit_width, Some(1280));
    }

    #[test]
    fn test_invalid_codec_rejected_by_profile() {
        let config = EncoderConfig {
            output_codec: "theora".to_string(),
            ..EncoderConfig::default()
        };
        assert!(matches!(
            config.to_profile(),
            Err(crate::EncodeError::UnknownCodec(_))
        ));
    }

    #[test]
    fn test_cpu_budget_out_of_range_rejected() {
        let config = EncoderConfig {
            max_cpu_usage: 150.0,
            ..EncoderConfig::default()
        };
        assert!(config.batch_settings().is_err());
    }
}
