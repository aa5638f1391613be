use crate::error::{EncodeError, Result};
use crate::geometry::CropSpec;
use crate::params::{build_option_set, resolve_codec, EncoderId, EncoderOption};

/// How the crop box is chosen for each file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropPolicy {
    None,
    /// Run the crop-scan tool per file
    Auto,
    Explicit(CropSpec),
}

impl CropPolicy {
    /// Parse `auto`, `left,right,top,bottom`, or nothing.
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(CropPolicy::None),
            Some(v) if v.eq_ignore_ascii_case("auto") => Ok(CropPolicy::Auto),
            Some(v) => CropSpec::parse(v).map(CropPolicy::Explicit).ok_or_else(|| {
                EncodeError::InvalidProfile(format!(
                    "crop_values '{}' is neither 'auto' nor 'left,right,top,bottom'",
                    v
                ))
            }),
        }
    }
}

/// Immutable per-batch encode settings shared by every pipeline.
#[derive(Debug, Clone)]
pub struct EncodeProfile {
    pub encoder: EncoderId,
    /// Constant-quality value passed as `-crf`
    pub quality: u8,
    /// Preset name (x264/x265) or numeric effort (vp9/av1)
    pub speed: String,
    pub tune: Option<String>,
    /// User flags, already tokenized, appended last
    pub custom_flags: Vec<String>,
    pub crop: CropPolicy,
    /// Fixed output width; height follows the source aspect
    pub limit_width: Option<u32>,
    pub aspect_ratio: Option<f64>,
    pub options: Vec<EncoderOption>,
}

impl EncodeProfile {
    /// Start a profile for `codec` with the encoder's fixed option bundle.
    pub fn new(codec: &str, quality: u8, speed: impl Into<String>) -> Result<Self> {
        let encoder = resolve_codec(codec)?;
        let speed = speed.into();
        if speed.trim().is_empty() {
            return Err(EncodeError::InvalidProfile("encoding_speed is empty".to_string()));
        }
        let numeric_effort = matches!(encoder, EncoderId::LibvpxVp9 | EncoderId::LibSvtAv1);
        if numeric_effort && speed.trim().parse::<i32>().is_err() {
            return Err(EncodeError::InvalidProfile(format!(
                "encoding_speed '{}' must be numeric for {}",
                speed,
                encoder.display_name()
            )));
        }
        Ok(Self {
            encoder,
            quality,
            speed,
            tune: None,
            custom_flags: Vec::new(),
            crop: CropPolicy::None,
            limit_width: None,
            aspect_ratio: None,
            options: build_option_set(encoder),
        })
    }

    pub fn with_tune(mut self, tune: Option<String>) -> Self {
        self.tune = tune.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_custom_params(mut self, params: &str) -> Result<Self> {
        self.custom_flags = tokenize_custom_params(params)?;
        Ok(self)
    }

    pub fn with_crop(mut self, crop: CropPolicy) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_limit_width(mut self, width: Option<u32>) -> Result<Self> {
        if let Some(w) = width {
            if w == 0 || w % 2 != 0 {
                return Err(EncodeError::InvalidProfile(format!(
                    "limit_resolution must be a positive even width, got {}",
                    w
                )));
            }
        }
        self.limit_width = width;
        Ok(self)
    }

    pub fn with_aspect_ratio(mut self, ratio: Option<&str>) -> Result<Self> {
        self.aspect_ratio = ratio.map(parse_aspect_ratio).transpose()?;
        Ok(self)
    }
}

/// Split free-form flags on whitespace, once, at profile construction.
pub fn tokenize_custom_params(params: &str) -> Result<Vec<String>> {
    let tokens: Vec<String> = params.split_whitespace().map(str::to_string).collect();
    if tokens.iter().any(|t| t == "-i") {
        return Err(EncodeError::InvalidProfile(
            "custom_params may not add inputs (-i)".to_string(),
        ));
    }
    Ok(tokens)
}

/// Accepts `16:9`, `16/9` or a decimal such as `2.39`.
pub fn parse_aspect_ratio(value: &str) -> Result<f64> {
    let invalid = || EncodeError::InvalidProfile(format!("invalid aspect_ratio '{}'", value));
    let value = value.trim();
    let ratio = match value.split_once(|c: char| c == ':' || c == '/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| invalid())?;
            let den: f64 = den.trim().parse().map_err(|_| invalid())?;
            num / den
        }
        None => value.parse::<f64>().map_err(|_| invalid())?,
    };
    if ratio.is_finite() && ratio > 0.0 {
        Ok(ratio)
    } else {
        Err(invalid())
    }
}
