//! Frame geometry: native dimension probing, crop detection and
//! aspect-ratio output sizing.

use std::ffi::OsString;
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;
use serde::Serialize;

use crate::error::{EncodeError, Result};
use crate::tools::{run_tool, Toolchain};

/// Four-sided pixel trim applied before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CropSpec {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropSpec {
    pub const NONE: CropSpec = CropSpec {
        left: 0,
        right: 0,
        top: 0,
        bottom: 0,
    };

    /// Parse a `left,right,top,bottom` crop string.
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<u32> = value
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [left, right, top, bottom] => Some(CropSpec {
                left: *left,
                right: *right,
                top: *top,
                bottom: *bottom,
            }),
            _ => None,
        }
    }

    /// Dimensions left after trimming, or `None` if the box consumes a whole axis.
    pub fn apply(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let horizontal = self.left.checked_add(self.right)?;
        let vertical = self.top.checked_add(self.bottom)?;
        if horizontal >= width || vertical >= height {
            return None;
        }
        Some((width - horizontal, height - vertical))
    }

    pub fn to_filter(&self) -> String {
        format!(
            "crop=w=iw-{}-{}:h=ih-{}-{}:x={}:y={}",
            self.left, self.right, self.top, self.bottom, self.left, self.top
        )
    }
}

/// Target frame size with symmetric padding on at most one axis pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputGeometry {
    pub width: u32,
    pub height: u32,
    pub pad_left: u32,
    pub pad_right: u32,
    pub pad_top: u32,
    pub pad_bottom: u32,
    /// The cropped frame is shrunk instead of padded
    pub scale: bool,
}

impl OutputGeometry {
    pub fn is_padded(&self) -> bool {
        self.pad_left + self.pad_right + self.pad_top + self.pad_bottom > 0
    }

    /// Filter expression turning a `cropped_width`x`cropped_height` frame into
    /// this geometry, or `None` when the frame already matches.
    pub fn to_filter(&self, cropped_width: u32, cropped_height: u32) -> Option<String> {
        if self.scale {
            if self.width == cropped_width && self.height == cropped_height {
                return None;
            }
            return Some(format!("scale=w={}:h={}", self.width, self.height));
        }
        if !self.is_padded() {
            return None;
        }
        Some(format!(
            "pad={}:{}:{}:{}",
            self.width, self.height, self.pad_left, self.pad_top
        ))
    }
}

/// Derive output size and padding that hit `desired_aspect_ratio` without upscaling.
///
/// Width is fixed first; if the derived height does not cover the frame, height
/// is fixed instead. Both derivations round half-to-even.
pub fn compute_output_geometry(
    cropped_width: u32,
    cropped_height: u32,
    desired_aspect_ratio: f64,
) -> OutputGeometry {
    let output_width = cropped_width;
    let output_height = (f64::from(output_width) / desired_aspect_ratio).round_ties_even() as u32;
    if output_height >= cropped_height {
        let pad_top = (output_height - cropped_height) / 2;
        return OutputGeometry {
            width: output_width,
            height: output_height,
            pad_left: 0,
            pad_right: 0,
            pad_top,
            pad_bottom: output_height - cropped_height - pad_top,
            scale: false,
        };
    }

    let output_height = cropped_height;
    let output_width = (f64::from(output_height) * desired_aspect_ratio).round_ties_even() as u32;
    if output_width >= cropped_width {
        let pad_left = (output_width - cropped_width) / 2;
        return OutputGeometry {
            width: output_width,
            height: output_height,
            pad_left,
            pad_right: output_width - cropped_width - pad_left,
            pad_top: 0,
            pad_bottom: 0,
            scale: false,
        };
    }

    OutputGeometry {
        width: cropped_width.min(output_width),
        height: cropped_height.min(output_height),
        pad_left: 0,
        pad_right: 0,
        pad_top: 0,
        pad_bottom: 0,
        scale: true,
    }
}

/// Parse probe output of the form `<width>x<height>` (a trailing `x` is tolerated).
pub fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (width, height) = line.trim_end_matches('x').split_once('x')?;
    let width = width.trim().parse::<u32>().ok()?;
    let height = height.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Query the native dimensions of the first video stream.
pub async fn probe_dimensions(tools: &Toolchain, path: &Path) -> Result<(u32, u32)> {
    let args: Vec<OsString> = vec![
        "-v".into(),
        "error".into(),
        "-select_streams".into(),
        "v:0".into(),
        "-show_entries".into(),
        "stream=width,height".into(),
        "-of".into(),
        "csv=p=0:s=x".into(),
        path.as_os_str().to_owned(),
    ];
    let output = run_tool(&tools.ffprobe, &args).await.map_err(|e| {
        EncodeError::probe_failed(path, format!("could not run {}: {}", tools.ffprobe.display(), e))
    })?;

    if !output.success {
        return Err(EncodeError::probe_failed(
            path,
            format!(
                "exit code {}: {}",
                output.exit_code.unwrap_or(-1),
                output.stderr.trim()
            ),
        ));
    }

    parse_dimensions(&output.stdout).ok_or_else(|| {
        EncodeError::probe_failed(path, format!("unparsable output: '{}'", output.stdout.trim()))
    })
}

fn autocrop_regex() -> &'static Regex {
    static AUTOCROP: OnceLock<Regex> = OnceLock::new();
    AUTOCROP.get_or_init(|| {
        Regex::new(r"autocrop:\s*(\d+)/(\d+)/(\d+)/(\d+)").expect("autocrop pattern is valid")
    })
}

fn round_up_to_4(value: u32) -> Option<u32> {
    value.div_ceil(4).checked_mul(4)
}

/// Turn a scan's `autocrop: top/bottom/left/right` suggestion into a
/// symmetric, 4-aligned crop box.
pub fn parse_autocrop(scan_output: &str) -> Option<CropSpec> {
    let caps = autocrop_regex().captures(scan_output)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (top, bottom, left, right) = (field(1)?, field(2)?, field(3)?, field(4)?);

    let vertical = round_up_to_4(top.max(bottom))?;
    let horizontal = round_up_to_4(left.max(right))?;
    Some(CropSpec {
        left: horizontal,
        right: horizontal,
        top: vertical,
        bottom: vertical,
    })
}

/// Estimate letterbox borders with a zero-length scan pass.
///
/// Cropping is best-effort: any invocation or parse failure, or a suggestion
/// that does not fit the `native` frame, yields a no-op crop.
pub async fn auto_detect_crop(tools: &Toolchain, path: &Path, native: (u32, u32)) -> CropSpec {
    let args: Vec<OsString> = vec![
        "-i".into(),
        path.as_os_str().to_owned(),
        "--scan".into(),
        "-t".into(),
        "0".into(),
    ];
    let output = match run_tool(&tools.handbrake, &args).await {
        Ok(o) => o,
        Err(e) => {
            warn!("Crop scan could not run for {}: {}", path.display(), e);
            return CropSpec::NONE;
        }
    };
    if !output.success {
        warn!(
            "Crop scan failed for {} (exit code {}), not cropping",
            path.display(),
            output.exit_code.unwrap_or(-1)
        );
        return CropSpec::NONE;
    }

    // The scan reports on stderr; accept either stream
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    match parse_autocrop(&combined) {
        Some(crop) if crop.apply(native.0, native.1).is_none() => {
            warn!(
                "Auto crop {:?} leaves nothing of the {}x{} frame of {}, not cropping",
                crop,
                native.0,
                native.1,
                path.display()
            );
            CropSpec::NONE
        }
        Some(crop) => {
            debug!("Auto crop for {}: {:?}", path.display(), crop);
            crop
        }
        None => {
            warn!("No autocrop suggestion for {}, not cropping", path.display());
            CropSpec::NONE
        }
    }
}
