//! One file end to end: probe, crop/scale planning, encode, remux,
//! replace and rename.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use log::{debug, info};
use regex::{NoExpand, Regex, RegexBuilder};
use serde::Serialize;

use crate::error::{EncodeError, Result};
use crate::geometry::{
    auto_detect_crop, compute_output_geometry, probe_dimensions, CropSpec, OutputGeometry,
};
use crate::params::{compute_thread_budget, EncoderId};
use crate::profile::{CropPolicy, EncodeProfile};
use crate::tools::{run_tool, Toolchain};

/// Container extension every output is forced to
pub const OUTPUT_EXTENSION: &str = "mkv";

/// Source/codec markers in filenames replaced by the new codec label
const CODEC_MARKERS: &[&str] = &[
    "HEVC", "AVC", "H.265", "H.264", "h264", "h265", "x264", "x265", "VC-1",
];

/// Release-group remux markers stripped from filenames
const REMUX_MARKERS: &[&str] = &[".REMUX", " REMUX", "REMUX"];

/// Byte sizes before and after a file was transcoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeRecord {
    pub initial_bytes: u64,
    pub resulting_bytes: u64,
}

/// Result of one successful pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub input: PathBuf,
    /// Final file name inside the input's directory
    pub final_name: String,
    pub sizes: SizeRecord,
}

/// Scratch files written beside the original
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchPaths {
    /// Encoded video-only stream
    pub video: PathBuf,
    /// Encoded video remuxed with the original's other streams
    pub remuxed: PathBuf,
}

impl ScratchPaths {
    pub fn for_input(input: &Path) -> Self {
        let dir = input.parent().unwrap_or_else(|| Path::new(""));
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            video: dir.join(format!("temp_video_{}.{}", stem, OUTPUT_EXTENSION)),
            remuxed: dir.join(format!("temp_{}.{}", stem, OUTPUT_EXTENSION)),
        }
    }
}

fn marker_patterns(
    markers: &'static [&'static str],
    cell: &'static OnceLock<Vec<Regex>>,
) -> &'static [Regex] {
    cell.get_or_init(|| {
        markers
            .iter()
            .map(|m| {
                RegexBuilder::new(&regex::escape(m))
                    .case_insensitive(true)
                    .build()
                    .expect("escaped literal is a valid pattern")
            })
            .collect()
    })
}

fn clean_pass(stem: &str, label: &str) -> String {
    static CODEC: OnceLock<Vec<Regex>> = OnceLock::new();
    static REMUX: OnceLock<Vec<Regex>> = OnceLock::new();

    let mut name = stem.to_string();
    for pattern in marker_patterns(CODEC_MARKERS, &CODEC) {
        name = pattern.replace_all(&name, NoExpand(label)).into_owned();
    }
    for pattern in marker_patterns(REMUX_MARKERS, &REMUX) {
        name = pattern.replace_all(&name, "").into_owned();
    }
    name
}

/// Replace codec markers with `label` and strip remux markers until stable.
///
/// Removing a marker can splice a new one together, so passes repeat until
/// the name stops changing.
pub fn clean_stem(stem: &str, label: &str) -> String {
    let mut current = stem.to_string();
    loop {
        let next = clean_pass(&current, label);
        if next == current {
            break;
        }
        current = next;
    }
    if current.trim().is_empty() {
        return label.to_string();
    }
    current
}

/// Final file name for `input` once encoded with `encoder`.
pub fn output_file_name(input: &Path, encoder: EncoderId) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}.{}", clean_stem(&stem, encoder.filename_label()), OUTPUT_EXTENSION)
}

/// Crop and scale decisions for one file
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPlan {
    pub crop: Option<CropSpec>,
    pub cropped_width: u32,
    pub cropped_height: u32,
    pub geometry: Option<OutputGeometry>,
    /// Filters in application order; absent steps are omitted
    pub filters: Vec<String>,
}

impl FilterPlan {
    pub fn chain(&self) -> Option<String> {
        if self.filters.is_empty() {
            None
        } else {
            Some(self.filters.join(","))
        }
    }
}

/// Order: crop, aspect-ratio pad/shrink, resolution limit.
pub fn plan_filters(
    profile: &EncodeProfile,
    native: (u32, u32),
    crop: Option<CropSpec>,
) -> Result<FilterPlan> {
    let (width, height) = native;
    let crop = crop.filter(|c| *c != CropSpec::NONE);

    let (cropped_width, cropped_height) = match crop {
        Some(c) => c.apply(width, height).ok_or_else(|| {
            EncodeError::InvalidProfile(format!(
                "crop {}/{}/{}/{} (l/r/t/b) leaves nothing of a {}x{} frame",
                c.left, c.right, c.top, c.bottom, width, height
            ))
        })?,
        None => (width, height),
    };

    let mut filters = Vec::new();
    if let Some(c) = crop {
        filters.push(c.to_filter());
    }

    let geometry = profile
        .aspect_ratio
        .map(|ratio| compute_output_geometry(cropped_width, cropped_height, ratio));
    if let Some(filter) = geometry.and_then(|g| g.to_filter(cropped_width, cropped_height)) {
        filters.push(filter);
    }

    // Width is pinned; -2 keeps the derived height even
    if let Some(limit) = profile.limit_width {
        filters.push(format!("scale=w={}:h=-2", limit));
    }

    Ok(FilterPlan {
        crop,
        cropped_width,
        cropped_height,
        geometry,
        filters,
    })
}

/// Transcoder arguments: video stream only, user flags last so they override.
pub fn build_encode_args(
    profile: &EncodeProfile,
    input: &Path,
    filter_chain: Option<&str>,
    threads: u32,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.as_os_str().to_owned()];

    if let Some(chain) = filter_chain {
        args.push("-vf".into());
        args.push(chain.into());
    }

    args.push("-map".into());
    args.push("v:0".into());
    args.push("-c:v".into());
    args.push(profile.encoder.ffmpeg_name().into());
    args.push("-crf".into());
    args.push(profile.quality.to_string().into());
    args.push("-threads".into());
    args.push(threads.to_string().into());
    args.push(profile.encoder.speed_flag().into());
    args.push(profile.speed.clone().into());

    for option in &profile.options {
        args.push(option.flag.into());
        args.push(option.value.clone().into());
    }

    if let Some(tune) = &profile.tune {
        args.push("-tune".into());
        args.push(tune.into());
    }

    args.extend(profile.custom_flags.iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// Remuxer arguments: the encoded video plus every non-video stream of the original.
pub fn build_remux_args(output: &Path, encoded_video: &Path, original: &Path) -> Vec<OsString> {
    vec![
        "-o".into(),
        output.as_os_str().to_owned(),
        encoded_video.as_os_str().to_owned(),
        "--no-video".into(),
        original.as_os_str().to_owned(),
    ]
}

async fn file_size(path: &Path) -> Result<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| EncodeError::io(path, e))
}

async fn remove_file(path: &Path) -> Result<()> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| EncodeError::io(path, e))
}

/// Shared, read-only context for running pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    tools: Arc<Toolchain>,
    profile: Arc<EncodeProfile>,
}

impl Pipeline {
    pub fn new(tools: Toolchain, profile: EncodeProfile) -> Self {
        Self {
            tools: Arc::new(tools),
            profile: Arc::new(profile),
        }
    }

    pub fn profile(&self) -> &EncodeProfile {
        &self.profile
    }

    /// Transcode `input` in place using `cpu_percent` of `logical_cores`.
    ///
    /// The original is deleted only after the remux succeeded; on any earlier
    /// failure it stays untouched and scratch files are left for inspection.
    pub async fn encode_file(
        &self,
        input: &Path,
        logical_cores: usize,
        cpu_percent: f64,
    ) -> Result<FileOutcome> {
        let profile = &*self.profile;
        let initial_bytes = file_size(input).await?;

        let final_name = output_file_name(input, profile.encoder);
        let target = input
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(&final_name);
        if target != input && target.exists() {
            return Err(EncodeError::OutputCollision {
                target,
                sources: vec![input.to_path_buf()],
            });
        }

        let native = probe_dimensions(&self.tools, input).await?;
        debug!("{}: native {}x{}", input.display(), native.0, native.1);

        let crop = match profile.crop {
            CropPolicy::None => None,
            CropPolicy::Explicit(spec) => Some(spec),
            CropPolicy::Auto => Some(auto_detect_crop(&self.tools, input, native).await),
        };
        let plan = plan_filters(profile, native, crop)?;

        let threads = compute_thread_budget(logical_cores.max(1), cpu_percent, profile.encoder);
        debug!(
            "File '{}' will use {} threads with {}. CPU usage alloc {:.1}%",
            input.display(),
            threads,
            profile.encoder,
            cpu_percent
        );

        let scratch = ScratchPaths::for_input(input);
        let encode_args = build_encode_args(
            profile,
            input,
            plan.chain().as_deref(),
            threads,
            &scratch.video,
        );
        let encoded = run_tool(&self.tools.ffmpeg, &encode_args).await?;
        if !encoded.success {
            return Err(EncodeError::EncodeFailed {
                path: input.to_path_buf(),
                failure: encoded.into_failure("ffmpeg"),
            });
        }

        let remux_args = build_remux_args(&scratch.remuxed, &scratch.video, input);
        let remuxed = run_tool(&self.tools.mkvmerge, &remux_args).await?;
        if !remuxed.success {
            return Err(EncodeError::RemuxFailed {
                path: input.to_path_buf(),
                failure: remuxed.into_failure("mkvmerge"),
            });
        }

        remove_file(&scratch.video).await?;
        remove_file(input).await?;

        tokio::fs::rename(&scratch.remuxed, &target)
            .await
            .map_err(|e| EncodeError::io(&scratch.remuxed, e))?;
        let resulting_bytes = file_size(&target).await?;

        info!(
            "{} -> {} ({} -> {} bytes)",
            input.display(),
            final_name,
            initial_bytes,
            resulting_bytes
        );

        Ok(FileOutcome {
            input: input.to_path_buf(),
            final_name,
            sizes: SizeRecord {
                initial_bytes,
                resulting_bytes,
            },
        })
    }
}
