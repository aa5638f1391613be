use std::fmt;

use serde::Serialize;
use sysinfo::{CpuRefreshKind, RefreshKind, System};

use crate::error::{EncodeError, Result};

/// Software encoders the transcoder is driven with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EncoderId {
    Libx264,
    Libx265,
    LibvpxVp9,
    LibSvtAv1,
}

impl EncoderId {
    /// Get the FFmpeg encoder name for this encoder
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            EncoderId::Libx264 => "libx264",
            EncoderId::Libx265 => "libx265",
            EncoderId::LibvpxVp9 => "libvpx-vp9",
            EncoderId::LibSvtAv1 => "libsvtav1",
        }
    }

    /// Label substituted into output filenames
    pub fn filename_label(&self) -> &'static str {
        match self {
            EncoderId::Libx264 => "x264",
            EncoderId::Libx265 => "x265",
            EncoderId::LibvpxVp9 => "VP9",
            EncoderId::LibSvtAv1 => "AV1",
        }
    }

    /// Human-readable codec name for progress output
    pub fn display_name(&self) -> &'static str {
        match self {
            EncoderId::Libx264 => "H.264",
            EncoderId::Libx265 => "H.265",
            EncoderId::LibvpxVp9 => "VP9",
            EncoderId::LibSvtAv1 => "AV1",
        }
    }

    /// x264/x265 take a named preset; the others a numeric effort value
    pub fn speed_flag(&self) -> &'static str {
        match self {
            EncoderId::Libx264 | EncoderId::Libx265 => "-preset",
            EncoderId::LibvpxVp9 | EncoderId::LibSvtAv1 => "-cpu-used",
        }
    }

    fn thread_divisor(&self) -> f64 {
        match self {
            EncoderId::Libx265 => 4.5,
            _ => 0.8,
        }
    }

    fn thread_cap(&self) -> Option<u32> {
        match self {
            EncoderId::Libx264 => Some(16),
            _ => None,
        }
    }
}

impl fmt::Display for EncoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

/// Map a user-facing codec name to its encoder.
pub fn resolve_codec(name: &str) -> Result<EncoderId> {
    match name.trim().to_lowercase().as_str() {
        "h264" => Ok(EncoderId::Libx264),
        "h265" | "hevc" => Ok(EncoderId::Libx265),
        "vp9" => Ok(EncoderId::LibvpxVp9),
        "av1" => Ok(EncoderId::LibSvtAv1),
        _ => Err(EncodeError::UnknownCodec(name.to_string())),
    }
}

/// One encoder flag and its value, in command-line order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOption {
    pub flag: &'static str,
    pub value: String,
}

impl EncoderOption {
    fn new(flag: &'static str, value: impl Into<String>) -> Self {
        Self {
            flag,
            value: value.into(),
        }
    }
}

const X265_BASE_PARAMS: &str = "rc-lookahead=32:aq-mode=3:bframes=4:no-sao=1";
const X265_PSY_SUFFIX: &str = "psy-rd=3:psy-rdoq=3";

/// Fixed tuning bundle for an encoder, psychovisual tuning included.
pub fn build_option_set(encoder: EncoderId) -> Vec<EncoderOption> {
    match encoder {
        EncoderId::Libx264 => vec![
            EncoderOption::new("-bf", "4"),
            EncoderOption::new("-rc-lookahead", "32"),
            EncoderOption::new("-aq-mode", "3"),
            EncoderOption::new("-b-pyramid", "normal"),
            EncoderOption::new("-coder", "1"),
            EncoderOption::new("-psy-rd", "3.0:0.0"),
        ],
        EncoderId::Libx265 => vec![EncoderOption::new(
            "-x265-params",
            format!("{}:{}", X265_BASE_PARAMS, X265_PSY_SUFFIX),
        )],
        EncoderId::LibvpxVp9 | EncoderId::LibSvtAv1 => Vec::new(),
    }
}

/// Threads for one pipeline given its share of the CPU budget.
///
/// `threads = max(1, floor(cores * percent / 100 / divisor))`, capped for x264.
pub fn compute_thread_budget(logical_cores: usize, cpu_percent: f64, encoder: EncoderId) -> u32 {
    let raw = (logical_cores as f64 * (cpu_percent / 100.0) / encoder.thread_divisor()).floor();
    let threads = if raw.is_finite() && raw >= 1.0 {
        raw.min(f64::from(u32::MAX)) as u32
    } else {
        1
    };
    match encoder.thread_cap() {
        Some(cap) => threads.min(cap),
        None => threads,
    }
}

/// Number of logical cores reported by the host, at least 1.
pub fn logical_cores() -> usize {
    let sys = System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
    sys.cpus().len().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_encoder() -> impl Strategy<Value = EncoderId> {
        prop_oneof![
            Just(EncoderId::Libx264),
            Just(EncoderId::Libx265),
            Just(EncoderId::LibvpxVp9),
            Just(EncoderId::LibSvtAv1),
        ]
    }

    #[test]
    fn test_resolve_codec_names() {
        assert_eq!(resolve_codec("h264").unwrap(), EncoderId::Libx264);
        assert_eq!(resolve_codec("h265").unwrap(), EncoderId::Libx265);
        assert_eq!(resolve_codec("HEVC").unwrap(), EncoderId::Libx265);
        assert_eq!(resolve_codec("vp9").unwrap(), EncoderId::LibvpxVp9);
        assert_eq!(resolve_codec("av1").unwrap(), EncoderId::LibSvtAv1);
        assert!(matches!(
            resolve_codec("mpeg2"),
            Err(EncodeError::UnknownCodec(name)) if name == "mpeg2"
        ));
    }

    #[test]
    fn test_x264_options_are_discrete_flags() {
        let options = build_option_set(EncoderId::Libx264);
        let flags: Vec<&str> = options.iter().map(|o| o.flag).collect();
        assert_eq!(
            flags,
            vec!["-bf", "-rc-lookahead", "-aq-mode", "-b-pyramid", "-coder", "-psy-rd"]
        );
        assert_eq!(options.last().unwrap().value, "3.0:0.0");
    }

    #[test]
    fn test_x265_params_joined_with_psy_suffix() {
        let options = build_option_set(EncoderId::Libx265);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].flag, "-x265-params");
        assert_eq!(
            options[0].value,
            "rc-lookahead=32:aq-mode=3:bframes=4:no-sao=1:psy-rd=3:psy-rdoq=3"
        );
    }

    #[test]
    fn test_option_set_is_pure() {
        // Repeated construction never accumulates suffixes
        assert_eq!(build_option_set(EncoderId::Libx265), build_option_set(EncoderId::Libx265));
        assert!(build_option_set(EncoderId::LibvpxVp9).is_empty());
        assert!(build_option_set(EncoderId::LibSvtAv1).is_empty());
    }

    #[test]
    fn test_thread_budget_examples() {
        // 16 cores at 80% for x265: 12.8 / 4.5 = 2.84
        assert_eq!(compute_thread_budget(16, 80.0, EncoderId::Libx265), 2);
        // 16 cores at 50% for vp9: 8 / 0.8 = 10
        assert_eq!(compute_thread_budget(16, 50.0, EncoderId::LibvpxVp9), 10);
        // 64 cores at 100% for x264: 80, capped
        assert_eq!(compute_thread_budget(64, 100.0, EncoderId::Libx264), 16);
        // 64 cores at 100% for av1 is not capped
        assert_eq!(compute_thread_budget(64, 100.0, EncoderId::LibSvtAv1), 80);
        assert_eq!(compute_thread_budget(2, 1.0, EncoderId::Libx265), 1);
    }

    #[test]
    fn test_speed_flag_by_family() {
        assert_eq!(EncoderId::Libx264.speed_flag(), "-preset");
        assert_eq!(EncoderId::Libx265.speed_flag(), "-preset");
        assert_eq!(EncoderId::LibvpxVp9.speed_flag(), "-cpu-used");
        assert_eq!(EncoderId::LibSvtAv1.speed_flag(), "-cpu-used");
    }

    #[test]
    fn test_logical_cores_at_least_one() {
        assert!(logical_cores() >= 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_thread_budget_monotonic_in_cpu_percent(
            cores in 1usize..256,
            low in 0.0f64..100.0,
            delta in 0.0f64..100.0,
            encoder in any_encoder(),
        ) {
            let high = (low + delta).min(100.0);
            let a = compute_thread_budget(cores, low, encoder);
            let b = compute_thread_budget(cores, high, encoder);
            prop_assert!(a >= 1);
            prop_assert!(b >= a, "budget decreased from {} to {} ({}% -> {}%)", a, b, low, high);
        }

        #[test]
        fn test_x264_never_exceeds_cap(cores in 1usize..1024, percent in 0.0f64..=100.0) {
            prop_assert!(compute_thread_budget(cores, percent, EncoderId::Libx264) <= 16);
        }
    }
}
