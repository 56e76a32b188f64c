//! C1: Capability Probe. Trial-runs the encoder subprocess against each
//! known hardware encoder, in priority order, to build an ordered, lower-bound
//! [`CapabilitySet`] for the host.

use std::time::Duration;

use tokio::process::Command;
use tracing::warn;

use crate::subprocess::run_with_timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const SOFTWARE_FALLBACK: &str = "libx264";

/// Hardware encoders tried in priority order. The GPU family label of the
/// first one that succeeds becomes [`CapabilitySet::gpu_label`].
const HARDWARE_CANDIDATES: &[(&str, &str)] =
    &[("NVIDIA", "h264_nvenc"), ("VAAPI", "h264_vaapi"), ("QSV", "h264_qsv")];

/// An ordered list of usable encoders plus a GPU family label. Non-empty;
/// the software fallback is always present and always last.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySet {
    pub encoders: Vec<String>,
    pub gpu_label: String,
}

impl CapabilitySet {
    pub fn preferred_encoder(&self) -> &str {
        self.encoders
            .first()
            .map(String::as_str)
            .unwrap_or(SOFTWARE_FALLBACK)
    }
}

async fn probe_encoder(ffmpeg_program: &str, encoder: &str) -> bool {
    let mut cmd = Command::new(ffmpeg_program);
    cmd.args([
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-f",
        "lavfi",
        "-i",
        "testsrc=size=160x90:rate=10",
        "-frames:v",
        "1",
        "-pix_fmt",
        "yuv420p",
        "-c:v",
        encoder,
        "-f",
        "null",
        "-",
    ]);
    match run_with_timeout(cmd, PROBE_TIMEOUT).await {
        Ok(ok) => ok,
        Err(err) => {
            warn!(encoder, error = %err, "failed to spawn ffmpeg for encoder probe");
            false
        }
    }
}

/// Runs once at startup. Never fatal: any probe failure (timeout, non-zero
/// exit, missing binary) counts as "not available" and is logged at warn.
pub async fn detect(ffmpeg_program: &str) -> CapabilitySet {
    let mut encoders = Vec::new();
    let mut gpu_label = "None".to_string();

    for (label, encoder) in HARDWARE_CANDIDATES {
        if probe_encoder(ffmpeg_program, encoder).await {
            if encoders.is_empty() {
                gpu_label = (*label).to_string();
            }
            encoders.push((*encoder).to_string());
        } else {
            warn!(encoder, "hardware encoder not usable on this host");
        }
    }

    encoders.push(SOFTWARE_FALLBACK.to_string());

    CapabilitySet {
        encoders,
        gpu_label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_fallback_is_always_last_and_set_is_nonempty() {
        // detect() always appends the fallback regardless of probe outcomes;
        // exercise the invariant directly rather than depending on a real
        // ffmpeg binary being present on the test host.
        let set = CapabilitySet {
            encoders: vec!["h264_nvenc".to_string(), SOFTWARE_FALLBACK.to_string()],
            gpu_label: "NVIDIA".to_string(),
        };
        assert!(!set.encoders.is_empty());
        assert_eq!(set.encoders.last().unwrap(), SOFTWARE_FALLBACK);
        assert_eq!(set.preferred_encoder(), "h264_nvenc");
    }

    #[tokio::test]
    async fn detect_against_missing_binary_yields_only_software_fallback() {
        let set = detect("definitely-not-a-real-ffmpeg-binary").await;
        assert_eq!(set.encoders, vec![SOFTWARE_FALLBACK.to_string()]);
        assert_eq!(set.gpu_label, "None");
    }
}
