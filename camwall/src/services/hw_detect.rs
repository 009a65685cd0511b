//! Hardware H.264 encoder detection

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Encoders in order of preference
pub const HW_ENCODERS: &[&str] = &["h264_v4l2m2m", "h264_vaapi", "h264_nvenc", "h264_qsv"];

const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pick the preferred hardware encoder from `ffmpeg -encoders` output
pub fn parse_encoder_list(output: &str) -> Option<String> {
    let listed: Vec<&str> = output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .collect();

    HW_ENCODERS
        .iter()
        .find(|encoder| listed.contains(*encoder))
        .map(|encoder| encoder.to_string())
}

/// Ask ffmpeg which encoders it was built with. Runs once at startup.
pub async fn detect_hw_encoder(ffmpeg_bin: &str) -> Option<String> {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(DETECT_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            warn!(status = %output.status, "⚠️ Encoder listing failed, using software encoding");
            return None;
        }
        Ok(Err(e)) => {
            warn!(error = %e, "⚠️ Cannot run {}, using software encoding", ffmpeg_bin);
            return None;
        }
        Err(_) => {
            warn!("⚠️ Encoder listing timed out, using software encoding");
            return None;
        }
    };

    let encoder = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
    match &encoder {
        Some(name) => info!(encoder = %name, "🎛️ Hardware encoder available"),
        None => debug!("No hardware H.264 encoder found"),
    }
    encoder
}
