//! Stream inspection and the copy/transcode decision

use async_trait::async_trait;
use serde::Deserialize;
use shared::logging::redact_url;
use shared::{camera_debug, camera_warn, PipelineMode};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{DisplayError, DisplayResult};
use crate::traits::CodecInspector;
use crate::types::{CodecFamily, ProbeOutcome, ProbeReport, Transport};

/// Inspector backed by `ffprobe`
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    ffprobe_bin: String,
    use_udp_transport: bool,
}

impl FfprobeInspector {
    pub fn new(ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
            use_udp_transport: false,
        }
    }

    /// Configure RTSP transport (fluent API)
    pub fn with_udp_transport(mut self, use_udp_transport: bool) -> Self {
        self.use_udp_transport = use_udp_transport;
        self
    }

    fn command(&self, url: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new(&self.ffprobe_bin);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name,width,height",
            "-of",
            "json",
        ]);
        if let Some(flag) = Transport::for_url(url, self.use_udp_transport).rtsp_flag() {
            cmd.arg("-rtsp_transport").arg(flag);
        }
        cmd.arg("-timeout").arg(timeout.as_micros().to_string());
        cmd.arg(url);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CodecInspector for FfprobeInspector {
    async fn inspect(&self, url: &str, timeout: Duration) -> DisplayResult<String> {
        let output = self
            .command(url, timeout)
            .output()
            .await
            .map_err(|e| DisplayError::probe(redact_url(url), format!("cannot run {}: {}", self.ffprobe_bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no diagnostic output")
                .trim()
                .to_string();
            return Err(DisplayError::probe(
                redact_url(url),
                format!("{} ({})", reason, output.status),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Extract codec family and resolution of the first video stream
pub fn parse_probe_output(url: &str, raw: &str) -> DisplayResult<(CodecFamily, Option<(u32, u32)>)> {
    let parsed: FfprobeOutput =
        serde_json::from_str(raw).map_err(|e| DisplayError::probe(redact_url(url), format!("unparseable report: {e}")))?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| DisplayError::probe(redact_url(url), "no video stream"))?;

    let family = stream
        .codec_name
        .as_deref()
        .map(CodecFamily::from_codec_name)
        .unwrap_or(CodecFamily::Unknown);
    let resolution = stream.width.zip(stream.height);
    Ok((family, resolution))
}

/// Copy only what the relay and player can pass through untouched
pub fn decision_for(family: &CodecFamily) -> PipelineMode {
    match family {
        CodecFamily::H264Compatible => PipelineMode::Copy,
        CodecFamily::Hevc | CodecFamily::Mjpeg | CodecFamily::Other(_) | CodecFamily::Unknown => {
            PipelineMode::Transcode
        }
    }
}

/// Probes a stream before each launch. Results are never cached.
#[derive(Clone)]
pub struct CodecProbe {
    inspector: Arc<dyn CodecInspector>,
    timeout: Duration,
}

impl CodecProbe {
    pub fn new(inspector: Arc<dyn CodecInspector>, timeout: Duration) -> Self {
        Self { inspector, timeout }
    }

    pub async fn probe(&self, url: &str) -> DisplayResult<ProbeReport> {
        let raw = tokio::time::timeout(self.timeout, self.inspector.inspect(url, self.timeout))
            .await
            .map_err(|_| DisplayError::ProbeTimeout {
                url: redact_url(url),
                timeout: self.timeout,
            })??;

        let (family, resolution) = parse_probe_output(url, &raw)?;
        let decision = decision_for(&family);
        Ok(ProbeReport {
            family,
            decision,
            resolution,
        })
    }

    /// Probe and decide, falling back to transcode on any probe failure
    pub async fn decide(&self, source: &str, url: &str) -> ProbeOutcome {
        match self.probe(url).await {
            Ok(report) => {
                camera_debug!(
                    source,
                    family = %report.family,
                    mode = %report.decision,
                    resolution = ?report.resolution,
                    "🔍 Probe complete"
                );
                ProbeOutcome {
                    family: Some(report.family),
                    decision: report.decision,
                    fell_back: false,
                }
            }
            Err(e) => {
                camera_warn!(source, error = %e, "⚠️ Probe failed, falling back to transcode");
                ProbeOutcome {
                    family: None,
                    decision: PipelineMode::Transcode,
                    fell_back: true,
                }
            }
        }
    }
}
