//! Launch spec construction
//!
//! Turns a source, its placement and the probe decision into the exact
//! worker command line. Nothing here touches the system; the same inputs
//! always give the same spec.

use shared::{DisplaySettings, OutputMode, PipelineMode, Rect, SourceDescriptor};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{
    Buffering, OutputTarget, Placement, PipelineSpec, Transport, WorkerInvocation, WorkerRole, COMPOSITOR_UNIT,
};

pub const BUFFER_KB_RANGE: (u32, u32) = (16, 8192);
pub const MAX_DELAY_MS_RANGE: (u32, u32) = (0, 5000);
pub const THREAD_QUEUE_RANGE: (u32, u32) = (1, 1024);

const SOFTWARE_ENCODER: &str = "libx264";

/// How visible sources reach the screen, chosen once from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputVariant {
    /// Per-slot UDP relays overlaid by one compositor onto the framebuffer
    Composed {
        framebuffer: PathBuf,
        relay_base_port: u16,
    },
    /// One borderless player window per source
    Windowed,
}

impl OutputVariant {
    pub fn relay_port(&self, slot: usize) -> Option<u16> {
        match self {
            OutputVariant::Composed { relay_base_port, .. } => {
                u16::try_from(*relay_base_port as usize + slot).ok()
            }
            OutputVariant::Windowed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderStyle {
    pub image: Option<String>,
    pub bg_color: String,
    pub text_color: String,
}

/// Global inputs to every spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub output: OutputVariant,
    pub screen_width: u32,
    pub screen_height: u32,
    pub buffering: Buffering,
    pub low_latency: bool,
    pub use_udp_transport: bool,
    pub hardware_accel: bool,
    /// Hardware H.264 encoder found at startup
    pub hw_encoder: Option<String>,
    pub thread_count: u32,
    pub frame_rate: u32,
    pub network_timeout: Duration,
    pub placeholder: PlaceholderStyle,
    pub ffmpeg_bin: String,
    pub player_bin: String,
}

impl PipelineOptions {
    pub fn from_settings(settings: &DisplaySettings, hw_encoder: Option<String>) -> Self {
        let output = match settings.output_mode {
            OutputMode::Composed => OutputVariant::Composed {
                framebuffer: PathBuf::from(&settings.framebuffer_device),
                relay_base_port: settings.relay_base_port,
            },
            OutputMode::Windowed => OutputVariant::Windowed,
        };

        Self {
            output,
            screen_width: settings.screen_width,
            screen_height: settings.screen_height,
            buffering: Buffering {
                buffer_size_kb: settings.buffer_size_kb,
                max_delay_ms: settings.max_delay_ms,
                thread_queue_size: settings.thread_queue_size,
            },
            low_latency: settings.low_latency,
            use_udp_transport: settings.use_udp_transport,
            hardware_accel: settings.hardware_accel,
            hw_encoder,
            thread_count: settings.thread_count.max(1),
            frame_rate: settings.frame_rate,
            network_timeout: Duration::from_secs(settings.network_timeout),
            placeholder: PlaceholderStyle {
                image: settings.placeholder_image.clone(),
                bg_color: settings.placeholder_bg_color.clone(),
                text_color: settings.placeholder_text_color.clone(),
            },
            ffmpeg_bin: settings.ffmpeg_bin.clone(),
            player_bin: settings.player_bin.clone(),
        }
    }
}

/// Clamp requested buffering to the hard limits
pub fn clamp_buffering(requested: Buffering) -> Buffering {
    Buffering {
        buffer_size_kb: requested.buffer_size_kb.clamp(BUFFER_KB_RANGE.0, BUFFER_KB_RANGE.1),
        max_delay_ms: requested.max_delay_ms.clamp(MAX_DELAY_MS_RANGE.0, MAX_DELAY_MS_RANGE.1),
        thread_queue_size: requested
            .thread_queue_size
            .clamp(THREAD_QUEUE_RANGE.0, THREAD_QUEUE_RANGE.1),
    }
}

/// Escape text for an ffmpeg drawtext `text='...'` value
pub fn escape_drawtext(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '\'' | ':' | '%' | ',' | ';' | '[' | ']' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    options: PipelineOptions,
}

impl PipelineBuilder {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn build(&self, source: &SourceDescriptor, placement: &Placement, decision: PipelineMode) -> PipelineSpec {
        let transport = Transport::for_url(&source.url, self.options.use_udp_transport);
        let buffering = clamp_buffering(self.options.buffering);
        let output = self.output_target(placement);

        let invocation = match &output {
            OutputTarget::UdpRelay { port } => {
                self.relay_invocation(&source.url, transport, buffering, decision, placement.rect, *port)
            }
            _ => self.window_invocation(&source.name, &source.url, transport, buffering, decision, placement.rect),
        };

        PipelineSpec {
            source: source.name.clone(),
            role: WorkerRole::Live,
            mode: Some(decision),
            transport,
            input: source.url.clone(),
            output,
            buffering,
            invocation,
        }
    }

    pub fn build_placeholder(&self, source: &SourceDescriptor, placement: &Placement) -> PipelineSpec {
        let output = self.output_target(placement);
        let input = self.placeholder_input(&source.name, placement.rect);

        let invocation = match &output {
            OutputTarget::UdpRelay { port } => self.placeholder_relay(&source.name, placement.rect, *port),
            _ => self.placeholder_window(&source.name, placement.rect),
        };

        PipelineSpec {
            source: source.name.clone(),
            role: WorkerRole::Placeholder,
            mode: None,
            transport: Transport::Local,
            input,
            output,
            buffering: clamp_buffering(self.options.buffering),
            invocation,
        }
    }

    /// Compositor over every placed slot. `None` in windowed mode.
    pub fn build_compositor(&self, placements: &[Placement]) -> Option<PipelineSpec> {
        let OutputVariant::Composed { framebuffer, .. } = &self.options.output else {
            return None;
        };
        let buffering = clamp_buffering(self.options.buffering);
        let rate = self.options.frame_rate;

        let mut inv = WorkerInvocation::new(&self.options.ffmpeg_bin);
        inv.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        inv.args([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "color=c=black:s={}x{}:r={}",
                self.options.screen_width, self.options.screen_height, rate
            ),
        ]);

        let mut slots: Vec<&Placement> = placements.iter().collect();
        slots.sort_by_key(|p| p.slot);

        for placement in &slots {
            let Some(port) = self.options.output.relay_port(placement.slot) else {
                continue;
            };
            inv.args([
                "-thread_queue_size".to_string(),
                buffering.thread_queue_size.to_string(),
                "-fflags".to_string(),
                "nobuffer+discardcorrupt".to_string(),
                "-i".to_string(),
                format!(
                    "udp://127.0.0.1:{port}?overrun_nonfatal=1&fifo_size={}",
                    buffering.buffer_size_kb as u64 * 1024 / 188
                ),
            ]);
        }

        let mut filters = Vec::with_capacity(slots.len() * 2);
        let mut chain = "[0:v]".to_string();
        for (i, placement) in slots.iter().enumerate() {
            let input = i + 1;
            let rect = placement.rect;
            filters.push(format!(
                "[{input}:v]fps=fps={rate}:round=near,scale={}:{}:flags=fast_bilinear[v{input}]",
                rect.width, rect.height
            ));
            let label = format!("[o{input}]");
            filters.push(format!(
                "{chain}[v{input}]overlay={}:{}:eof_action=repeat:repeatlast=1{label}",
                rect.x, rect.y
            ));
            chain = label;
        }

        let output_label = if slots.is_empty() {
            filters.push("[0:v]null[out]".to_string());
            "[out]".to_string()
        } else {
            chain
        };

        inv.args([
            "-filter_complex".to_string(),
            filters.join(";"),
            "-map".to_string(),
            output_label,
            "-pix_fmt".to_string(),
            "rgb565le".to_string(),
            "-r".to_string(),
            rate.to_string(),
            "-f".to_string(),
            "fbdev".to_string(),
            framebuffer.display().to_string(),
        ]);
        // Framebuffer output must not try to reach an X server
        inv.env_remove.push("DISPLAY".to_string());

        Some(PipelineSpec {
            source: COMPOSITOR_UNIT.to_string(),
            role: WorkerRole::Compositor,
            mode: None,
            transport: Transport::Local,
            input: "lavfi".to_string(),
            output: OutputTarget::Framebuffer {
                device: framebuffer.clone(),
            },
            buffering,
            invocation: inv,
        })
    }

    fn output_target(&self, placement: &Placement) -> OutputTarget {
        match self.options.output.relay_port(placement.slot) {
            Some(port) => OutputTarget::UdpRelay { port },
            None => OutputTarget::Window { rect: placement.rect },
        }
    }

    fn transcode_encoder(&self) -> &str {
        match (&self.options.hw_encoder, self.options.hardware_accel) {
            (Some(encoder), true) => encoder,
            _ => SOFTWARE_ENCODER,
        }
    }

    fn relay_invocation(
        &self,
        url: &str,
        transport: Transport,
        buffering: Buffering,
        decision: PipelineMode,
        rect: Rect,
        port: u16,
    ) -> WorkerInvocation {
        let mut inv = WorkerInvocation::new(&self.options.ffmpeg_bin);
        inv.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);

        if self.options.low_latency {
            inv.args(["-fflags", "nobuffer+discardcorrupt", "-flags", "low_delay"]);
        }
        if let Some(flag) = transport.rtsp_flag() {
            inv.args(["-rtsp_transport", flag]);
            inv.arg("-timeout").arg(self.options.network_timeout.as_micros().to_string());
            inv.arg("-buffer_size").arg((buffering.buffer_size_kb as u64 * 1024).to_string());
        }
        inv.arg("-max_delay").arg((buffering.max_delay_ms as u64 * 1000).to_string());
        inv.arg("-thread_queue_size").arg(buffering.thread_queue_size.to_string());
        inv.arg("-i").arg(url);
        inv.arg("-an");

        match decision {
            PipelineMode::Copy => {
                inv.args(["-c:v", "copy"]);
            }
            PipelineMode::Transcode => {
                let encoder = self.transcode_encoder().to_string();
                inv.arg("-vf").arg(format!(
                    "scale={}:{},fps={}",
                    rect.width, rect.height, self.options.frame_rate
                ));
                inv.arg("-c:v").arg(&encoder);
                if encoder == SOFTWARE_ENCODER {
                    inv.args(["-preset", "ultrafast", "-tune", "zerolatency"]);
                }
                inv.args(["-pix_fmt", "yuv420p"]);
                inv.arg("-g").arg(self.options.frame_rate.to_string());
                inv.arg("-threads").arg(self.options.thread_count.to_string());
            }
        }

        inv.args(["-f", "mpegts"]);
        inv.arg(format!("udp://127.0.0.1:{port}?pkt_size=1316"));
        inv
    }

    fn window_invocation(
        &self,
        name: &str,
        url: &str,
        transport: Transport,
        buffering: Buffering,
        decision: PipelineMode,
        rect: Rect,
    ) -> WorkerInvocation {
        let mut inv = WorkerInvocation::new(&self.options.player_bin);
        self.window_base_args(&mut inv, name, rect);

        if self.options.low_latency {
            inv.args(["--profile=low-latency", "--untimed"]);
        }
        if let Some(flag) = transport.rtsp_flag() {
            inv.arg(format!("--rtsp-transport={flag}"));
        }
        inv.arg(format!("--network-timeout={}", self.options.network_timeout.as_secs()));
        inv.arg(format!("--demuxer-max-bytes={}KiB", buffering.buffer_size_kb));
        inv.arg(format!(
            "--demuxer-readahead-secs={:.3}",
            buffering.max_delay_ms as f64 / 1000.0
        ));
        inv.arg(format!("--vd-lavc-threads={}", self.options.thread_count));

        match decision {
            PipelineMode::Copy => inv.arg("--hwdec=auto"),
            PipelineMode::Transcode => inv.arg("--hwdec=no"),
        };

        inv.arg(url);
        inv
    }

    fn window_base_args(&self, inv: &mut WorkerInvocation, name: &str, rect: Rect) {
        inv.args([
            "--no-audio",
            "--no-input-terminal",
            "--no-input-default-bindings",
            "--no-input-vo-keyboard",
            "--no-osc",
            "--no-osd-bar",
            "--osd-level=0",
            "--cursor-autohide=always",
            "--no-border",
            "--ontop",
            "--keepaspect=no",
            "--really-quiet",
        ]);
        inv.arg(format!("--geometry={}", rect.geometry()));
        inv.arg(format!("--autofit={}x{}", rect.width, rect.height));
        inv.arg(format!("--title=camwall-{name}"));
        // Exit on stream end so the supervisor sees the failure
        inv.arg("--keep-open=no");
    }

    fn drawtext(&self, name: &str, rect: Rect) -> String {
        format!(
            "drawtext=text='{}':fontcolor={}:fontsize={}:x=(w-text_w)/2:y=(h-text_h)/2",
            escape_drawtext(name),
            self.options.placeholder.text_color,
            (rect.height / 10).max(12)
        )
    }

    fn placeholder_input(&self, name: &str, rect: Rect) -> String {
        match &self.options.placeholder.image {
            Some(image) => image.clone(),
            None => format!(
                "color=c={}:s={}x{}:r=1,{}",
                self.options.placeholder.bg_color,
                rect.width,
                rect.height,
                self.drawtext(name, rect)
            ),
        }
    }

    fn placeholder_relay(&self, name: &str, rect: Rect, port: u16) -> WorkerInvocation {
        let mut inv = WorkerInvocation::new(&self.options.ffmpeg_bin);
        inv.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-re"]);

        match &self.options.placeholder.image {
            Some(image) => {
                inv.args(["-loop", "1"]);
                inv.arg("-i").arg(image);
                inv.arg("-vf").arg(format!(
                    "scale={}:{},fps={}",
                    rect.width, rect.height, self.options.frame_rate
                ));
            }
            None => {
                inv.args(["-f", "lavfi"]);
                inv.arg("-i").arg(format!(
                    "color=c={}:s={}x{}:r={}",
                    self.options.placeholder.bg_color, rect.width, rect.height, self.options.frame_rate
                ));
                inv.arg("-vf").arg(self.drawtext(name, rect));
            }
        }

        inv.args(["-c:v", SOFTWARE_ENCODER, "-preset", "ultrafast", "-tune", "zerolatency"]);
        inv.args(["-pix_fmt", "yuv420p"]);
        inv.arg("-g").arg(self.options.frame_rate.to_string());
        inv.args(["-f", "mpegts"]);
        inv.arg(format!("udp://127.0.0.1:{port}?pkt_size=1316"));
        inv
    }

    fn placeholder_window(&self, name: &str, rect: Rect) -> WorkerInvocation {
        let mut inv = WorkerInvocation::new(&self.options.player_bin);
        self.window_base_args(&mut inv, name, rect);

        match &self.options.placeholder.image {
            Some(image) => {
                inv.arg("--image-display-duration=inf");
                inv.arg(image);
            }
            None => {
                inv.arg("--loop-file=inf");
                inv.arg(format!(
                    "av://lavfi:color=c={}:s={}x{}:r=1,{}",
                    self.options.placeholder.bg_color,
                    rect.width,
                    rect.height,
                    self.drawtext(name, rect)
                ));
            }
        }
        inv
    }
}
