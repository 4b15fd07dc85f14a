pub mod payload;
pub mod report;

pub use payload::Payload;
pub use report::{HeartbeatReport, Report, StatusReport};

/// Partial-buffer high-water mark; beyond this the oldest half is dropped.
const MAX_PARTIAL: usize = 8192;
const PARTIAL_KEEP: usize = 4096;

/// One decoded line from the device.
///
/// The wire protocol is newline-delimited text. Structured frames carry a
/// `RSP:` or `EVT:` prefix; every other line is diagnostic output and is
/// forwarded verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `RSP:<command>:<OK|ERR>[:<k=v,...>]`
    Response {
        command: String,
        ok: bool,
        payload: Payload,
    },
    /// `EVT:<kind>[:<k=v,...>]`
    Notification { kind: String, payload: Payload },
    /// Anything that is not a structured frame.
    Log(String),
}

/// Accumulates transport reads and yields complete frames. A frame may
/// arrive split across any number of reads; bytes between frames are never
/// dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    partial: String,
    pub trims: u64,
    pub decode_errors: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let chunk = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                self.decode_errors += 1;
                String::from_utf8_lossy(bytes).to_string()
            }
        };
        self.partial.push_str(&chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.partial.find(['\n', '\r']) {
            let line = self.partial[..pos].to_string();
            // Swallow the whole delimiter run so \r\n pairs yield one frame.
            let mut advance = pos + 1;
            while advance < self.partial.len()
                && matches!(self.partial.as_bytes()[advance], b'\n' | b'\r')
            {
                advance += 1;
            }
            self.partial.drain(..advance);

            if !line.trim().is_empty() {
                frames.push(parse_line(&line));
            }
        }

        if self.partial.len() > MAX_PARTIAL {
            // The cut must land on a char boundary or the slice panics on
            // multi-byte diagnostics.
            let mut cut = self.partial.len() - PARTIAL_KEEP;
            while !self.partial.is_char_boundary(cut) {
                cut += 1;
            }
            self.partial.drain(..cut);
            self.trims += 1;
        }

        frames
    }
}

/// Classify a single complete line. Malformed structured prefixes degrade to
/// `Frame::Log` rather than being dropped.
pub fn parse_line(line: &str) -> Frame {
    if let Some(rest) = line.strip_prefix("RSP:") {
        let mut parts = rest.splitn(3, ':');
        if let (Some(command), Some(status)) = (parts.next(), parts.next()) {
            let ok = match status {
                "OK" => true,
                "ERR" => false,
                _ => return Frame::Log(line.to_string()),
            };
            if !command.is_empty() {
                return Frame::Response {
                    command: command.to_string(),
                    ok,
                    payload: parts.next().map(Payload::parse).unwrap_or_default(),
                };
            }
        }
        return Frame::Log(line.to_string());
    }

    if let Some(rest) = line.strip_prefix("EVT:") {
        let mut parts = rest.splitn(2, ':');
        if let Some(kind) = parts.next() {
            if !kind.is_empty() {
                return Frame::Notification {
                    kind: kind.to_string(),
                    payload: parts.next().map(Payload::parse).unwrap_or_default(),
                };
            }
        }
        return Frame::Log(line.to_string());
    }

    Frame::Log(line.to_string())
}
