use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{AdbError, Result};

/// On-device log buffer names, lowercased into the
/// `shell:logcat -B -b <name>` request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogId {
    Main,
    Radio,
    Events,
    System,
    Crash,
    Kernel,
}

impl LogId {
    /// Numeric buffer id carried in the v2 entry header.
    pub fn id(&self) -> u32 {
        match self {
            LogId::Main => 0,
            LogId::Radio => 1,
            LogId::Events => 2,
            LogId::System => 3,
            LogId::Crash => 4,
            LogId::Kernel => 5,
        }
    }
}

impl Display for LogId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            LogId::Main => "main",
            LogId::Radio => "radio",
            LogId::Events => "events",
            LogId::System => "system",
            LogId::Crash => "crash",
            LogId::Kernel => "kernel",
        };
        write!(f, "{name}")
    }
}

/// One `logger_entry` record from the binary logcat stream. The v1
/// header is 20 bytes; v2 and later carry the buffer id and, when the
/// header is wide enough, the uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
    pub pid: i32,
    pub tid: i32,
    pub header_size: u16,
    /// Buffer id, present from v2 headers on.
    pub log_id: Option<u32>,
    /// Sending uid, present when the header is at least 28 bytes.
    pub uid: Option<u32>,
    /// Priority byte for text buffers.
    pub priority: Option<u8>,
    /// NUL-terminated tag for text buffers.
    pub tag: Option<String>,
    /// NUL-terminated message for text buffers.
    pub message: Option<String>,
    /// Raw payload, kept verbatim for the binary `events` buffer.
    pub payload: Vec<u8>,
}

// Fixed prefix shared by every header version:
// u16 payload_len; u16 header_size; i32 pid; i32 tid; u32 sec; u32 nsec.
const PREFIX_LEN: usize = 20;

/// Pull-based reader over a binary logcat stream.
pub struct LogReader<R> {
    stream: R,
}

impl<R> LogReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(stream: R) -> LogReader<R> {
        LogReader { stream }
    }

    /// Read the next record. A clean close at a record boundary
    /// yields `None`; a close inside a record is `EndOfStream`.
    pub async fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        let mut prefix = [0u8; PREFIX_LEN];
        // A close on the first byte is the stream ending between
        // records; once any prefix byte arrived the record is live.
        let mut filled = 0;
        while filled < PREFIX_LEN {
            let n = self.stream.read(&mut prefix[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(AdbError::EndOfStream);
            }
            filled += n;
        }

        let payload_len = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
        let raw_header_size = u16::from_le_bytes([prefix[2], prefix[3]]);
        let pid = i32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        let tid = i32::from_le_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]);
        let sec = u32::from_le_bytes([prefix[12], prefix[13], prefix[14], prefix[15]]);
        let nsec = u32::from_le_bytes([prefix[16], prefix[17], prefix[18], prefix[19]]);

        // v1 entries carry zero padding where v2 stores the header
        // size; both mean a 20-byte header.
        let header_size = if raw_header_size == 0 {
            PREFIX_LEN as u16
        } else {
            raw_header_size
        };
        if (header_size as usize) < PREFIX_LEN {
            return Err(AdbError::ProtocolFault(format!(
                "log entry header too small: {header_size}"
            )));
        }

        let mut log_id = None;
        let mut uid = None;
        let mut consumed = PREFIX_LEN;
        if header_size >= 24 {
            log_id = Some(self.read_u32().await?);
            consumed += 4;
        }
        if header_size >= 28 {
            uid = Some(self.read_u32().await?);
            consumed += 4;
        }
        // Skip any header growth this reader does not know about.
        let mut slack = header_size as usize - consumed;
        while slack > 0 {
            let mut skip = [0u8; 8];
            let n = slack.min(skip.len());
            self.read_mid_record(&mut skip[..n]).await?;
            slack -= n;
        }

        let mut payload = vec![0u8; payload_len];
        self.read_mid_record(&mut payload).await?;

        let mut entry = LogEntry {
            timestamp_sec: sec,
            timestamp_nsec: nsec,
            pid,
            tid,
            header_size,
            log_id,
            uid,
            priority: None,
            tag: None,
            message: None,
            payload,
        };
        if entry.log_id != Some(LogId::Events.id()) {
            entry.parse_text_payload();
        }
        trace!(
            "log entry pid={} tid={} tag={:?} ({} payload bytes)",
            entry.pid,
            entry.tid,
            entry.tag,
            entry.payload.len()
        );
        Ok(Some(entry))
    }

    async fn read_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_mid_record(&mut bytes).await?;
        Ok(u32::from_le_bytes(bytes))
    }

    // Inside a record, any short read means the stream died mid-entry.
    async fn read_mid_record(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.stream.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(AdbError::EndOfStream),
            Err(e) => Err(e.into()),
        }
    }
}

impl LogEntry {
    // Text buffers lay the payload out as a priority byte followed by
    // a NUL-terminated tag and a NUL-terminated message. Malformed
    // payloads keep only the raw bytes.
    fn parse_text_payload(&mut self) {
        if self.payload.len() < 2 {
            return;
        }
        let priority = self.payload[0];
        let rest = &self.payload[1..];
        let Some(tag_end) = rest.iter().position(|&b| b == 0) else {
            return;
        };
        let tag = String::from_utf8_lossy(&rest[..tag_end]).into_owned();
        let message_bytes = &rest[tag_end + 1..];
        let message_end = message_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(message_bytes.len());
        let message = String::from_utf8_lossy(&message_bytes[..message_end]).into_owned();
        self.priority = Some(priority);
        self.tag = Some(tag);
        self.message = Some(message);
    }
}
