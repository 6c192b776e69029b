use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;
use tokio::io::AsyncWriteExt;

use crate::error::{AdbError, Result};
use crate::net::AdbSocket;
use crate::wire::latin1_string;

lazy_static! {
    // Matches the idle prompt at the end of a received chunk:
    // `host:directory $ ` (or `# ` for a root shell), optionally
    // preceded by an exit-status prefix like `1|`.
    static ref PROMPT: Regex =
        Regex::new(r"(?P<num>[1-9]*)\W*\b(?P<host>\w+):(?P<directory>.*)\s(?P<user>\$|#) $")
            .unwrap();
}

/// Privilege of the interactive shell, taken from the prompt token:
/// `$` for a regular shell, `#` for root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellAccess {
    Adb,
    Root,
}

/// The most recent recognised prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInfo {
    pub host: String,
    pub directory: String,
    pub access: ShellAccess,
    /// Raw prompt text as it appeared on the wire.
    pub message: String,
}

/// Lifecycle of an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no prompt seen yet.
    WaitingForPrompt,
    /// A prompt is cached and no command is outstanding.
    Idle,
    /// A command was sent; output is streaming until the next prompt.
    Executing,
    /// The device closed the stream.
    Closed,
}

/// An interactive shell session over a post-`shell:` socket. The
/// stream is the flat v1 form multiplexing stdout/stderr/stdin; the
/// session synchronises request/response turns by recognising the
/// idle prompt at the end of the received data.
pub struct ShellSocket {
    socket: AdbSocket,
    prompt: Option<PromptInfo>,
    valid_match: bool,
    state: SessionState,
}

impl ShellSocket {
    /// Wrap a socket that already completed the `shell:` handshake.
    pub fn new(socket: AdbSocket) -> ShellSocket {
        ShellSocket {
            socket,
            prompt: None,
            valid_match: false,
            state: SessionState::WaitingForPrompt,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while the cached prompt reflects the end of the received
    /// data. Any read that does not end in a prompt invalidates it.
    pub fn has_valid_prompt(&self) -> bool {
        self.valid_match
    }

    /// The last recognised prompt, valid or stale.
    pub fn last_prompt(&self) -> Option<&PromptInfo> {
        self.prompt.as_ref()
    }

    /// Working directory captured from the last prompt.
    pub fn current_directory(&self) -> Option<&str> {
        self.prompt.as_ref().map(|p| p.directory.as_str())
    }

    /// Privilege captured from the last prompt.
    pub fn access(&self) -> Option<ShellAccess> {
        self.prompt.as_ref().map(|p| p.access)
    }

    /// Write `cmd` plus a newline to the shell's stdin.
    pub async fn send_command(&mut self, cmd: &str) -> Result<()> {
        trace!("shell stdin: {cmd:?}");
        let stream = self.socket.stream_mut();
        stream.write_all(cmd.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        self.valid_match = false;
        self.state = SessionState::Executing;
        Ok(())
    }

    /// Read whatever is currently buffered on the socket. With `wait`
    /// set and nothing buffered, blocks until bytes arrive. A chunk
    /// ending in `$ ` or `# ` is run through prompt recognition; a
    /// successful match caches the prompt and marks the session idle.
    pub async fn read_available(&mut self, wait: bool) -> Result<String> {
        let mut collected: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.socket.stream_mut().try_read(&mut buf) {
                Ok(0) => {
                    self.state = SessionState::Closed;
                    self.socket.close();
                    if collected.is_empty() {
                        return Err(AdbError::EndOfStream);
                    }
                    break;
                }
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if collected.is_empty() && wait {
                        self.socket.stream().readable().await?;
                        continue;
                    }
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let text = latin1_string(&collected);
        if !text.is_empty() {
            // Anything read makes the previous prompt stale until a
            // new one is matched.
            self.valid_match = false;
            if text.ends_with("$ ") || text.ends_with("# ") {
                if let Some((_, info)) = match_prompt(&text) {
                    debug!("shell prompt: {:?}", info.message);
                    self.prompt = Some(info);
                    self.valid_match = true;
                    self.state = SessionState::Idle;
                }
            }
        }
        Ok(text)
    }

    /// Collect output until the shell is idle again. With `no_prompt`
    /// the terminating prompt bytes are stripped from the returned
    /// string; they are still consumed from the wire.
    pub async fn read_to_end(&mut self, no_prompt: bool) -> Result<String> {
        let mut collected = String::new();
        while !self.valid_match {
            let chunk = self.read_available(true).await?;
            collected.push_str(&chunk);
        }
        self.state = SessionState::Idle;
        if no_prompt {
            if let Some((start, _)) = match_prompt(&collected) {
                collected.truncate(start);
            }
        }
        Ok(collected)
    }

    /// Return the cached prompt if it is fresh and nothing is pending
    /// on the socket; otherwise drain to the next prompt. Leaves the
    /// session idle with no buffered bytes.
    pub async fn prompt(&mut self) -> Result<PromptInfo> {
        loop {
            let chunk = self.read_available(false).await?;
            if chunk.is_empty() {
                break;
            }
        }
        if !self.valid_match {
            self.read_to_end(false).await?;
        }
        self.prompt
            .clone()
            .ok_or_else(|| AdbError::ProtocolFault("shell produced no prompt".into()))
    }

    /// Run one command turn: drain pending data to a prompt, send the
    /// command, return its output without the terminating prompt.
    /// Output produced before the command was sent is never included.
    pub async fn interact(&mut self, cmd: &str) -> Result<String> {
        self.prompt().await?;
        self.send_command(cmd).await?;
        self.read_to_end(true).await
    }

    /// [`ShellSocket::interact`], additionally pushing the output
    /// into a receiver line by line.
    pub async fn interact_to<R>(&mut self, cmd: &str, receiver: &mut R) -> Result<String>
    where
        R: crate::receiver::ShellReceiver,
    {
        let output = self.interact(cmd).await?;
        for line in output.lines() {
            receiver.add_output(line);
        }
        receiver.flush();
        Ok(output)
    }

    /// Close the session. The socket is released when the session is
    /// dropped.
    pub fn close(&mut self) {
        self.socket.close();
        self.state = SessionState::Closed;
    }
}

// Locate the prompt inside `text`. Returns the byte offset where the
// prompt message starts (used to strip it) and the parsed fields. The
// offset skips separator noise before the host token unless an
// exit-status prefix is present, which belongs to the prompt.
fn match_prompt(text: &str) -> Option<(usize, PromptInfo)> {
    let caps = PROMPT.captures(text)?;
    let num = caps.name("num")?;
    let host = caps.name("host")?;
    let start = if num.as_str().is_empty() {
        host.start()
    } else {
        num.start()
    };
    let user = caps.name("user")?.as_str();
    Some((
        start,
        PromptInfo {
            host: host.as_str().to_string(),
            directory: caps.name("directory")?.as_str().to_string(),
            access: if user == "#" {
                ShellAccess::Root
            } else {
                ShellAccess::Adb
            },
            message: text[start..].to_string(),
        },
    ))
}
