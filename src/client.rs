use log::{debug, info};
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;

use crate::cancel::CancelSignal;
use crate::device::{DeviceData, DeviceState, ForwardData, ForwardSpec};
use crate::error::{AdbError, Result};
use crate::framebuffer::Framebuffer;
use crate::logcat::{LogEntry, LogId, LogReader};
use crate::net::{AdbSocket, Endpoint};
use crate::receiver::ShellReceiver;
use crate::shell::ShellSocket;
use crate::wire::{self, TextEncoding};

/// APK bodies are streamed to the device in chunks of this size.
const INSTALL_CHUNK: usize = 32 * 1024;

/// Client for the host-side ADB server. Every operation opens a
/// fresh connection, runs its exchange and releases the socket;
/// only the streaming services hand a live socket back to the caller.
#[derive(Debug, Clone)]
pub struct AdbClient {
    endpoint: Endpoint,
    post_root_delay: Duration,
}

impl Default for AdbClient {
    fn default() -> AdbClient {
        AdbClient::new(Endpoint::default())
    }
}

impl AdbClient {
    pub fn new(endpoint: Endpoint) -> AdbClient {
        AdbClient {
            endpoint,
            post_root_delay: Duration::from_secs(3),
        }
    }

    /// Time to wait after a successful `root`/`unroot` for the
    /// on-device daemon to come back.
    pub fn with_post_root_delay(mut self, delay: Duration) -> AdbClient {
        self.post_root_delay = delay;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&self) -> Result<AdbSocket> {
        AdbSocket::connect(&self.endpoint).await
    }

    // Device-scoped operations validate the serial before any socket
    // is opened.
    fn serial_of(device: &DeviceData) -> Result<&str> {
        if device.serial.is_empty() {
            return Err(AdbError::InvalidArgument("empty device serial".into()));
        }
        Ok(&device.serial)
    }

    async fn open_device(&self, device: &DeviceData) -> Result<AdbSocket> {
        let serial = Self::serial_of(device)?;
        let mut socket = self.open().await?;
        wire::set_device(socket.stream_mut(), serial).await?;
        Ok(socket)
    }

    /// `host:version` — protocol version of the server, from its hex
    /// string reply.
    pub async fn get_adb_version(&self) -> Result<u32> {
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, "host:version").await?;
        wire::read_okay(stream).await?;
        let version = wire::read_string(stream).await?;
        u32::from_str_radix(version.trim(), 16).map_err(|_| {
            AdbError::ProtocolFault(format!("bad version string {version:?}"))
        })
    }

    /// `host:kill` — ask the server to exit. Fire-and-forget: the
    /// server closes the connection instead of acknowledging.
    pub async fn kill_adb(&self) -> Result<()> {
        let mut socket = self.open().await?;
        wire::send_request(socket.stream_mut(), "host:kill").await?;
        socket.stream_mut().flush().await?;
        info!("Sent kill request to adb server at {}", self.endpoint);
        Ok(())
    }

    /// `host:devices-l` — the attached devices, one [`DeviceData`]
    /// per listing line.
    pub async fn get_devices(&self) -> Result<Vec<DeviceData>> {
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, "host:devices-l").await?;
        wire::read_okay(stream).await?;
        let listing = wire::read_string(stream).await?;
        let mut devices = Vec::new();
        for line in listing.lines() {
            if line.trim().is_empty() {
                continue;
            }
            devices.push(DeviceData::parse(line)?);
        }
        debug!("{} device(s) attached", devices.len());
        Ok(devices)
    }

    /// Resolve a device by serial, or the only attached device when
    /// no serial is given.
    pub async fn get_device(&self, serial: Option<&str>) -> Result<DeviceData> {
        let devices = self.get_devices().await?;
        match serial {
            Some(serial) => devices
                .into_iter()
                .find(|d| d.serial == serial)
                .ok_or_else(|| AdbError::DeviceNotFound(serial.to_string())),
            None => {
                let mut devices = devices;
                match devices.len() {
                    0 => Err(AdbError::DeviceNotFound("no devices attached".into())),
                    1 => Ok(devices.remove(0)),
                    _ => Err(AdbError::MultipleDevicesMatch),
                }
            }
        }
    }

    /// `host-serial:<s>:forward:…` — create a host→device forward.
    /// Returns the allocated port, 0 when the server names none.
    pub async fn create_forward(
        &self,
        device: &DeviceData,
        local: &ForwardSpec,
        remote: &ForwardSpec,
        allow_rebind: bool,
    ) -> Result<u16> {
        let serial = Self::serial_of(device)?;
        let rebind = if allow_rebind { "" } else { "norebind:" };
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(
            stream,
            &format!("host-serial:{serial}:forward:{rebind}{local};{remote}"),
        )
        .await?;
        // One OKAY for the transport switch, one for the forward
        // accept, then the allocated port.
        wire::read_okay(stream).await?;
        wire::read_okay(stream).await?;
        Ok(read_port_string(stream).await?)
    }

    /// Transport, then `reverse:forward:…` — create a device→host
    /// forward.
    pub async fn create_reverse_forward(
        &self,
        device: &DeviceData,
        remote: &ForwardSpec,
        local: &ForwardSpec,
        allow_rebind: bool,
    ) -> Result<u16> {
        let rebind = if allow_rebind { "" } else { "norebind:" };
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("reverse:forward:{rebind}{remote};{local}")).await?;
        wire::read_okay(stream).await?;
        wire::read_okay(stream).await?;
        Ok(read_port_string(stream).await?)
    }

    /// `host-serial:<s>:killforward:tcp:<port>`.
    pub async fn remove_forward(&self, device: &DeviceData, local_port: u16) -> Result<()> {
        let serial = Self::serial_of(device)?;
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(
            stream,
            &format!("host-serial:{serial}:killforward:tcp:{local_port}"),
        )
        .await?;
        wire::read_okay(stream).await
    }

    /// `host-serial:<s>:killforward-all`.
    pub async fn remove_all_forwards(&self, device: &DeviceData) -> Result<()> {
        let serial = Self::serial_of(device)?;
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("host-serial:{serial}:killforward-all")).await?;
        wire::read_okay(stream).await
    }

    /// Transport, then `reverse:killforward:tcp:<port>`.
    pub async fn remove_reverse_forward(&self, device: &DeviceData, remote_port: u16) -> Result<()> {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("reverse:killforward:tcp:{remote_port}")).await?;
        wire::read_okay(stream).await
    }

    /// Transport, then `reverse:killforward-all`.
    pub async fn remove_all_reverse_forwards(&self, device: &DeviceData) -> Result<()> {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, "reverse:killforward-all").await?;
        wire::read_okay(stream).await
    }

    /// `host-serial:<s>:list-forward`.
    pub async fn list_forward(&self, device: &DeviceData) -> Result<Vec<ForwardData>> {
        let serial = Self::serial_of(device)?;
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("host-serial:{serial}:list-forward")).await?;
        wire::read_okay(stream).await?;
        let listing = wire::read_string(stream).await?;
        parse_forward_listing(&listing)
    }

    /// Transport, then `reverse:list-forward`.
    pub async fn list_reverse_forward(&self, device: &DeviceData) -> Result<Vec<ForwardData>> {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, "reverse:list-forward").await?;
        wire::read_okay(stream).await?;
        let listing = wire::read_string(stream).await?;
        parse_forward_listing(&listing)
    }

    /// `host:connect:<host>:<port>` — attach a networked device.
    pub async fn connect_device(&self, host: &str, port: u16) -> Result<()> {
        if host.is_empty() {
            return Err(AdbError::InvalidArgument("empty device host".into()));
        }
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("host:connect:{host}:{port}")).await?;
        wire::read_okay(stream).await
    }

    /// `host:disconnect:<host>:<port>`.
    pub async fn disconnect_device(&self, host: &str, port: u16) -> Result<()> {
        if host.is_empty() {
            return Err(AdbError::InvalidArgument("empty device host".into()));
        }
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("host:disconnect:{host}:{port}")).await?;
        wire::read_okay(stream).await
    }

    /// `host:pair:<code>:<host>:<port>` — wireless-debugging pairing.
    /// The server acknowledges with `OKAY` and reports the outcome in
    /// the string that follows; a `Failed:` prefix means rejection.
    pub async fn pair(&self, host: &str, port: u16, pairing_code: &str) -> Result<String> {
        if host.is_empty() {
            return Err(AdbError::InvalidArgument("empty device host".into()));
        }
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("host:pair:{pairing_code}:{host}:{port}")).await?;
        wire::read_okay(stream).await?;
        let message = wire::read_string(stream).await?;
        if message.starts_with("Failed:") {
            return Err(AdbError::AdbFailure(message));
        }
        Ok(message)
    }

    /// Transport, then `reboot:<into>`. Pass an empty string for a
    /// normal reboot, or a target such as `bootloader` / `recovery`.
    pub async fn reboot(&self, device: &DeviceData, into: &str) -> Result<()> {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("reboot:{into}")).await?;
        wire::read_okay(stream).await
    }

    /// Transport, then `root:` — restart adbd with root privileges.
    pub async fn root(&self, device: &DeviceData) -> Result<()> {
        self.restart_daemon(device, "root:").await
    }

    /// Transport, then `unroot:` — drop adbd back to shell privileges.
    pub async fn unroot(&self, device: &DeviceData) -> Result<()> {
        self.restart_daemon(device, "unroot:").await
    }

    // The daemon answers with free-form UTF-8 text and restarts, so
    // there is nothing to probe; a fixed delay is the only portable
    // way to wait for it (networked devices may never come back).
    async fn restart_daemon(&self, device: &DeviceData, request: &str) -> Result<()> {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, request).await?;
        wire::read_okay(stream).await?;
        let message = wire::read_to_end_utf8(stream).await?;
        if !message.trim_start().to_lowercase().starts_with("restarting") {
            return Err(AdbError::AdbFailure(message.trim().to_string()));
        }
        debug!("daemon restarting after {request:?}; waiting {:?}", self.post_root_delay);
        sleep(self.post_root_delay).await;
        Ok(())
    }

    /// `host-serial:<s>:features` — feature set negotiated with the
    /// device. Stable under repeated calls within a session.
    pub async fn get_feature_set(&self, device: &DeviceData) -> Result<HashSet<String>> {
        let serial = Self::serial_of(device)?;
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("host-serial:{serial}:features")).await?;
        wire::read_okay(stream).await?;
        let features = wire::read_string(stream).await?;
        Ok(features
            .split(|c| c == ',' || c == '\n')
            .filter(|f| !f.trim().is_empty())
            .map(|f| f.trim().to_string())
            .collect())
    }

    /// `host-serial:<s>:get-serialno`.
    pub async fn get_serialno(&self, device: &DeviceData) -> Result<String> {
        let serial = Self::serial_of(device)?;
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("host-serial:{serial}:get-serialno")).await?;
        wire::read_okay(stream).await?;
        Ok(wire::read_string(stream).await?.trim().to_string())
    }

    /// `host-serial:<s>:get-state`.
    pub async fn get_state(&self, device: &DeviceData) -> Result<DeviceState> {
        let serial = Self::serial_of(device)?;
        let mut socket = self.open().await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("host-serial:{serial}:get-state")).await?;
        wire::read_okay(stream).await?;
        let state = wire::read_string(stream).await?;
        Ok(DeviceState::from_token(state.trim()))
    }

    /// Transport, then `tcpip:<port>` — switch the device to TCP
    /// listening mode. The confirmation text is discarded.
    pub async fn tcpip(&self, device: &DeviceData, port: u16) -> Result<()> {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("tcpip:{port}")).await?;
        wire::read_okay(stream).await?;
        let _ = wire::read_to_end_utf8(stream).await;
        Ok(())
    }

    /// Transport, then `usb:` — switch the device back to USB mode.
    pub async fn usb(&self, device: &DeviceData) -> Result<()> {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, "usb:").await?;
        wire::read_okay(stream).await?;
        let _ = wire::read_to_end_utf8(stream).await;
        Ok(())
    }

    /// Stream an APK to the device package manager. The body is sent
    /// in 32 KiB chunks after
    /// `exec:cmd package 'install' <args> -S <size>`; the install
    /// succeeded only if the terminal text is exactly `Success\n`.
    pub async fn install<R>(
        &self,
        device: &DeviceData,
        apk: &mut R,
        apk_size: u64,
        arguments: &[&str],
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(
            stream,
            &format!(
                "exec:cmd package 'install' {} -S {}",
                arguments.join(" "),
                apk_size
            ),
        )
        .await?;
        wire::read_okay(stream).await?;

        let mut buf = vec![0u8; INSTALL_CHUNK];
        let mut sent: u64 = 0;
        loop {
            let n = apk.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            sent += n as u64;
        }
        // The package manager waits for exactly the announced byte
        // count; a mismatched stream would leave it blocked and this
        // read waiting forever.
        if sent != apk_size {
            return Err(AdbError::InvalidArgument(format!(
                "apk stream was {sent} bytes, announced {apk_size}"
            )));
        }
        stream.flush().await?;

        let message = wire::read_to_end_utf8(stream).await?;
        if message == "Success\n" {
            info!("install finished on {}", device.serial);
            Ok(())
        } else {
            Err(AdbError::AdbFailure(message.trim_end().to_string()))
        }
    }

    /// Run a command through `shell:<cmd>` and feed its output lines
    /// to the receiver, splitting on `\n` or `\r\n` and delivering an
    /// unterminated trailing line as-is. Cancellation closes the
    /// socket and is not an error; any other read failure surfaces as
    /// `ShellCommandUnresponsive`. The receiver is always flushed.
    pub async fn execute_remote_command<R>(
        &self,
        device: &DeviceData,
        command: &str,
        receiver: &mut R,
        mut cancel: CancelSignal,
    ) -> Result<()>
    where
        R: ShellReceiver + ?Sized,
    {
        self.execute_remote_command_with_encoding(
            device,
            command,
            receiver,
            &mut cancel,
            TextEncoding::Latin1,
        )
        .await
    }

    pub async fn execute_remote_command_with_encoding<R>(
        &self,
        device: &DeviceData,
        command: &str,
        receiver: &mut R,
        cancel: &mut CancelSignal,
        encoding: TextEncoding,
    ) -> Result<()>
    where
        R: ShellReceiver + ?Sized,
    {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, &format!("shell:{command}")).await?;
        wire::read_okay(stream).await?;

        let result = pump_lines(stream, receiver, cancel, encoding).await;
        receiver.flush();
        result
    }

    /// Open an interactive shell session (`shell:` with no command).
    pub async fn start_shell(&self, device: &DeviceData) -> Result<ShellSocket> {
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        wire::send_request(stream, "shell:").await?;
        wire::read_okay(stream).await?;
        Ok(ShellSocket::new(socket))
    }

    /// Stream binary log records from the requested buffers through
    /// `shell:logcat -B`. Each decoded entry is handed to `on_entry`;
    /// the pump ends on a clean close or on cancellation.
    pub async fn run_log_service<F>(
        &self,
        device: &DeviceData,
        log_ids: &[LogId],
        mut on_entry: F,
        mut cancel: CancelSignal,
    ) -> Result<()>
    where
        F: FnMut(LogEntry),
    {
        if log_ids.is_empty() {
            return Err(AdbError::InvalidArgument("no log buffers requested".into()));
        }
        let mut socket = self.open_device(device).await?;
        let stream = socket.stream_mut();
        let mut request = "shell:logcat -B".to_string();
        for id in log_ids {
            request.push_str(&format!(" -b {id}"));
        }
        wire::send_request(stream, &request).await?;
        wire::read_okay(stream).await?;

        let mut reader = LogReader::new(stream);
        loop {
            tokio::select! {
                entry = reader.next_entry() => {
                    match entry {
                        Ok(Some(entry)) => on_entry(entry),
                        Ok(None) => break,
                        Err(AdbError::EndOfStream) => break,
                        Err(e) => {
                            if cancel.is_cancelled() {
                                break;
                            }
                            return Err(e);
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("log service cancelled, closing socket");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Build a refreshable framebuffer for the device. No I/O happens
    /// until the first [`Framebuffer::refresh`].
    pub fn create_refreshable_framebuffer(&self, device: &DeviceData) -> Result<Framebuffer> {
        let serial = Self::serial_of(device)?;
        Ok(Framebuffer::new(self.endpoint.clone(), serial.to_string()))
    }
}

// The allocated-port payload after a forward exchange: a
// length-prefixed hex string, possibly empty. Empty or unparsable
// yields 0.
async fn read_port_string<T>(stream: &mut T) -> Result<u16>
where
    T: tokio::io::AsyncRead + Unpin,
{
    let port = wire::read_string(stream).await?;
    Ok(u16::from_str_radix(port.trim(), 16).unwrap_or(0))
}

fn parse_forward_listing(listing: &str) -> Result<Vec<ForwardData>> {
    let mut forwards = Vec::new();
    for line in listing.lines() {
        if line.trim().is_empty() {
            continue;
        }
        forwards.push(ForwardData::parse(line)?);
    }
    Ok(forwards)
}

// Shared line pump for shell command output. Reads raw chunks,
// splits on `\n` (tolerating `\r\n`), keeps the unterminated tail
// across reads and delivers it once the stream ends.
async fn pump_lines<R>(
    stream: &mut tokio::net::TcpStream,
    receiver: &mut R,
    cancel: &mut CancelSignal,
    encoding: TextEncoding,
) -> Result<()>
where
    R: ShellReceiver + ?Sized,
{
    let mut pending = String::new();
    let mut buf = [0u8; 4096];
    loop {
        let read = tokio::select! {
            read = stream.read(&mut buf) => read,
            _ = cancel.cancelled() => {
                debug!("shell command cancelled, closing socket");
                return Ok(());
            }
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                pending.push_str(&encoding.decode(&buf[..n]));
                while let Some(newline) = pending.find('\n') {
                    let rest = pending.split_off(newline + 1);
                    let line = std::mem::replace(&mut pending, rest);
                    let line = line.trim_end_matches('\n').trim_end_matches('\r');
                    receiver.add_output(line);
                }
            }
            Err(e) => {
                // A read error raised by cancellation closing the
                // socket is not reported.
                if cancel.is_cancelled() {
                    return Ok(());
                }
                return Err(AdbError::ShellCommandUnresponsive(e));
            }
        }
    }
    if !pending.is_empty() {
        receiver.add_output(pending.trim_end_matches('\r'));
    }
    Ok(())
}
