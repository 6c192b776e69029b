use log::{error, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AdbError, Result};

/// Four-byte status word for a successful request.
pub const OKAY: &[u8; 4] = b"OKAY";
/// Four-byte status word for a failed request.
pub const FAIL: &[u8; 4] = b"FAIL";

/// Status acknowledgement for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbResponse {
    pub ok: bool,
    /// Diagnostic sent with a `FAIL` status.
    pub message: Option<String>,
}

impl AdbResponse {
    /// Convert a `FAIL` acknowledgement into the server's diagnostic.
    pub fn into_result(self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(AdbError::AdbFailure(self.message.unwrap_or_default()))
        }
    }
}

/// Text encoding for a free-form response surface. The protocol
/// default is ISO-8859-1; the `root` and `install` terminals are the
/// UTF-8 quirk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Latin1,
    Utf8,
}

impl TextEncoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Latin1 => latin1_string(bytes),
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Encode a payload as latin-1 bytes. The host protocol frames and
/// most text surfaces use ISO-8859-1; only the `root` and `install`
/// terminals are UTF-8.
pub fn latin1_bytes(s: &str) -> Vec<u8> {
    s.chars().map(|c| (c as u32).min(0xff) as u8).collect()
}

/// Decode latin-1 bytes into a string, one char per byte.
pub fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Frame a service request: four uppercase hex digits carrying the
/// payload byte length, then the payload itself.
/// `form_request("host:kill")` is the thirteen bytes `0009host:kill`.
pub fn form_request(payload: &str) -> Vec<u8> {
    let body = latin1_bytes(payload);
    let mut frame = format!("{:04X}", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    frame
}

/// Write a framed request to the stream.
pub async fn send_request<T>(stream: &mut T, payload: &str) -> Result<()>
where
    T: AsyncWrite + Unpin,
{
    trace!("adb request: {payload:?}");
    stream.write_all(&form_request(payload)).await?;
    Ok(())
}

/// Read the four status bytes following a request. `FAIL` consumes the
/// length-prefixed diagnostic that follows it; any word other than
/// `OKAY`/`FAIL` is a protocol violation.
pub async fn read_status<T>(stream: &mut T) -> Result<AdbResponse>
where
    T: AsyncRead + Unpin,
{
    let mut status = [0u8; 4];
    read_exact_frame(stream, &mut status).await?;
    if &status == OKAY {
        return Ok(AdbResponse {
            ok: true,
            message: None,
        });
    }
    if &status == FAIL {
        let message = read_string(stream).await?;
        trace!("adb FAIL: {message}");
        return Ok(AdbResponse {
            ok: false,
            message: Some(message),
        });
    }
    error!("Unexpected status bytes from adb server: {status:?}");
    Err(AdbError::ProtocolFault(format!(
        "unexpected status bytes {:?}",
        latin1_string(&status)
    )))
}

/// Read a status word and fail on anything but `OKAY`.
pub async fn read_okay<T>(stream: &mut T) -> Result<()>
where
    T: AsyncRead + Unpin,
{
    read_status(stream).await?.into_result()
}

/// Read a four-hex-digit length prefix.
pub async fn read_hex_length<T>(stream: &mut T) -> Result<usize>
where
    T: AsyncRead + Unpin,
{
    let mut digits = [0u8; 4];
    read_exact_frame(stream, &mut digits).await?;
    let text = std::str::from_utf8(&digits)
        .map_err(|_| AdbError::ProtocolFault(format!("non-ASCII length prefix {digits:?}")))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| AdbError::ProtocolFault(format!("bad length prefix {text:?}")))
}

/// Read a length-prefixed string and decode it as latin-1.
pub async fn read_string<T>(stream: &mut T) -> Result<String>
where
    T: AsyncRead + Unpin,
{
    let len = read_hex_length(stream).await?;
    let mut payload = vec![0u8; len];
    read_exact_frame(stream, &mut payload).await?;
    Ok(latin1_string(&payload))
}

/// Read whatever the server sends until it closes the stream, decoded
/// as UTF-8. Used by the `root`/`unroot` and `install` terminals,
/// which are the protocol's UTF-8 quirk surfaces.
pub async fn read_to_end_utf8<T>(stream: &mut T) -> Result<String>
where
    T: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Bind the socket to a device: `host:transport:<serial>` followed by
/// one `OKAY`. Further service requests on the stream are scoped to
/// that device.
pub async fn set_device<T>(stream: &mut T, serial: &str) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    send_request(stream, &format!("host:transport:{serial}")).await?;
    read_okay(stream).await
}

// A connection closed before or inside a frame is a protocol fault:
// request/response exchanges have no benign end-of-stream. The
// streaming readers (logcat, framebuffer) carry their own
// record-boundary handling instead of going through here.
async fn read_exact_frame<T>(stream: &mut T, buf: &mut [u8]) -> Result<()>
where
    T: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(AdbError::ProtocolFault(
                    "connection closed instead of a reply".into(),
                ));
            }
            return Err(AdbError::ProtocolFault(format!(
                "short read: got {filled} of {} bytes",
                buf.len()
            )));
        }
        filled += n;
    }
    Ok(())
}
