use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{AdbError, Result};
use crate::net::{AdbSocket, Endpoint};
use crate::wire;

/// Fixed header preceding the pixel data of a `framebuffer:` reply.
/// The leading version word selects the form: version 1 headers have
/// no color-space word, version 2 and later carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramebufferHeader {
    pub version: u32,
    /// Bits per pixel.
    pub bpp: u32,
    pub color_space: Option<u32>,
    /// Pixel buffer size in bytes.
    pub size: u32,
    pub width: u32,
    pub height: u32,
    pub red_offset: u32,
    pub red_length: u32,
    pub blue_offset: u32,
    pub blue_length: u32,
    pub green_offset: u32,
    pub green_length: u32,
    pub alpha_offset: u32,
    pub alpha_length: u32,
}

impl FramebufferHeader {
    /// Read a header from the stream, branching on the version word.
    pub async fn read<R>(stream: &mut R) -> Result<FramebufferHeader>
    where
        R: AsyncRead + Unpin,
    {
        let version = read_u32(stream).await?;
        let bpp = read_u32(stream).await?;
        let color_space = if version >= 2 {
            Some(read_u32(stream).await?)
        } else {
            None
        };
        Ok(FramebufferHeader {
            version,
            bpp,
            color_space,
            size: read_u32(stream).await?,
            width: read_u32(stream).await?,
            height: read_u32(stream).await?,
            red_offset: read_u32(stream).await?,
            red_length: read_u32(stream).await?,
            blue_offset: read_u32(stream).await?,
            blue_length: read_u32(stream).await?,
            green_offset: read_u32(stream).await?,
            green_length: read_u32(stream).await?,
            alpha_offset: read_u32(stream).await?,
            alpha_length: read_u32(stream).await?,
        })
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bpp / 8
    }
}

async fn read_u32<R>(stream: &mut R) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = [0u8; 4];
    match stream.read_exact(&mut bytes).await {
        Ok(_) => Ok(u32::from_le_bytes(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(AdbError::EndOfStream),
        Err(e) => Err(e.into()),
    }
}

/// A refreshable snapshot of the device screen. Each refresh opens a
/// fresh socket, re-reads the header and replaces the pixel data,
/// reusing the allocation while the reported size is unchanged.
pub struct Framebuffer {
    endpoint: Endpoint,
    serial: String,
    header: FramebufferHeader,
    data: Vec<u8>,
    refreshed: bool,
}

impl Framebuffer {
    pub(crate) fn new(endpoint: Endpoint, serial: String) -> Framebuffer {
        Framebuffer {
            endpoint,
            serial,
            header: FramebufferHeader::default(),
            data: Vec::new(),
            refreshed: false,
        }
    }

    /// Header from the last refresh.
    pub fn header(&self) -> &FramebufferHeader {
        &self.header
    }

    /// Pixel data from the last refresh.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// True once at least one refresh completed.
    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    /// Capture the screen. Idempotent: repeated refreshes replace the
    /// buffer contents in place when the size is unchanged.
    pub async fn refresh(&mut self) -> Result<()> {
        let mut socket = AdbSocket::connect(&self.endpoint).await?;
        let stream = socket.stream_mut();
        wire::set_device(stream, &self.serial).await?;
        wire::send_request(stream, "framebuffer:").await?;
        wire::read_okay(stream).await?;

        let header = FramebufferHeader::read(stream).await?;
        debug!(
            "framebuffer header: {}x{} {}bpp, {} bytes",
            header.width, header.height, header.bpp, header.size
        );
        let size = header.size as usize;
        if self.data.len() != size {
            self.data = vec![0u8; size];
        }
        match stream.read_exact(&mut self.data).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(AdbError::EndOfStream)
            }
            Err(e) => return Err(e.into()),
        }
        self.header = header;
        self.refreshed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(fields: &[u32]) -> Vec<u8> {
        fields.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    #[tokio::test]
    async fn reads_version_one_header_without_color_space() {
        let bytes = header_bytes(&[
            1, 32, 64, 4, 4, 0, 8, 16, 8, 8, 8, 24, 8,
        ]);
        let mut data: &[u8] = &bytes;
        let header = FramebufferHeader::read(&mut data).await.unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.bpp, 32);
        assert_eq!(header.color_space, None);
        assert_eq!(header.size, 64);
        assert_eq!(header.width, 4);
        assert_eq!(header.height, 4);
        assert_eq!(header.red_offset, 0);
        assert_eq!(header.alpha_length, 8);
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn reads_version_two_header_with_color_space() {
        let bytes = header_bytes(&[
            2, 32, 1, 64, 4, 4, 0, 8, 16, 8, 8, 8, 24, 8,
        ]);
        let mut data: &[u8] = &bytes;
        let header = FramebufferHeader::read(&mut data).await.unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.color_space, Some(1));
        assert_eq!(header.bytes_per_pixel(), 4);
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn truncated_header_is_end_of_stream() {
        let bytes = header_bytes(&[1, 32, 64]);
        let mut data: &[u8] = &bytes;
        assert!(matches!(
            FramebufferHeader::read(&mut data).await,
            Err(AdbError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn header_and_payload_reassemble() {
        // Splitting a reply into header + size chunk and reading both
        // yields the original bytes.
        let header_fields = [1u32, 16, 8, 2, 2, 0, 5, 11, 5, 5, 6, 0, 0];
        let mut reply = header_bytes(&header_fields);
        let pixels: Vec<u8> = (0..8).collect();
        reply.extend_from_slice(&pixels);

        let mut stream: &[u8] = &reply;
        let header = FramebufferHeader::read(&mut stream).await.unwrap();
        let mut body = vec![0u8; header.size as usize];
        stream.read_exact(&mut body).await.unwrap();

        let mut reassembled = header_bytes(&header_fields);
        reassembled.extend_from_slice(&body);
        assert_eq!(reassembled, reply);
    }
}
