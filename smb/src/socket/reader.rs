use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use smb_core::error::SMBError;
use smb_core::logging::{debug, trace};
use smb_core::SMBResult;

use crate::server::buffer::SMBRequestBuffers;
use crate::socket::frame::{rfc1002_length, SMBFrameType, RFC1002_HEADER_SIZE};
use crate::util::hex_dump::dump_smb_message;

const DISCARD_CHUNK: usize = 4096;

/// What one call to [`SMBFrameReader::read_frame`] received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SMBFrame {
    KeepAlive,
    /// A frame of an unknown type, skipped.
    Ignored(u8),
    /// A session message whose PDU of this many bytes now sits in the
    /// active request buffer after the transport header.
    Request(usize),
}

/// Reads RFC1002 frames from a transport into a connection's request buffers.
#[derive(Debug)]
pub struct SMBFrameReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> SMBFrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads the next frame. Returns `Ok(None)` once the peer has closed the
    /// transport between frames.
    ///
    /// The PDU is read into the small buffer first; when the announced
    /// length does not fit, the buffers are resized and the rest is read
    /// into the buffer picked for it.
    pub async fn read_frame(&mut self, buffers: &mut SMBRequestBuffers) -> SMBResult<Option<SMBFrame>> {
        buffers.finish_request()?;
        let mut header = [0u8; RFC1002_HEADER_SIZE];
        match self.reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(SMBError::io_error(e)),
        }
        let length = rfc1002_length(&header)?;
        let frame_type = SMBFrameType::from(header[0]);
        if frame_type != SMBFrameType::SessionMessage {
            trace!(?frame_type, length, "skipping non-session frame");
            self.skip(length).await?;
            return Ok(Some(match frame_type {
                SMBFrameType::KeepAlive => SMBFrame::KeepAlive,
                other => SMBFrame::Ignored(other.into()),
            }));
        }

        buffers.append(&header)?;
        let first = length.min(buffers.active().len() - RFC1002_HEADER_SIZE);
        self.read_into(buffers, first).await?;
        if first < length {
            let sizing = buffers.size_request(length)?;
            debug!(length, ?sizing, "request outgrew the small buffer");
            self.read_into(buffers, length - first).await?;
        }
        dump_smb_message(&buffers.received()[RFC1002_HEADER_SIZE..]);
        Ok(Some(SMBFrame::Request(length)))
    }

    async fn read_into(&mut self, buffers: &mut SMBRequestBuffers, count: usize) -> SMBResult<()> {
        let start = buffers.total_read();
        let end = start + count;
        let capacity = buffers.active().len();
        let Some(target) = buffers.active_mut().get_mut(start..end) else {
            return Err(SMBError::buffer_overflow(end, capacity));
        };
        self.reader.read_exact(target).await.map_err(SMBError::io_error)?;
        buffers.set_total_read(end)
    }

    async fn skip(&mut self, mut remaining: usize) -> SMBResult<()> {
        let mut discard = BytesMut::zeroed(remaining.min(DISCARD_CHUNK));
        while remaining > 0 {
            let chunk = remaining.min(discard.len());
            self.reader.read_exact(&mut discard[..chunk]).await.map_err(SMBError::io_error)?;
            remaining -= chunk;
        }
        Ok(())
    }
}
