use std::str::FromStr;

use anyhow::{bail, Context};

use smb_connection::protocol::dialect::SMBProtocol;
use smb_connection::server::{SMBServer, SMBServerConfigBuilder};
use smb_connection::socket::frame::{check_smb_message, rfc1002_length, SMBFrameType, RFC1002_HEADER_SIZE};
use smb_connection::util::hex_dump::hex_dump_lines;

/// Reads a capture of RFC1002 frames from a file and runs every session
/// message through the request buffers, negotiating on the first one.
///
/// Usage: `smb_inspect <capture> [min protocol] [max protocol]`
fn main() -> anyhow::Result<()> {
    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: smb_inspect <capture> [min protocol] [max protocol]");
    };
    let mut builder = SMBServerConfigBuilder::default();
    if let Some(min) = args.next() {
        builder = builder.min_protocol(SMBProtocol::from_str(&min)?);
    }
    if let Some(max) = args.next() {
        builder = builder.max_protocol(SMBProtocol::from_str(&max)?);
    }
    let server = SMBServer::new(builder.build()?);
    let mut connection = server.accept(path.as_str())?;

    let capture = std::fs::read(&path).with_context(|| format!("reading {}", path))?;
    let mut remaining = capture.as_slice();
    while remaining.len() >= RFC1002_HEADER_SIZE {
        let length = rfc1002_length(remaining)?;
        let frame_type = SMBFrameType::from(remaining[0]);
        let Some(frame) = remaining.get(..RFC1002_HEADER_SIZE + length) else {
            bail!("truncated frame: {} bytes announced, {} left", length, remaining.len() - RFC1002_HEADER_SIZE);
        };
        remaining = &remaining[frame.len()..];
        println!("frame {:?}, {} bytes", frame_type, length);
        if frame_type != SMBFrameType::SessionMessage {
            continue;
        }

        let buffers = connection.request_buffers_mut();
        buffers.finish_request()?;
        let first = frame.len().min(buffers.active().len());
        buffers.append(&frame[..first])?;
        let sizing = buffers.size_request(length)?;
        buffers.append(&frame[first..])?;
        println!("  buffered as {:?}", sizing);

        let pdu = &frame[RFC1002_HEADER_SIZE..];
        for line in hex_dump_lines(pdu) {
            println!("  {}", line);
        }
        if !check_smb_message(pdu) {
            println!("  not an SMB request");
            continue;
        }
        if connection.negotiated().is_none() {
            match connection.negotiate(pdu) {
                Ok(negotiated) => println!("  negotiated {} (dialect {:#06x})", negotiated.protocol, negotiated.dialect_id),
                Err(e) => println!("  negotiation failed: {}", e),
            }
        }
    }
    if !remaining.is_empty() {
        println!("{} trailing bytes ignored", remaining.len());
    }
    Ok(())
}
