#![cfg(feature = "async")]

mod common;

use bytes::{BufMut, BytesMut};

use smb_connection::protocol::dialect::SMBProtocol;
use smb_connection::protocol::negotiate::SMB2_PROTOCOL_ID;
use smb_connection::server::{SMBRequestSizing, SMBServer};
use smb_connection::socket::frame::{check_smb_message, RFC1002_HEADER_SIZE};
use smb_connection::socket::reader::{SMBFrame, SMBFrameReader};

use common::test_config;

fn framed(pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::new();
    frame.put_u32(pdu.len() as u32);
    frame.put_slice(pdu);
    frame
}

fn smb2_negotiate(dialects: &[u16], padding: usize) -> BytesMut {
    let mut pdu = BytesMut::new();
    pdu.put_slice(&SMB2_PROTOCOL_ID);
    pdu.put_u16_le(64);
    pdu.put_bytes(0, 58);
    pdu.put_u16_le(36);
    pdu.put_u16_le(dialects.len() as u16);
    pdu.put_bytes(0, 32);
    for dialect in dialects {
        pdu.put_u16_le(*dialect);
    }
    pdu.put_bytes(0, padding);
    pdu
}

#[tokio::test]
async fn negotiates_from_a_framed_stream() {
    let server = SMBServer::new(test_config());
    let mut connection = server.accept("client").unwrap();
    let mut stream = BytesMut::new();
    stream.put_slice(&[0x85, 0, 0, 0]);
    stream.extend_from_slice(&framed(&smb2_negotiate(&[0x0202, 0x0300], 0)));
    let mut reader = SMBFrameReader::new(&stream[..]);

    let frame = reader.read_frame(connection.request_buffers_mut()).await.unwrap();
    assert_eq!(frame, Some(SMBFrame::KeepAlive));

    let frame = reader.read_frame(connection.request_buffers_mut()).await.unwrap();
    let Some(SMBFrame::Request(length)) = frame else {
        panic!("expected a request, got {:?}", frame);
    };
    assert_eq!(connection.request_buffers().sizing(), SMBRequestSizing::Large);
    let pdu = connection.request_buffers().received()[RFC1002_HEADER_SIZE..].to_vec();
    assert_eq!(pdu.len(), length);
    assert!(check_smb_message(&pdu));
    assert_eq!(connection.negotiate(&pdu).unwrap().protocol, SMBProtocol::SMB3_00);

    assert_eq!(reader.read_frame(connection.request_buffers_mut()).await.unwrap(), None);
}

#[tokio::test]
async fn oversized_frames_use_and_return_the_oversized_buffer() {
    let server = SMBServer::new(test_config());
    let mut connection = server.accept("client").unwrap();
    let stream = framed(&smb2_negotiate(&[0x0210], 600));
    let mut reader = SMBFrameReader::new(&stream[..]);

    let frame = reader.read_frame(connection.request_buffers_mut()).await.unwrap();
    assert!(matches!(frame, Some(SMBFrame::Request(_))));
    assert_eq!(connection.request_buffers().sizing(), SMBRequestSizing::Oversized);
    assert_eq!(server.pools().oversized_request.outstanding().unwrap(), 1);

    assert_eq!(reader.read_frame(connection.request_buffers_mut()).await.unwrap(), None);
    assert_eq!(server.pools().oversized_request.outstanding().unwrap(), 0);
}
