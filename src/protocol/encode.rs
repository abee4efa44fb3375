//! Protocol message encoding

use super::constants::{frontend_tags, SSL_REQUEST_CODE};
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            // Startup messages don't have a type byte
            with_length(&mut buf, |buf| {
                buf.put_i32(*version);
                for (key, value) in params {
                    put_cstr(buf, key);
                    put_cstr(buf, value);
                }
                buf.put_u8(0);
            })?;
        }
        FrontendMessage::Password(password) => {
            buf.put_u8(frontend_tags::PASSWORD);
            with_length(&mut buf, |buf| put_cstr(buf, password))?;
        }
        FrontendMessage::Query(query) => {
            buf.put_u8(frontend_tags::QUERY);
            with_length(&mut buf, |buf| put_cstr(buf, query))?;
        }
        FrontendMessage::Terminate => {
            buf.put_u8(frontend_tags::TERMINATE);
            buf.put_i32(4);
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            buf.put_u8(frontend_tags::PASSWORD);
            let data_len = checked_len(data.len())?;
            with_length(&mut buf, |buf| {
                put_cstr(buf, mechanism);
                buf.put_i32(data_len);
                buf.put_slice(data);
            })?;
        }
        FrontendMessage::SaslResponse { data } => {
            buf.put_u8(frontend_tags::PASSWORD);
            with_length(&mut buf, |buf| buf.put_slice(data))?;
        }
        FrontendMessage::SslRequest => {
            buf.put_i32(8);
            buf.put_i32(SSL_REQUEST_CODE);
        }
        FrontendMessage::CopyData(data) => {
            buf.put_u8(frontend_tags::COPY_DATA);
            with_length(&mut buf, |buf| buf.put_slice(data))?;
        }
        FrontendMessage::CopyDone => {
            buf.put_u8(frontend_tags::COPY_DONE);
            buf.put_i32(4);
        }
        FrontendMessage::CopyFail(reason) => {
            buf.put_u8(frontend_tags::COPY_FAIL);
            with_length(&mut buf, |buf| put_cstr(buf, reason))?;
        }
    }

    Ok(buf)
}

/// Write a body behind a 4-byte length prefix that counts itself.
fn with_length(buf: &mut BytesMut, body: impl FnOnce(&mut BytesMut)) -> io::Result<()> {
    let len_pos = buf.len();
    buf.put_i32(0);
    body(buf);

    let len = checked_len(buf.len() - len_pos)?;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put(s.as_bytes());
    buf.put_u8(0);
}

fn checked_len(len: usize) -> io::Result<i32> {
    i32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message of {} bytes is too large to encode", len),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn declared_len(buf: &[u8]) -> i32 {
        i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]])
    }

    #[test]
    fn test_encode_query() {
        let msg = FrontendMessage::Query("SELECT 1".to_string());
        let buf = encode_message(&msg).unwrap();

        assert_eq!(buf[0], b'Q');
        assert_eq!(declared_len(&buf), (buf.len() - 1) as i32);
        assert_eq!(&buf[5..], b"SELECT 1\0");
    }

    #[test]
    fn test_encode_terminate() {
        let buf = encode_message(&FrontendMessage::Terminate).unwrap();
        assert_eq!(&buf[..], &[b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn test_encode_ssl_request() {
        let buf = encode_message(&FrontendMessage::SslRequest).unwrap();

        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x08]);
        assert_eq!(&buf[4..8], &[0x04, 0xD2, 0x16, 0x2F]);
    }

    #[test]
    fn test_encode_startup_has_no_tag() {
        let msg = FrontendMessage::Startup {
            version: crate::protocol::constants::PROTOCOL_VERSION,
            params: vec![("user".into(), "alice".into())],
        };
        let buf = encode_message(&msg).unwrap();

        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &[0, 3, 0, 0]);
        assert_eq!(&buf[8..], b"user\0alice\0\0");
    }

    #[test]
    fn test_encode_copy_data_and_done() {
        let buf = encode_message(&FrontendMessage::CopyData(Bytes::from_static(b"1\tx\n"))).unwrap();
        assert_eq!(buf[0], b'd');
        assert_eq!(declared_len(&buf), 8);
        assert_eq!(&buf[5..], b"1\tx\n");

        let buf = encode_message(&FrontendMessage::CopyDone).unwrap();
        assert_eq!(&buf[..], &[b'c', 0, 0, 0, 4]);
    }

    #[test]
    fn test_encode_copy_fail() {
        let buf = encode_message(&FrontendMessage::CopyFail("aborted".into())).unwrap();
        assert_eq!(buf[0], b'f');
        assert_eq!(&buf[5..], b"aborted\0");
    }

    #[test]
    fn test_encode_sasl_initial_response() {
        let msg = FrontendMessage::SaslInitialResponse {
            mechanism: "SCRAM-SHA-256".into(),
            data: b"n,,n=,r=abc".to_vec(),
        };
        let buf = encode_message(&msg).unwrap();

        assert_eq!(buf[0], b'p');
        assert_eq!(declared_len(&buf), (buf.len() - 1) as i32);
        let mech_end = 5 + "SCRAM-SHA-256".len();
        assert_eq!(&buf[5..mech_end], b"SCRAM-SHA-256");
        assert_eq!(buf[mech_end], 0);
        let data_len = i32::from_be_bytes([
            buf[mech_end + 1],
            buf[mech_end + 2],
            buf[mech_end + 3],
            buf[mech_end + 4],
        ]);
        assert_eq!(data_len, 11);
    }
}
