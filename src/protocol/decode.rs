//! Protocol message decoding

use super::constants::{auth, tags};
use super::message::{
    AuthenticationMessage, BackendMessage, CopyResponse, ErrorFields, FieldDescription,
};
use bytes::{Bytes, BytesMut};
use std::io;

/// Maximum message length (1 GB), matching PostgreSQL's own `PQ_LARGE_MESSAGE_LIMIT`.
///
/// Any message whose length field exceeds this value is rejected before allocation.
const MAX_MESSAGE_LENGTH: usize = 1_073_741_824;

/// Decode one backend message from the front of `data`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete message,
/// `Ok(Some((msg, consumed)))` otherwise. The caller advances the buffer by
/// `consumed` bytes.
pub fn decode_message(data: &mut BytesMut) -> io::Result<Option<(BackendMessage, usize)>> {
    if data.len() < 5 {
        return Ok(None);
    }

    let tag = data[0];
    let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    if len < 4 {
        return Err(invalid(format!("message length {} is below minimum", len)));
    }
    let len = len as usize;

    if len > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }

    if data.len() < len + 1 {
        return Ok(None);
    }

    let mut body = Reader::new(&data[5..len + 1]);

    let msg = match tag {
        tags::AUTHENTICATION => decode_authentication(&mut body)?,
        tags::BACKEND_KEY_DATA => BackendMessage::BackendKeyData {
            process_id: body.i32("process id")?,
            secret_key: body.i32("secret key")?,
        },
        tags::COMMAND_COMPLETE => BackendMessage::CommandComplete(body.cstr("command tag")?),
        tags::COPY_IN_RESPONSE => BackendMessage::CopyInResponse(decode_copy_response(&mut body)?),
        tags::COPY_OUT_RESPONSE => {
            BackendMessage::CopyOutResponse(decode_copy_response(&mut body)?)
        }
        tags::COPY_BOTH_RESPONSE => {
            BackendMessage::CopyBothResponse(decode_copy_response(&mut body)?)
        }
        tags::COPY_DATA => BackendMessage::CopyData(Bytes::copy_from_slice(body.rest())),
        tags::COPY_DONE => BackendMessage::CopyDone,
        tags::DATA_ROW => decode_data_row(&mut body)?,
        tags::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(&mut body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(&mut body)?),
        tags::PARAMETER_STATUS => BackendMessage::ParameterStatus {
            name: body.cstr("parameter name")?,
            value: body.cstr("parameter value")?,
        },
        tags::READY_FOR_QUERY => BackendMessage::ReadyForQuery {
            status: body.u8("status byte")?,
        },
        tags::ROW_DESCRIPTION => decode_row_description(&mut body)?,
        _ => return Err(invalid(format!("unknown message tag: {}", tag))),
    };

    Ok(Some((msg, len + 1)))
}

/// Bounds-checked cursor over a message body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> io::Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> io::Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn i16(&mut self, what: &str) -> io::Result<i16> {
        let b = self.take(2, what)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self, what: &str) -> io::Result<i32> {
        let b = self.take(4, what)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self, what: &str) -> io::Result<String> {
        let remaining = &self.data[self.pos..];
        let end = remaining
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid(format!("missing null terminator in {}", what)))?;
        let s = String::from_utf8_lossy(&remaining[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn decode_authentication(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let auth_type = body.i32("auth type")?;

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => {
            let mut salt = [0u8; 4];
            salt.copy_from_slice(body.take(4, "salt data")?);
            AuthenticationMessage::Md5Password { salt }
        }
        auth::SASL => {
            let mut mechanisms = Vec::new();
            while !body.is_empty() {
                let mechanism = body.cstr("SASL mechanism")?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            AuthenticationMessage::Sasl { mechanisms }
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: body.rest().to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: body.rest().to_vec(),
        },
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported auth type: {}", auth_type),
            ))
        }
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_copy_response(body: &mut Reader<'_>) -> io::Result<CopyResponse> {
    let format = body.u8("copy format")? as i8;
    let columns = body.i16("copy column count")?.max(0) as usize;
    let mut column_formats = Vec::with_capacity(columns);
    for _ in 0..columns {
        column_formats.push(body.i16("copy column format")?);
    }
    Ok(CopyResponse {
        format,
        column_formats,
    })
}

fn decode_data_row(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let field_count = body.i16("field count")?.max(0) as usize;
    let mut fields = Vec::with_capacity(field_count);

    for _ in 0..field_count {
        let field_len = body.i32("field length")?;
        let field = if field_len < 0 {
            None
        } else {
            let bytes = body.take(field_len as usize, "field data")?;
            Some(Bytes::copy_from_slice(bytes))
        };
        fields.push(field);
    }

    Ok(BackendMessage::DataRow(fields))
}

fn decode_error_fields(body: &mut Reader<'_>) -> io::Result<ErrorFields> {
    let mut fields = ErrorFields::default();

    while !body.is_empty() {
        let field_type = body.u8("error field type")?;
        if field_type == 0 {
            break;
        }
        let value = body.cstr("error field")?;

        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            b'P' => fields.position = Some(value),
            _ => {}
        }
    }

    Ok(fields)
}

fn decode_row_description(body: &mut Reader<'_>) -> io::Result<BackendMessage> {
    let field_count = body.i16("field count")?.max(0) as usize;
    let mut fields = Vec::with_capacity(field_count);

    for _ in 0..field_count {
        fields.push(FieldDescription {
            name: body.cstr("field name")?,
            table_oid: body.i32("table oid")?,
            column_attr: body.i16("column attribute")?,
            type_oid: body.i32("type oid")? as u32,
            type_size: body.i16("type size")?,
            type_modifier: body.i32("type modifier")?,
            format_code: body.i16("format code")?,
        });
    }

    Ok(BackendMessage::RowDescription(fields))
}
