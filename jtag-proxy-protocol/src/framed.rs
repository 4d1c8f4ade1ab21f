//! [`tokio_util::codec`] support for bridges that serve the proxy protocol asynchronously.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::ReadError,
    protocol::{ControlBytes, Request, RequestHeader},
};

/// Splits an incoming byte stream into complete [`Request`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestCodec;

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, ReadError> {
        let Some(raw) = src.first_chunk::<{ RequestHeader::LEN }>() else {
            src.reserve(RequestHeader::LEN - src.len());
            return Ok(None);
        };
        let header = RequestHeader::from_bytes(raw)?;
        let total = RequestHeader::LEN + header.payload_len();
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(RequestHeader::LEN);
        let payload = src.split_to(header.payload_len());
        Ok(Some(match header {
            RequestHeader::Scan { capture, .. } => Request::Scan {
                capture,
                control: ControlBytes::from_raw(payload.to_vec().into_boxed_slice()),
            },
            RequestHeader::ChipReset { active } => Request::ChipReset { active },
        }))
    }
}

impl Encoder<Request> for RequestCodec {
    type Error = ReadError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), ReadError> {
        let header = item.header();
        dst.reserve(RequestHeader::LEN + header.payload_len());
        dst.put_slice(&header.to_bytes());
        if let Request::Scan { control, .. } = &item {
            dst.put_slice(control.as_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::ControlLine;

    #[test]
    fn decode_waits_for_complete_request() {
        let control = ControlBytes::encode(Some(&[0x0f]), 6, false, ControlLine::Tdi).unwrap();
        let mut wire = BytesMut::new();
        RequestCodec
            .encode(
                Request::Scan {
                    capture: true,
                    control: control.clone(),
                },
                &mut wire,
            )
            .unwrap();
        RequestCodec
            .encode(Request::ChipReset { active: true }, &mut wire)
            .unwrap();

        let mut src = BytesMut::new();
        src.extend_from_slice(&wire[..5]);
        assert!(RequestCodec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&wire[5..RequestHeader::LEN + 3]);
        assert!(RequestCodec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&wire[RequestHeader::LEN + 3..]);

        assert_eq!(
            RequestCodec.decode(&mut src).unwrap(),
            Some(Request::Scan {
                capture: true,
                control
            })
        );
        assert_eq!(
            RequestCodec.decode(&mut src).unwrap(),
            Some(Request::ChipReset { active: true })
        );
        assert!(src.is_empty());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut src = BytesMut::from(&[9_u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0][..]);
        assert!(matches!(
            RequestCodec.decode(&mut src),
            Err(ReadError::InvalidRequestType(9))
        ));
    }
}
