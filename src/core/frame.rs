use bytes::Bytes;

/// Transport-neutral websocket frame type.
///
/// This is the wire surface of the crate: transports convert their native
/// frame representation into/from `WsFrame`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    #[inline]
    pub fn text_static(s: &'static str) -> Self {
        // &'static str is valid UTF-8 by construction.
        Self::Text(Bytes::from_static(s.as_bytes()))
    }

    #[inline]
    pub fn close(code: u16, reason: Bytes) -> Self {
        Self::Close(Some(WsCloseFrame { code, reason }))
    }
}

/// Borrow the underlying bytes from frames without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) => Some(bytes.as_ref()),
        WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(bytes) => Some(bytes.as_ref()),
        WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}

/// Convert owned bytes into a `WsFrame`, preferring text when valid UTF-8.
#[inline]
pub fn into_ws_frame<B>(bytes: B) -> WsFrame
where
    B: Into<Bytes>,
{
    let payload = bytes.into();
    if std::str::from_utf8(payload.as_ref()).is_ok() {
        WsFrame::Text(payload)
    } else {
        WsFrame::Binary(payload)
    }
}

/// Human-readable reason for the standard websocket close codes.
///
/// Unknown codes map to an empty reason.
pub fn close_reason(code: u16) -> &'static str {
    match code {
        1000 => "Normal closure",
        1001 => "Going away",
        1002 => "Protocol error",
        1003 => "Unsupported data",
        1005 => "No status received",
        1006 => "Abnormal closure",
        1007 => "Invalid frame payload data",
        1008 => "Policy violation",
        1009 => "Message too big",
        1010 => "Mandatory extension",
        1011 => "Internal server error",
        1015 => "TLS handshake",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_covers_standard_codes_and_falls_back_empty() {
        assert_eq!(close_reason(1000), "Normal closure");
        assert_eq!(close_reason(1006), "Abnormal closure");
        assert_eq!(close_reason(1015), "TLS handshake");
        assert_eq!(close_reason(1004), "");
        assert_eq!(close_reason(4000), "");
    }

    #[test]
    fn into_ws_frame_prefers_text_for_utf8() {
        assert!(matches!(into_ws_frame(b"hello".to_vec()), WsFrame::Text(_)));
        assert!(matches!(
            into_ws_frame(vec![0xff, 0xfe, 0x01]),
            WsFrame::Binary(_)
        ));
    }

    #[test]
    fn frame_bytes_skips_close_frames() {
        assert_eq!(
            frame_bytes(&WsFrame::text_static("x")),
            Some(b"x".as_slice())
        );
        assert_eq!(frame_bytes(&WsFrame::Close(None)), None);
    }
}
