//! Close status codes (RFC 6455 section 7.4).

use std::fmt;

use self::CloseCode::*;

/// Maximum length, in bytes, of the reason carried by a close frame.
///
/// A control frame payload is at most 125 bytes and two of them hold the status code.
pub const MAX_REASON_LEN: usize = 123;

/// Status codes representing the reasons why an endpoint is closing the WebSocket connection.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum CloseCode {
    /// Normal closure, the purpose for which the connection was established has been fulfilled.
    Normal,
    /// The endpoint is going away, such as a server shutting down or a browser leaving a page.
    Away,
    /// The endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// The endpoint received a type of data it cannot accept.
    Unsupported,
    /// No status code was present in the close frame.
    ///
    /// Never sent on the wire; reported when the peer closes with an empty payload.
    Status,
    /// The connection was closed without a close frame.
    ///
    /// Never sent on the wire.
    Abnormal,
    /// The message data was inconsistent with its type, e.g. non-UTF-8 data in a text message.
    Invalid,
    /// The endpoint received a message that violates its policy.
    Policy,
    /// The message is too big to process.
    Size,
    /// The client expected the server to negotiate an extension it did not.
    Extension,
    /// The server hit an unexpected condition.
    Error,
    /// The server is restarting.
    Restart,
    /// The server is overloaded, try again later.
    Again,
    /// The TLS handshake failed. Never sent on the wire.
    Tls,
    /// Unassigned codes in the 1000-2999 range.
    Reserved(u16),
    /// Codes registered with IANA, 3000-3999.
    Iana(u16),
    /// Codes for private use by applications, 4000-4999.
    Library(u16),
    /// Codes outside of the ranges defined by RFC 6455.
    Bad(u16),
}

impl CloseCode {
    /// Checks if this code may appear in a close frame.
    ///
    /// A code is allowed when it lies in `1000..5000` and is either at least 3000, or one of
    /// the codes RFC 6455 defines for use on the wire below 3000. `1005`, `1006` and `1015`
    /// describe local conditions and are never allowed.
    pub fn is_allowed(self) -> bool {
        matches!(
            self,
            Normal
                | Away
                | Protocol
                | Unsupported
                | Invalid
                | Policy
                | Size
                | Extension
                | Error
                | Iana(_)
                | Library(_)
        )
    }

    /// Checks if this code may be sent in a close frame of ours.
    ///
    /// Looser than [`CloseCode::is_allowed`]: any code in `1000..5000` may be sent except `1006`
    /// and `1015`, so `1012`, `1013` and the unassigned codes go through.
    pub fn is_sendable(self) -> bool {
        !matches!(self, Abnormal | Tls | Bad(_))
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => Normal,
            1001 => Away,
            1002 => Protocol,
            1003 => Unsupported,
            1005 => Status,
            1006 => Abnormal,
            1007 => Invalid,
            1008 => Policy,
            1009 => Size,
            1010 => Extension,
            1011 => Error,
            1012 => Restart,
            1013 => Again,
            1015 => Tls,
            1000..=2999 => Reserved(code),
            3000..=3999 => Iana(code),
            4000..=4999 => Library(code),
            _ => Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            Normal => 1000,
            Away => 1001,
            Protocol => 1002,
            Unsupported => 1003,
            Status => 1005,
            Abnormal => 1006,
            Invalid => 1007,
            Policy => 1008,
            Size => 1009,
            Extension => 1010,
            Error => 1011,
            Restart => 1012,
            Again => 1013,
            Tls => 1015,
            Reserved(code) | Iana(code) | Library(code) | Bad(code) => code,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// Status and description of a received close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// The status code sent by the peer, [`CloseCode::Status`] if the frame was empty.
    pub code: CloseCode,
    /// The UTF-8 reason sent by the peer, possibly empty.
    pub reason: String,
}

/// Builds the payload of an outgoing close frame.
///
/// [`CloseCode::Status`] stands for the absence of a code and gives an empty payload, like `None`.
/// Fails without touching anything if the code can't be sent, if the reason is longer than
/// [`MAX_REASON_LEN`] bytes, or if a reason is given without a code.
pub(crate) fn close_payload(code: Option<CloseCode>, reason: &str) -> crate::Result<Vec<u8>> {
    if reason.len() > MAX_REASON_LEN {
        return Err(crate::WebSocketError::InvalidCloseReason);
    }

    let Some(code) = code.filter(|&code| code != Status) else {
        if !reason.is_empty() {
            return Err(crate::WebSocketError::InvalidCloseReason);
        }
        return Ok(Vec::new());
    };

    if !code.is_sendable() {
        return Err(crate::WebSocketError::InvalidCloseStatus(code.into()));
    }

    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&u16::from(code).to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WebSocketError;

    #[test]
    fn test_close_code_validity() {
        assert!(!CloseCode::from(0).is_allowed());
        assert!(!CloseCode::from(999).is_allowed());
        assert!(CloseCode::from(1000).is_allowed());
        assert!(CloseCode::from(1001).is_allowed());
        assert!(CloseCode::from(1002).is_allowed());
        assert!(CloseCode::from(1003).is_allowed());
        assert!(!CloseCode::from(1004).is_allowed());
        assert!(!CloseCode::from(1005).is_allowed());
        assert!(!CloseCode::from(1006).is_allowed());
        assert!(CloseCode::from(1007).is_allowed());
        assert!(CloseCode::from(1011).is_allowed());
        assert!(!CloseCode::from(1012).is_allowed());
        assert!(!CloseCode::from(1015).is_allowed());
        assert!(!CloseCode::from(2999).is_allowed());
        assert!(CloseCode::from(3000).is_allowed());
        assert!(CloseCode::from(4999).is_allowed());
        assert!(!CloseCode::from(5000).is_allowed());
        assert!(!CloseCode::from(u16::MAX).is_allowed());
    }

    #[test]
    fn test_close_code_conversion() {
        for code in [1000u16, 1001, 1005, 1006, 1012, 1015, 1016, 2500, 3000, 4000, 5000] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
        assert_eq!(CloseCode::from(1004), CloseCode::Reserved(1004));
        assert_eq!(CloseCode::from(3001), CloseCode::Iana(3001));
        assert_eq!(CloseCode::from(4001), CloseCode::Library(4001));
        assert_eq!(CloseCode::from(999), CloseCode::Bad(999));
    }

    #[test]
    fn test_close_payload() {
        let payload = close_payload(Some(CloseCode::Normal), "bye").unwrap();
        assert_eq!(payload, [0x03, 0xe8, b'b', b'y', b'e']);

        let payload = close_payload(None, "").unwrap();
        assert!(payload.is_empty());

        let payload = close_payload(Some(CloseCode::Status), "").unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_close_payload_sendable_codes() {
        for (code, bytes) in [
            (CloseCode::Restart, [0x03, 0xf4]),
            (CloseCode::Again, [0x03, 0xf5]),
            (CloseCode::from(1004), [0x03, 0xec]),
            (CloseCode::from(2999), [0x0b, 0xb7]),
            (CloseCode::from(4999), [0x13, 0x87]),
        ] {
            assert!(code.is_sendable(), "{code}");
            assert_eq!(close_payload(Some(code), "").unwrap(), bytes);
        }

        // a peer sending them is still failed
        assert!(!CloseCode::Restart.is_allowed());
        assert!(!CloseCode::from(1004).is_allowed());
    }

    #[test]
    fn test_close_payload_rejects_invalid_arguments() {
        assert!(matches!(
            close_payload(Some(CloseCode::Abnormal), ""),
            Err(WebSocketError::InvalidCloseStatus(1006))
        ));
        assert!(matches!(
            close_payload(Some(CloseCode::Tls), ""),
            Err(WebSocketError::InvalidCloseStatus(1015))
        ));
        assert!(matches!(
            close_payload(Some(CloseCode::from(999)), ""),
            Err(WebSocketError::InvalidCloseStatus(999))
        ));
        assert!(matches!(
            close_payload(Some(CloseCode::from(5000)), ""),
            Err(WebSocketError::InvalidCloseStatus(5000))
        ));
        assert!(matches!(
            close_payload(None, "reason"),
            Err(WebSocketError::InvalidCloseReason)
        ));
        assert!(matches!(
            close_payload(Some(CloseCode::Status), "reason"),
            Err(WebSocketError::InvalidCloseReason)
        ));

        let long = "x".repeat(MAX_REASON_LEN + 1);
        assert!(matches!(
            close_payload(Some(CloseCode::Normal), &long),
            Err(WebSocketError::InvalidCloseReason)
        ));
        let longest = "x".repeat(MAX_REASON_LEN);
        assert!(close_payload(Some(CloseCode::Normal), &longest).is_ok());
    }
}
