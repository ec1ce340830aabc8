//! FSP UPS wire protocol, a variant of the Megatec "QS" exchange.
//!
//! Request: the fixed 3-byte query `QS\r`.
//! Response: CR-terminated ASCII with whitespace-separated fields, e.g.
//!
//! ```text
//! (229.2 229.2 229.2 014 50.1 27.6 --.- 00001001\r   UPS online
//! (012.3 229.7 220.2 014 50.1 24.6 --.- 10001001\r   UPS offline
//! ```
//!
//! Only the last field is interpreted: one status byte followed by seven
//! binary digits. Status `'0'` means on line power, `'1'` means on battery.

use tracing::{debug, error};

/// The fixed status query sent to the UPS.
pub const REQUEST: &[u8] = b"QS\r";

/// Largest response the codec looks at: 63 data bytes plus the terminator.
pub const MAX_RESPONSE_LEN: usize = 64;

/// Number of binary digits following the status byte.
const STATUS_BITS: usize = 7;

/// Decoded UPS power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsStatus {
    /// Running on line power.
    Online,
    /// Running on battery.
    Offline,
    /// The response could not be interpreted.
    Invalid,
}

/// Decode a raw response buffer into a [`UpsStatus`].
///
/// Pure and deterministic: identical input always yields the same result.
/// Anything that does not match the expected shape decodes to
/// [`UpsStatus::Invalid`] with the cause logged.
pub fn decode_response(raw: &[u8]) -> UpsStatus {
    if raw.is_empty() {
        error!("empty response from UPS");
        return UpsStatus::Invalid;
    }

    let Some(end) = raw.iter().rposition(|&b| b == b'\r') else {
        error!("response is not CR-terminated, invalid response");
        return UpsStatus::Invalid;
    };
    let line = &raw[..end];
    debug!(response = %String::from_utf8_lossy(line), "response received");

    // UPS status is after the last space
    let Some(sep) = line.iter().rposition(|&b| b == b' ') else {
        error!("unable to find last space in response, invalid response");
        return UpsStatus::Invalid;
    };
    let status = &line[sep + 1..];
    debug!(status = %String::from_utf8_lossy(status), "status field");

    if status.len() != 1 + STATUS_BITS || !status[1..].iter().all(|&b| b == b'0' || b == b'1') {
        error!(
            status = %String::from_utf8_lossy(status),
            "malformed status field, invalid response"
        );
        return UpsStatus::Invalid;
    }

    match status[0] {
        b'0' => UpsStatus::Online,
        b'1' => UpsStatus::Offline,
        code if code.is_ascii_graphic() => {
            error!("invalid UPS status code '{}'", code as char);
            UpsStatus::Invalid
        }
        code => {
            error!("invalid UPS status code 0x{code:02X}");
            UpsStatus::Invalid
        }
    }
}
