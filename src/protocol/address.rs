//! Destination address rendering for the three SOCKS5 address types.

use std::fmt::Write;

/// Dotted-decimal form of an IPv4 address.
pub fn render_ipv4(octets: &[u8; 4]) -> String {
    format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}

/// Eight colon-separated groups of four lowercase hex digits.
///
/// Every byte is zero-padded to two digits and no `::` compression is
/// applied, so the output is always 39 characters.
pub fn render_ipv6(octets: &[u8; 16]) -> String {
    let mut out = String::with_capacity(39);
    for (i, byte) in octets.iter().enumerate() {
        if i % 2 == 0 && i > 0 {
            out.push(':');
        }
        // Writing to a String cannot fail
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Domain bytes decoded as UTF-8 (invalid sequences replaced).
pub fn render_domain(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
