//! Synthetic probe packet assembly
//!
//! Probes are plain ICMP echo requests; their payload carries no
//! meaning. They only exist to give the transport's path discovery
//! early packets to act on.

use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

const IPV4_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;
const PAYLOAD: &[u8] = b"meshtun-path-probe";

/// Build an IPv4 ICMP echo request from `src` to `dst`
pub(crate) fn echo_request(src: Ipv4Addr, dst: Ipv4Addr, ident: u16) -> Vec<u8> {
    let total_len = IPV4_HEADER_LEN + ICMP_HEADER_LEN + PAYLOAD.len();
    let mut buf = BytesMut::with_capacity(total_len);

    buf.put_u8(0x45); // version 4, IHL 5
    buf.put_u8(0); // DSCP/ECN
    buf.put_u16(total_len as u16);
    buf.put_u16(ident);
    buf.put_u16(0); // flags / fragment offset
    buf.put_u8(64); // TTL
    buf.put_u8(1); // protocol: ICMP
    buf.put_u16(0); // header checksum, patched below
    buf.put_slice(&src.octets());
    buf.put_slice(&dst.octets());

    let ip_sum = internet_checksum(&buf[..IPV4_HEADER_LEN]);
    buf[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    buf.put_u8(8); // echo request
    buf.put_u8(0); // code
    buf.put_u16(0); // checksum, patched below
    buf.put_u16(ident);
    buf.put_u16(0); // sequence
    buf.put_slice(PAYLOAD);

    let icmp_sum = internet_checksum(&buf[IPV4_HEADER_LEN..]);
    buf[IPV4_HEADER_LEN + 2..IPV4_HEADER_LEN + 4].copy_from_slice(&icmp_sum.to_be_bytes());

    buf.to_vec()
}

/// RFC 1071 internet checksum
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
