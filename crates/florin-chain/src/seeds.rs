//! Fixed seed nodes.
//!
//! Embedded bootstrap peers, generated from the seed lists: one
//! 16-byte IPv6 address per record, with IPv4 seeds in the
//! IPv4-mapped form. The table carries no ports; every seed listens on
//! the network's default port.

/// Fixed seeds for mainnet.
#[rustfmt::skip]
pub const CHAINPARAMS_SEED_MAIN: &[u8] = &[
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xff,0xff,0xb2,0xee,0xe6,0xcb,
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xff,0xff,0xa7,0x56,0x75,0x67,
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xff,0xff,0xa7,0x56,0x75,0x90,
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xff,0xff,0xa7,0x56,0x75,0x8f,
    0x2a,0x02,0xc2,0x05,0x00,0x00,0x15,0x03,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x01,
    0x2a,0x02,0xc2,0x07,0x20,0x56,0x65,0x32,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x01,
    0x2a,0x02,0xc2,0x07,0x20,0x56,0x65,0x34,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x01,
    0x2a,0x02,0xc2,0x07,0x20,0x56,0x65,0x33,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x01,
];

/// Fixed seeds for testnet; the same operators run both networks.
#[rustfmt::skip]
pub const CHAINPARAMS_SEED_TEST: &[u8] = &[
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xff,0xff,0xb2,0xee,0xe6,0xcb,
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xff,0xff,0xa7,0x56,0x75,0x67,
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xff,0xff,0xa7,0x56,0x75,0x90,
    0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0xff,0xff,0xa7,0x56,0x75,0x8f,
    0x2a,0x02,0xc2,0x05,0x00,0x00,0x15,0x03,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x01,
    0x2a,0x02,0xc2,0x07,0x20,0x56,0x65,0x32,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x01,
    0x2a,0x02,0xc2,0x07,0x20,0x56,0x65,0x34,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x01,
    0x2a,0x02,0xc2,0x07,0x20,0x56,0x65,0x33,0x00,0x00,0x00,0x00,0x00,0x00,0x00,0x01,
];

/// IPv4-mapped IPv6 prefix.
const V4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

/// Decode an embedded seed table into `host:port` strings. A trailing
/// partial record is dropped.
pub fn decode_seeds(data: &[u8], port: u16) -> Vec<String> {
    data.chunks_exact(16)
        .map(|record| {
            if record[..12] == V4_MAPPED_PREFIX {
                format!(
                    "{}.{}.{}.{}:{}",
                    record[12], record[13], record[14], record[15], port
                )
            } else {
                let groups: Vec<String> = record
                    .chunks(2)
                    .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
                    .collect();
                format!("[{}]:{}", groups.join(":"), port)
            }
        })
        .collect()
}
