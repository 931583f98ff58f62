//! Canonical report encoding
//!
//! Signatures are defined over these bytes, never over an in-memory or JSON
//! representation. Layout:
//!
//! ```text
//! "QRXR" 0x01                                  magic + version
//! 0x01 len:u64 node_id                         utf-8
//! 0x02 count:u64 (len:u64 bitstring)*          in report order
//! 0x03 bits:u64                                f64 timestamp, IEEE-754
//! 0x04 0x00 | 0x01 bits:u64                    optional biometric fidelity
//! 0x05 count:u64 (len:u64 key len:u64 value)*  metadata, ascending key order
//! ```
//!
//! All integers are big-endian. `-0.0` is folded into `0.0` and every NaN
//! into the canonical quiet NaN so equal values always encode identically.

use crate::types::report::WitnessReport;

const MAGIC: &[u8; 4] = b"QRXR";
const VERSION: u8 = 1;

const TAG_NODE_ID: u8 = 0x01;
const TAG_BITSTRINGS: u8 = 0x02;
const TAG_TIMESTAMP: u8 = 0x03;
const TAG_FIDELITY: u8 = 0x04;
const TAG_METADATA: u8 = 0x05;

/// Encode a report in canonical field order
pub fn encode_report(report: &WitnessReport) -> Vec<u8> {
    let payload: usize = report.bitstrings.iter().map(|s| s.len() + 8).sum();
    let mut out = Vec::with_capacity(64 + report.node_id.len() + payload);

    out.extend_from_slice(MAGIC);
    out.push(VERSION);

    out.push(TAG_NODE_ID);
    put_bytes(&mut out, report.node_id.as_bytes());

    out.push(TAG_BITSTRINGS);
    put_len(&mut out, report.bitstrings.len());
    for bitstring in &report.bitstrings {
        put_bytes(&mut out, bitstring.as_bytes());
    }

    out.push(TAG_TIMESTAMP);
    put_f64(&mut out, report.timestamp);

    out.push(TAG_FIDELITY);
    match report.biometric_fidelity {
        Some(fidelity) => {
            out.push(0x01);
            put_f64(&mut out, fidelity);
        }
        None => out.push(0x00),
    }

    out.push(TAG_METADATA);
    put_len(&mut out, report.metadata.len());
    for (key, value) in &report.metadata {
        put_bytes(&mut out, key.as_bytes());
        put_bytes(&mut out, value.as_bytes());
    }

    out
}

fn put_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_be_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_len(out, bytes.len());
    out.extend_from_slice(bytes);
}

fn put_f64(out: &mut Vec<u8>, value: f64) {
    out.extend_from_slice(&canonical_f64_bits(value).to_be_bytes());
}

fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}
