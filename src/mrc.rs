//! Minimal MRC2014 header reading, enough to recover the sampling rate.
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const HEADER_BYTES: usize = 1024;

const MX_OFFSET: usize = 28;
const CELLA_X_OFFSET: usize = 40;
const MACHST_OFFSET: usize = 212;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

/// Sampling rate along x: `cella.x / mx`.
pub fn read_sampling_rate(path: &Path) -> Result<f64> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut header = [0u8; HEADER_BYTES];
    file.read_exact(&mut header)
        .with_context(|| format!("read MRC header from {}", path.display()))?;
    sampling_rate_from_header(&header)
}

pub(crate) fn sampling_rate_from_header(header: &[u8; HEADER_BYTES]) -> Result<f64> {
    let order = byte_order(header);
    let mx = read_i32(header, MX_OFFSET, order);
    let cella_x = read_f32(header, CELLA_X_OFFSET, order);
    if mx <= 0 {
        return Err(anyhow!("MRC header has non-positive mx ({mx})"));
    }
    let rate = f64::from(cella_x) / f64::from(mx);
    if !rate.is_finite() || rate <= 0.0 {
        return Err(anyhow!("MRC header yields invalid sampling rate {rate}"));
    }
    Ok(rate)
}

// Machine stamp 0x44 0x44 (or 0x44 0x41) is little-endian, 0x11 0x11 big-endian.
// Files with a zeroed stamp are treated as little-endian.
fn byte_order(header: &[u8; HEADER_BYTES]) -> ByteOrder {
    match header[MACHST_OFFSET] {
        0x11 => ByteOrder::Big,
        _ => ByteOrder::Little,
    }
}

fn word(header: &[u8; HEADER_BYTES], offset: usize) -> [u8; 4] {
    [
        header[offset],
        header[offset + 1],
        header[offset + 2],
        header[offset + 3],
    ]
}

fn read_i32(header: &[u8; HEADER_BYTES], offset: usize, order: ByteOrder) -> i32 {
    let bytes = word(header, offset);
    match order {
        ByteOrder::Little => i32::from_le_bytes(bytes),
        ByteOrder::Big => i32::from_be_bytes(bytes),
    }
}

fn read_f32(header: &[u8; HEADER_BYTES], offset: usize, order: ByteOrder) -> f32 {
    let bytes = word(header, offset);
    match order {
        ByteOrder::Little => f32::from_le_bytes(bytes),
        ByteOrder::Big => f32::from_be_bytes(bytes),
    }
}
