//! Raw-frame decompression shared by both venue decoders.
//!
//! Huobi ships gzip-compressed binary frames; OKEx ships raw (headerless)
//! deflate. Both are decoded to a `String` of JSON text before the venue's
//! `Handler::decode` touches them.

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder};

/// Inflate a Huobi binary frame (gzip).
pub fn gunzip(bytes: &[u8]) -> anyhow::Result<String> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = String::new();
    decoder.read_to_string(&mut out)?;
    Ok(out)
}

/// Inflate an OKEx binary frame (raw deflate, no zlib/gzip header).
pub fn inflate(bytes: &[u8]) -> anyhow::Result<String> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = String::new();
    decoder.read_to_string(&mut out)?;
    Ok(out)
}
