//! Text codec between host strings and UTF-8 bytes in linear memory.
//!
//! ## Encoding
//!
//! Host text is measured the way the reference host measures it, in UTF-16
//! code units. Staging first allocates one byte per unit and copies the
//! ASCII prefix directly. At the first non-ASCII character the region is
//! reallocated to the worst case of three bytes per remaining unit, the tail
//! is written, and the region is shrunk to the bytes actually used.
//!
//! ## Decoding
//!
//! Decoding is strict: invalid UTF-8 is an error, never replaced. A decoder
//! is retired once the cumulative bytes passed through it would exceed the
//! configured ceiling, and the replacement is installed before the decode
//! that would cross it.

use super::alloc::AllocationShim;
use super::memory::{LinearMemory, PtrLen};
use crate::error::{BridgeError, Result};

/// Strict UTF-8 decoder instance.
#[derive(Debug, Clone)]
pub struct Utf8Decoder {
    id: u64,
    bytes_seen: u64,
}

impl Utf8Decoder {
    fn new(id: u64) -> Self {
        Self { id, bytes_seen: 0 }
    }

    /// Sequence number of this instance; the first decoder is 0.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bytes this instance has decoded.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Decode `bytes`, rejecting anything that is not UTF-8.
    ///
    /// A leading byte-order mark is kept as U+FEFF.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<String> {
        let text = std::str::from_utf8(bytes).map_err(|e| BridgeError::Decode {
            valid_up_to: e.valid_up_to(),
            len: bytes.len(),
        })?;
        self.bytes_seen += bytes.len() as u64;
        Ok(text.to_owned())
    }
}

/// Encoder/decoder pair with the decoder rotation rule.
#[derive(Debug, Clone)]
pub struct TextCodec {
    decoder: Utf8Decoder,
    bytes_decoded: u64,
    ceiling: u64,
    rotations: u64,
}

impl TextCodec {
    /// Create a codec whose decoders are retired past `ceiling` bytes.
    pub fn new(ceiling: u64) -> Self {
        Self {
            decoder: Utf8Decoder::new(0),
            bytes_decoded: 0,
            ceiling,
            rotations: 0,
        }
    }

    /// UTF-8 encode host text.
    pub fn encode(text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    /// Decode bytes read out of linear memory.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<String> {
        let len = bytes.len() as u64;
        let pending = self.bytes_decoded.saturating_add(len);
        if pending > self.ceiling {
            self.rotate();
            self.bytes_decoded = len;
        } else {
            self.bytes_decoded = pending;
        }
        self.decoder.decode(bytes)
    }

    fn rotate(&mut self) {
        let next = self.decoder.id() + 1;
        tracing::debug!(
            retired = self.decoder.id(),
            bytes_seen = self.decoder.bytes_seen(),
            ceiling = self.ceiling,
            "replacing text decoder"
        );
        self.decoder = Utf8Decoder::new(next);
        self.rotations += 1;
    }

    /// Bytes decoded since the current decoder was installed, including the pending one.
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// How many decoders have been retired.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// The live decoder.
    pub fn decoder(&self) -> &Utf8Decoder {
        &self.decoder
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

/// Length of host text in UTF-16 code units.
fn host_units(text: &str) -> Result<u32> {
    let units = text.encode_utf16().count();
    u32::try_from(units).map_err(|_| BridgeError::AllocationFailure {
        requested: u32::MAX,
        reason: format!(
            "string of {} code units exceeds the 32-bit address space",
            units
        ),
    })
}

/// Stage `text` into guest memory, returning the region holding its UTF-8 bytes.
///
/// The caller owns the returned region and must release it through `shim`.
pub fn pass_string<M: LinearMemory + ?Sized>(
    shim: &mut AllocationShim,
    mem: &mut M,
    text: &str,
) -> Result<PtrLen> {
    if !mem.has_realloc() {
        return shim.place(mem, &TextCodec::encode(text));
    }

    let mut region = shim.reserve(mem, host_units(text)?)?;
    match write_utf8(shim, mem, &mut region, text) {
        Ok(()) => {
            shim.account(region.len);
            Ok(region)
        }
        Err(e) => {
            // `region` tracks the latest pointer even if an extension moved it.
            if let Err(release_err) = shim.release(mem, region) {
                tracing::warn!(error = %release_err, "failed to release partially staged string");
            }
            Err(e)
        }
    }
}

fn write_utf8<M: LinearMemory + ?Sized>(
    shim: &mut AllocationShim,
    mem: &mut M,
    region: &mut PtrLen,
    text: &str,
) -> Result<()> {
    let bytes = text.as_bytes();
    let ascii = bytes.iter().take_while(|b| b.is_ascii()).count();
    mem.view()?.write(region.ptr, &bytes[..ascii])?;
    if ascii == bytes.len() {
        return Ok(());
    }

    let rest = &text[ascii..];
    let offset = ascii as u32;
    let worst = host_units(rest)?
        .checked_mul(3)
        .and_then(|n| n.checked_add(offset))
        .ok_or_else(|| BridgeError::AllocationFailure {
            requested: u32::MAX,
            reason: "worst-case UTF-8 size exceeds the 32-bit address space".to_string(),
        })?;
    *region = shim.extend(mem, *region, worst)?;
    mem.view()?.write(region.ptr + offset, rest.as_bytes())?;

    let written = bytes.len() as u32;
    *region = shim.extend(mem, *region, written)?;
    Ok(())
}
