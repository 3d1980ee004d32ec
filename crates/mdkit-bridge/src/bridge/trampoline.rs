//! Entry trampolines: stage, invoke, unstage.
//!
//! Each call places its input through the allocation shim, calls one guest
//! entry point and releases the input before returning, on success and on
//! every error path. Render output is freed whether or not it decodes.

use std::time::Instant;

use super::codec::pass_string;
use super::memory::PtrLen;
use super::runtime::{read_guest_string, Bridge};
use super::table::Handle;
use super::value::StructuredValue;
use crate::error::{BridgeError, Result};

impl Bridge {
    /// Parse `text` into a structured value built by the guest.
    ///
    /// Registered extensions rewrite the input first and edit the result last.
    pub fn parse_structured(&mut self, text: &str) -> Result<StructuredValue> {
        let start = Instant::now();
        let rewritten = self.extensions.preprocess(text);
        let input = rewritten.as_deref().unwrap_or(text);

        let region = self.stage(input)?;
        let called = self
            .exports
            .parse
            .call(&mut self.store, region.to_abi())
            .map_err(BridgeError::from_guest_call);
        let released = self.release_input(region);
        let handle = Handle::from_abi(called?);
        released?;

        let mut value = self.store.data().table.resolve(handle)?;
        self.extensions.postprocess(&mut value);

        tracing::debug!(
            input_bytes = region.len,
            handle = handle.index(),
            kind = value.kind(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "parse_structured"
        );
        Ok(value)
    }

    /// Run `text` through the guest's render entry point.
    pub fn transform_text(&mut self, text: &str) -> Result<String> {
        let start = Instant::now();

        let region = self.stage(text)?;
        let called = self
            .exports
            .render
            .call(&mut self.store, region.to_abi())
            .map_err(BridgeError::from_guest_call);
        let released = self.release_input(region);
        let (ptr, len) = called?;
        released?;

        let output = PtrLen::from_abi(ptr, len);
        let decoded = read_guest_string(self.exports.memory, &mut self.store, output);
        let reclaimed = {
            let (shim, mut mem) = self.staging();
            shim.reclaim(&mut mem, output)
        };

        let text = match (decoded, reclaimed) {
            (Ok(text), Ok(())) => text,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(reclaim_err)) => {
                tracing::warn!(
                    error = %reclaim_err,
                    ptr = output.ptr,
                    len = output.len,
                    "failed to free render output after decode error"
                );
                return Err(e);
            }
        };

        tracing::debug!(
            input_bytes = region.len,
            output_bytes = output.len,
            elapsed_us = start.elapsed().as_micros() as u64,
            "transform_text"
        );
        Ok(text)
    }

    fn stage(&mut self, text: &str) -> Result<PtrLen> {
        let (shim, mut mem) = self.staging();
        pass_string(shim, &mut mem, text)
    }

    fn release_input(&mut self, region: PtrLen) -> Result<()> {
        let (shim, mut mem) = self.staging();
        shim.release(&mut mem, region)
    }
}
