//! Linking elements together.
//!
//! The handshake is input-driven: [`link`] resolves both pad refs, then
//! asks the input element to establish the link. The input element makes
//! one synchronous call to the output element carrying its pad info and
//! receives the output's in return, so both sides validate the full
//! mode/direction/caps table with complete information before committing.
//!
//! # Example
//!
//! ```rust,ignore
//! use weir::link::{link, finish_linking};
//!
//! link(source.address(), "output", sink.address(), "input").await?;
//! finish_linking(source.address())?;
//! finish_linking(sink.address())?;
//! ```

use crate::error::Result;
use crate::message::{ElementAddress, Endpoint, Message};
use crate::pad::PadRef;

/// Resolve a declared pad name on an element to a concrete ref.
pub async fn get_pad_ref(element: &ElementAddress, pad_name: &str) -> Result<PadRef> {
    let name = pad_name.to_string();
    element
        .call(|reply| Message::GetPadRef { name, reply })
        .await?
}

/// Link `output_pad` of `output` to `input_pad` of `input`.
///
/// Returns the refs the link was made under (useful for on-request pads,
/// whose refs are allocated here).
pub async fn link(
    output: &ElementAddress,
    output_pad: &str,
    input: &ElementAddress,
    input_pad: &str,
) -> Result<(PadRef, PadRef)> {
    let output_ref = get_pad_ref(output, output_pad).await?;
    let input_ref = get_pad_ref(input, input_pad).await?;
    link_refs(output, output_ref.clone(), input, input_ref.clone()).await?;
    Ok((output_ref, input_ref))
}

/// Link two already-resolved pad refs.
pub async fn link_refs(
    output: &ElementAddress,
    output_ref: PadRef,
    input: &ElementAddress,
    input_ref: PadRef,
) -> Result<()> {
    let other = Endpoint::new(output.clone(), output_ref);
    input
        .call(|reply| Message::Link {
            pad: input_ref,
            other,
            reply,
        })
        .await?
}

/// Tear down a link from both ends. Unlinking is idempotent, so a
/// half-dead link tears down cleanly.
pub fn unlink(
    output: &ElementAddress,
    output_ref: PadRef,
    input: &ElementAddress,
    input_ref: PadRef,
) -> Result<()> {
    let output_result = output.send(Message::Unlink { pad: output_ref });
    let input_result = input.send(Message::Unlink { pad: input_ref });
    output_result.and(input_result)
}

/// Tell an element that no more links will arrive in this batch; it may
/// now notify its behavior about on-request pads added during linking.
pub fn finish_linking(element: &ElementAddress) -> Result<()> {
    element.send(Message::LinkingFinished)
}
