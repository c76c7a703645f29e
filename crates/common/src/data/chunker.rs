//! Chunk builder: one tokenized document → fixed-length token-id chunks.

use crate::tokenizer::SpecialIds;

/// Split one document's tokens into chunks of exactly `seqlen` ids.
///
/// Every chunk starts with the begin marker and ends with the end marker; a
/// full chunk carries `seqlen - 2` content tokens. The final chunk is
/// right-padded, and the end marker overwrites the last slot so even a fully
/// padded chunk terminates with it. A document with zero tokens still yields
/// one chunk of `[begin, pad.., end]`.
///
/// Panics if `seqlen < 3`: a chunk must fit both markers and one token.
pub fn split_into_chunks(tokens: &[u32], seqlen: usize, specials: &SpecialIds) -> Vec<Vec<u32>> {
    assert!(seqlen >= 3, "seqlen must be at least 3, got {seqlen}");

    let mut chunks = Vec::with_capacity(1 + tokens.len() / (seqlen - 2));
    let mut current = Vec::with_capacity(seqlen);
    current.push(specials.bos);
    for &token in tokens {
        // Full before the end marker would fit: close this chunk and open
        // the next one for the pending token.
        if current.len() == seqlen - 1 {
            current.push(specials.eos);
            chunks.push(current);
            current = Vec::with_capacity(seqlen);
            current.push(specials.bos);
        }
        current.push(token);
    }
    current.resize(seqlen, specials.pad);
    current[seqlen - 1] = specials.eos;
    chunks.push(current);
    chunks
}
