pub mod vocab;

pub use vocab::{BOS_ID, EOS_ID, PAD_ID, UNK_ID, VocabDecoder};

use crate::error::Result;

/// Turns token ids back into text.
///
/// Implemented by whatever tokenizer the surrounding pipeline uses; the decoding core only
/// calls it for label and plain-text output.
pub trait TextDecoder {
    /// # Errors
    /// Returns an error if an id cannot be decoded.
    fn decode(&self, token_ids: &[u32]) -> Result<String>;
}
