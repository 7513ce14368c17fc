//! Text decoder backed by a HuggingFace `tokenizers` pipeline.
//!
//! Loads either a full `tokenizer.json` or a bare `vocab.json` token map. A bare map is
//! wrapped in a byte-level BPE model with no merges, which is all decoding needs. Special
//! tokens are skipped on decode.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde_json::json;
use tokenizers::Tokenizer;

use crate::error::{DecodeError, Result};
use crate::tokenizer::TextDecoder;

/// Special token ids of the default vocabulary.
pub const BOS_ID: u32 = 0;
pub const PAD_ID: u32 = 1;
pub const EOS_ID: u32 = 2;
pub const UNK_ID: u32 = 3;

const DEFAULT_SPECIAL_TOKENS: [&str; 4] = ["<s>", "<pad>", "</s>", "<unk>"];

#[derive(Debug, Clone)]
pub struct VocabDecoder {
    tokenizer: Tokenizer,
}

impl VocabDecoder {
    #[must_use]
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    /// Load a `tokenizer.json` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a tokenizer definition.
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| DecodeError::Tokenizer(format!("load {}: {e}", path.display())))?;
        Ok(Self::new(tokenizer))
    }

    /// Parse a `tokenizer.json` document.
    ///
    /// # Errors
    /// Returns an error if the JSON is not a tokenizer definition.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let tokenizer =
            Tokenizer::from_str(json).map_err(|e| DecodeError::Tokenizer(e.to_string()))?;
        Ok(Self::new(tokenizer))
    }

    /// Byte-level BPE decoder over a `token -> id` map.
    ///
    /// `<s>`, `<pad>`, `</s>` and `<unk>` are registered as special tokens if present.
    ///
    /// # Errors
    /// Returns an error if the tokenizer rejects the vocabulary.
    pub fn from_vocab(ids: &HashMap<String, u32>) -> Result<Self> {
        let added = DEFAULT_SPECIAL_TOKENS
            .iter()
            .filter_map(|&content| {
                ids.get(content).map(|&id| {
                    json!({
                        "id": id,
                        "content": content,
                        "single_word": false,
                        "lstrip": false,
                        "rstrip": false,
                        "normalized": false,
                        "special": true,
                    })
                })
            })
            .collect::<Vec<_>>();
        let byte_level = json!({
            "type": "ByteLevel",
            "add_prefix_space": false,
            "trim_offsets": true,
            "use_regex": true,
        });
        let definition = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added,
            "normalizer": null,
            "pre_tokenizer": byte_level,
            "post_processor": null,
            "decoder": byte_level,
            "model": {
                "type": "BPE",
                "dropout": null,
                "unk_token": null,
                "continuing_subword_prefix": null,
                "end_of_word_suffix": null,
                "fuse_unk": false,
                "byte_fallback": false,
                "vocab": ids,
                "merges": [],
            },
        });
        Self::from_json_str(&definition.to_string())
    }

    /// Read a `vocab.json` token map.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not a string-to-integer map, or is
    /// rejected by the tokenizer.
    pub fn from_vocab_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let ids: HashMap<String, u32> = serde_json::from_str(&raw)?;
        Self::from_vocab(&ids)
    }

    #[must_use]
    pub fn token_id(&self, piece: &str) -> Option<u32> {
        self.tokenizer.token_to_id(piece)
    }

    #[must_use]
    pub fn piece(&self, token_id: u32) -> Option<String> {
        self.tokenizer.id_to_token(token_id)
    }

    /// Vocabulary size including added tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    #[must_use]
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

impl TextDecoder for VocabDecoder {
    fn decode(&self, token_ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(token_ids, true)
            .map_err(|e| DecodeError::Tokenizer(e.to_string()))
    }
}
