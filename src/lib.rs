#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod inference;
pub mod tokenizer;
pub mod trace;
pub mod vision;

pub use error::{DecodeError, Result};
