//! Coordinate tokens and their mapping to pixel space.

use serde::Serialize;

use crate::tokenizer::VocabDecoder;

/// Default number of coordinate bins per axis.
pub const DEFAULT_LOCATION_BINS: u32 = 1000;

/// Geometry a grounding task emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateShape {
    /// Two corner points (4 numbers)
    Rectangle,
    /// Four corner points (8 numbers)
    Quadrangle,
    /// Any number of (x, y) vertices
    Polygon,
}

impl CoordinateShape {
    /// Numbers per shape, or `None` for variable-length polygons.
    #[must_use]
    pub fn group_size(self) -> Option<usize> {
        match self {
            Self::Rectangle => Some(4),
            Self::Quadrangle => Some(8),
            Self::Polygon => None,
        }
    }
}

/// Resolves token ids to coordinate bins.
pub trait CoordinateLookup {
    /// Bin index for a coordinate token, `None` for any other token.
    fn coordinate_bin(&self, token_id: u32) -> Option<u32>;
}

/// Maps coordinate bins to source-image pixels.
pub trait CoordinateScaler {
    fn scale_x(&self, bin: u32) -> f32;
    fn scale_y(&self, bin: u32) -> f32;
}

/// Coordinate tokens occupying a contiguous id range (`<loc_0>` .. `<loc_{bins-1}>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationTokens {
    pub first_id: u32,
    pub bins: u32,
}

impl LocationTokens {
    #[must_use]
    pub fn new(first_id: u32, bins: u32) -> Self {
        Self { first_id, bins }
    }

    /// Find the `<loc_N>` range in a vocabulary.
    ///
    /// Returns `None` if `<loc_0>` is missing or the ids are not contiguous.
    #[must_use]
    pub fn from_vocab(vocab: &VocabDecoder) -> Option<Self> {
        let first_id = vocab.token_id("<loc_0>")?;
        let mut bins = 1_u32;
        while let Some(id) = vocab.token_id(&format!("<loc_{bins}>")) {
            if id != first_id + bins {
                return None;
            }
            bins += 1;
        }
        Some(Self { first_id, bins })
    }

    /// Token id for a bin.
    #[must_use]
    pub fn token_for_bin(&self, bin: u32) -> Option<u32> {
        (bin < self.bins).then(|| self.first_id + bin)
    }
}

impl CoordinateLookup for LocationTokens {
    fn coordinate_bin(&self, token_id: u32) -> Option<u32> {
        token_id
            .checked_sub(self.first_id)
            .filter(|bin| *bin < self.bins)
    }
}

/// Linear map from `[0, bins)` to `[0, dimension)` per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScaler {
    pub bins_x: u32,
    pub bins_y: u32,
    pub width: f32,
    pub height: f32,
}

impl LinearScaler {
    /// Same bin count on both axes.
    #[must_use]
    pub fn new(bins: u32, width: f32, height: f32) -> Self {
        Self {
            bins_x: bins,
            bins_y: bins,
            width,
            height,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn linear(bin: u32, bins: u32, dimension: f32) -> f32 {
    if bins == 0 {
        return 0.0;
    }
    bin as f32 * dimension / bins as f32
}

impl CoordinateScaler for LinearScaler {
    fn scale_x(&self, bin: u32) -> f32 {
        linear(bin, self.bins_x, self.width)
    }

    fn scale_y(&self, bin: u32) -> f32 {
        linear(bin, self.bins_y, self.height)
    }
}
