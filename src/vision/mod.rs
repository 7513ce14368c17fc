pub mod coordinates;
pub mod decode;
pub mod result;
pub mod task;

pub use coordinates::{
    CoordinateLookup, CoordinateScaler, CoordinateShape, DEFAULT_LOCATION_BINS, LinearScaler,
    LocationTokens,
};
pub use decode::StructuredDecoder;
pub use result::{BoundingBox, CoordinateResult, DecodeOutput, Point};
pub use task::TaskType;
