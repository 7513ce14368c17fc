//! Structured decode of finished token sequences.
//!
//! A sequence alternates label runs and coordinate runs:
//! `label label <loc> <loc> <loc> <loc> label ...`. The scanner collects label tokens
//! until a coordinate token appears, collects coordinates until the next label token, then
//! flushes the pair into one or more [`CoordinateResult`]s.

use crate::error::{DecodeError, Result};
use crate::tokenizer::TextDecoder;
use crate::vision::coordinates::{CoordinateLookup, CoordinateScaler, CoordinateShape};
use crate::vision::result::{BoundingBox, CoordinateResult, DecodeOutput, Point};
use crate::vision::task::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Label,
    Coordinates,
}

/// Post-processor bound to one tokenizer, coordinate vocabulary and image size.
pub struct StructuredDecoder<'a> {
    text: &'a dyn TextDecoder,
    lookup: &'a dyn CoordinateLookup,
    scaler: &'a dyn CoordinateScaler,
}

impl<'a> StructuredDecoder<'a> {
    #[must_use]
    pub fn new(
        text: &'a dyn TextDecoder,
        lookup: &'a dyn CoordinateLookup,
        scaler: &'a dyn CoordinateScaler,
    ) -> Self {
        Self {
            text,
            lookup,
            scaler,
        }
    }

    /// Decode `tokens` the way `task` requires: text, or labelled geometry.
    ///
    /// # Errors
    /// Returns an error if the tokenizer fails on label or text tokens.
    pub fn decode(&self, task: TaskType, tokens: &[u32]) -> Result<DecodeOutput> {
        match task.coordinate_shape() {
            None => Ok(DecodeOutput::Text(self.text.decode(tokens)?)),
            Some(shape) => Ok(DecodeOutput::Coordinates(
                self.decode_coordinates(shape, tokens)?,
            )),
        }
    }

    /// Coordinate extraction for a task that must have a shape.
    ///
    /// # Errors
    /// Returns [`DecodeError::UnsupportedTask`] for text-only tasks, or a tokenizer error.
    pub fn decode_task_coordinates(
        &self,
        task: TaskType,
        tokens: &[u32],
    ) -> Result<Vec<CoordinateResult>> {
        let shape = task
            .coordinate_shape()
            .ok_or(DecodeError::UnsupportedTask(task))?;
        self.decode_coordinates(shape, tokens)
    }

    /// Scan `tokens` into labelled shapes.
    ///
    /// Coordinate groups that do not fill a whole shape are dropped.
    ///
    /// # Errors
    /// Returns an error if the tokenizer fails on a label.
    pub fn decode_coordinates(
        &self,
        shape: CoordinateShape,
        tokens: &[u32],
    ) -> Result<Vec<CoordinateResult>> {
        let mut results = Vec::new();
        let mut state = ScanState::Label;
        let mut label = Vec::new();
        let mut bins = Vec::new();

        for &token in tokens {
            if let Some(bin) = self.lookup.coordinate_bin(token) {
                bins.push(bin);
                state = ScanState::Coordinates;
                continue;
            }
            if state == ScanState::Coordinates {
                self.flush(shape, &label, &bins, &mut results)?;
                label.clear();
                bins.clear();
                state = ScanState::Label;
            }
            label.push(token);
        }

        if state == ScanState::Coordinates {
            self.flush(shape, &label, &bins, &mut results)?;
        }
        Ok(results)
    }

    fn flush(
        &self,
        shape: CoordinateShape,
        label: &[u32],
        bins: &[u32],
        results: &mut Vec<CoordinateResult>,
    ) -> Result<()> {
        let text = self.text.decode(label)?.trim().to_string();
        let groups = match shape.group_size() {
            Some(size) => {
                let chunks = bins.chunks_exact(size);
                if !chunks.remainder().is_empty() {
                    tracing::warn!(
                        label = %text,
                        dropped = chunks.remainder().len(),
                        expected = size,
                        "dropping incomplete coordinate group"
                    );
                }
                chunks.collect::<Vec<_>>()
            }
            None => {
                if bins.len() % 2 != 0 {
                    tracing::warn!(label = %text, "dropping unpaired polygon coordinate");
                }
                vec![bins]
            }
        };

        for group in groups {
            let vertices = group
                .chunks_exact(2)
                .map(|xy| Point::new(self.scaler.scale_x(xy[0]), self.scaler.scale_y(xy[1])))
                .collect::<Vec<_>>();
            let Some(bounding_box) = BoundingBox::from_points(&vertices) else {
                continue;
            };
            results.push(CoordinateResult {
                label: text.clone(),
                shape,
                vertices,
                bounding_box,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::tokenizer::VocabDecoder;
    use crate::vision::coordinates::{LinearScaler, LocationTokens};

    const LOC: u32 = 100;

    fn vocab() -> VocabDecoder {
        let mut map = HashMap::new();
        for (piece, id) in [("<s>", 0), ("<pad>", 1), ("</s>", 2), ("<unk>", 3)] {
            map.insert(piece.to_string(), id);
        }
        for (piece, id) in [("red", 10), ("Ġcar", 11), ("dog", 12), ("text", 13), ("ĠcafÃ©", 14)] {
            map.insert(piece.to_string(), id);
        }
        VocabDecoder::from_vocab(&map).unwrap()
    }

    fn loc(bin: u32) -> u32 {
        LOC + bin
    }

    fn decode(shape: CoordinateShape, tokens: &[u32]) -> Vec<CoordinateResult> {
        let text = vocab();
        let lookup = LocationTokens::new(LOC, 1000);
        let scaler = LinearScaler::new(1000, 2000.0, 500.0);
        StructuredDecoder::new(&text, &lookup, &scaler)
            .decode_coordinates(shape, tokens)
            .unwrap()
    }

    #[test]
    fn test_rectangle_single_box() {
        let tokens = [10, 11, loc(100), loc(200), loc(300), loc(400), 2];
        let results = decode(CoordinateShape::Rectangle, &tokens);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.label, "red car");
        assert_eq!(r.shape, CoordinateShape::Rectangle);
        assert_eq!(r.vertices, vec![Point::new(200.0, 100.0), Point::new(600.0, 200.0)]);
        assert_eq!(
            r.bounding_box,
            BoundingBox {
                x_min: 200.0,
                y_min: 100.0,
                x_max: 600.0,
                y_max: 200.0
            }
        );
    }

    #[test]
    fn test_rectangle_multiple_boxes_same_label() {
        let tokens = [
            12,
            loc(0),
            loc(0),
            loc(10),
            loc(10),
            loc(20),
            loc(20),
            loc(30),
            loc(30),
            2,
        ];
        let results = decode(CoordinateShape::Rectangle, &tokens);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.label == "dog"));
    }

    #[test]
    fn test_rectangle_trailing_partial_group_dropped() {
        let tokens = [10, loc(1), loc(2), loc(3), 2];
        assert!(decode(CoordinateShape::Rectangle, &tokens).is_empty());

        let tokens = [10, loc(1), loc(2), loc(3), loc(4), loc(5), loc(6), loc(7), 2];
        assert_eq!(decode(CoordinateShape::Rectangle, &tokens).len(), 1);
    }

    #[test]
    fn test_labels_reset_between_groups() {
        let tokens = [
            0,
            10,
            11,
            loc(1),
            loc(2),
            loc(3),
            loc(4),
            12,
            loc(5),
            loc(6),
            loc(7),
            loc(8),
            2,
        ];
        let labels = decode(CoordinateShape::Rectangle, &tokens)
            .into_iter()
            .map(|r| r.label)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["red car", "dog"]);
    }

    #[test]
    fn test_group_at_end_of_stream_flushes() {
        let tokens = [12, loc(1), loc(2), loc(3), loc(4)];
        assert_eq!(decode(CoordinateShape::Rectangle, &tokens).len(), 1);
    }

    #[test]
    fn test_quadrangle() {
        let mut tokens = vec![13];
        tokens.extend([10, 20, 50, 20, 50, 40, 10, 40].map(loc));
        tokens.push(2);
        let results = decode(CoordinateShape::Quadrangle, &tokens);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].vertices.len(), 4);
        assert_eq!(results[0].label, "text");
        assert_eq!(
            results[0].bounding_box,
            BoundingBox {
                x_min: 20.0,
                y_min: 10.0,
                x_max: 100.0,
                y_max: 20.0
            }
        );
    }

    #[test]
    fn test_polygon_bbox_is_min_max() {
        let mut tokens = vec![12];
        tokens.extend([300, 50, 100, 400, 700, 250].map(loc));
        tokens.push(10);
        tokens.extend([1, 1, 2, 2].map(loc));
        tokens.push(2);
        let results = decode(CoordinateShape::Polygon, &tokens);
        assert_eq!(results.len(), 2);
        let poly = &results[0];
        assert_eq!(poly.vertices.len(), 3);
        assert_eq!(
            poly.bounding_box,
            BoundingBox {
                x_min: 200.0,
                y_min: 25.0,
                x_max: 1400.0,
                y_max: 200.0
            }
        );
        assert_eq!(results[1].label, "red");
    }

    #[test]
    fn test_polygon_odd_coordinate_dropped() {
        let mut tokens = vec![12];
        tokens.extend([10, 10, 20, 20, 30].map(loc));
        tokens.push(2);
        let results = decode(CoordinateShape::Polygon, &tokens);
        assert_eq!(results[0].vertices.len(), 2);
    }

    #[test]
    fn test_non_ascii_label() {
        let tokens = [10, 14, loc(1), loc(2), loc(3), loc(4), 2];
        let results = decode(CoordinateShape::Rectangle, &tokens);
        assert_eq!(results[0].label, "red café");
    }

    #[test]
    fn test_task_dispatch() {
        let text = vocab();
        let lookup = LocationTokens::new(LOC, 1000);
        let scaler = LinearScaler::new(1000, 100.0, 100.0);
        let decoder = StructuredDecoder::new(&text, &lookup, &scaler);

        let out = decoder.decode(TaskType::Caption, &[2, 0, 10, 11, 2]).unwrap();
        assert_eq!(out, DecodeOutput::Text("red car".to_string()));

        let err = decoder
            .decode_task_coordinates(TaskType::Caption, &[10])
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedTask(TaskType::Caption)));
    }
}
