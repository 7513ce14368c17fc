//! Task catalogue of the vision-grounding model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::vision::coordinates::CoordinateShape;

/// Tasks the grounding model is prompted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Caption,
    DetailedCaption,
    MoreDetailedCaption,
    Ocr,
    OcrWithRegion,
    ObjectDetection,
    DenseRegionCaption,
    RegionProposal,
    CaptionToPhraseGrounding,
    ReferringExpressionSegmentation,
    RegionToSegmentation,
    OpenVocabularyDetection,
    RegionToCategory,
    RegionToDescription,
    RegionToOcr,
}

impl TaskType {
    pub const ALL: [Self; 15] = [
        Self::Caption,
        Self::DetailedCaption,
        Self::MoreDetailedCaption,
        Self::Ocr,
        Self::OcrWithRegion,
        Self::ObjectDetection,
        Self::DenseRegionCaption,
        Self::RegionProposal,
        Self::CaptionToPhraseGrounding,
        Self::ReferringExpressionSegmentation,
        Self::RegionToSegmentation,
        Self::OpenVocabularyDetection,
        Self::RegionToCategory,
        Self::RegionToDescription,
        Self::RegionToOcr,
    ];

    /// Geometry this task decodes to; `None` means plain text.
    #[must_use]
    pub fn coordinate_shape(self) -> Option<CoordinateShape> {
        match self {
            Self::OcrWithRegion => Some(CoordinateShape::Quadrangle),
            Self::ObjectDetection
            | Self::DenseRegionCaption
            | Self::RegionProposal
            | Self::CaptionToPhraseGrounding
            | Self::OpenVocabularyDetection => Some(CoordinateShape::Rectangle),
            Self::ReferringExpressionSegmentation | Self::RegionToSegmentation => {
                Some(CoordinateShape::Polygon)
            }
            Self::Caption
            | Self::DetailedCaption
            | Self::MoreDetailedCaption
            | Self::Ocr
            | Self::RegionToCategory
            | Self::RegionToDescription
            | Self::RegionToOcr => None,
        }
    }

    /// Task token placed at the start of the prompt.
    #[must_use]
    pub fn prompt_token(self) -> &'static str {
        match self {
            Self::Caption => "<CAPTION>",
            Self::DetailedCaption => "<DETAILED_CAPTION>",
            Self::MoreDetailedCaption => "<MORE_DETAILED_CAPTION>",
            Self::Ocr => "<OCR>",
            Self::OcrWithRegion => "<OCR_WITH_REGION>",
            Self::ObjectDetection => "<OD>",
            Self::DenseRegionCaption => "<DENSE_REGION_CAPTION>",
            Self::RegionProposal => "<REGION_PROPOSAL>",
            Self::CaptionToPhraseGrounding => "<CAPTION_TO_PHRASE_GROUNDING>",
            Self::ReferringExpressionSegmentation => "<REFERRING_EXPRESSION_SEGMENTATION>",
            Self::RegionToSegmentation => "<REGION_TO_SEGMENTATION>",
            Self::OpenVocabularyDetection => "<OPEN_VOCABULARY_DETECTION>",
            Self::RegionToCategory => "<REGION_TO_CATEGORY>",
            Self::RegionToDescription => "<REGION_TO_DESCRIPTION>",
            Self::RegionToOcr => "<REGION_TO_OCR>",
        }
    }

    /// Whether the prompt needs caller text (a phrase or a region) after the task token.
    #[must_use]
    pub fn takes_input(self) -> bool {
        matches!(
            self,
            Self::CaptionToPhraseGrounding
                | Self::ReferringExpressionSegmentation
                | Self::RegionToSegmentation
                | Self::OpenVocabularyDetection
                | Self::RegionToCategory
                | Self::RegionToDescription
                | Self::RegionToOcr
        )
    }

    /// Full prompt: task token followed by optional input text.
    #[must_use]
    pub fn prompt(self, input: Option<&str>) -> String {
        match input.map(str::trim).filter(|s| !s.is_empty()) {
            Some(text) if self.takes_input() => format!("{}{text}", self.prompt_token()),
            _ => self.prompt_token().to_string(),
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Caption => "caption",
            Self::DetailedCaption => "detailed_caption",
            Self::MoreDetailedCaption => "more_detailed_caption",
            Self::Ocr => "ocr",
            Self::OcrWithRegion => "ocr_with_region",
            Self::ObjectDetection => "object_detection",
            Self::DenseRegionCaption => "dense_region_caption",
            Self::RegionProposal => "region_proposal",
            Self::CaptionToPhraseGrounding => "caption_to_phrase_grounding",
            Self::ReferringExpressionSegmentation => "referring_expression_segmentation",
            Self::RegionToSegmentation => "region_to_segmentation",
            Self::OpenVocabularyDetection => "open_vocabulary_detection",
            Self::RegionToCategory => "region_to_category",
            Self::RegionToDescription => "region_to_description",
            Self::RegionToOcr => "region_to_ocr",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = DecodeError;

    /// Accepts the snake_case name, with `-` or `_`, or the prompt token (`<OD>`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|task| {
                task.as_str() == normalized
                    || task.prompt_token().eq_ignore_ascii_case(s.trim())
            })
            .ok_or_else(|| DecodeError::UnknownTask(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes() {
        assert_eq!(
            TaskType::ObjectDetection.coordinate_shape(),
            Some(CoordinateShape::Rectangle)
        );
        assert_eq!(
            TaskType::OcrWithRegion.coordinate_shape(),
            Some(CoordinateShape::Quadrangle)
        );
        assert_eq!(
            TaskType::RegionToSegmentation.coordinate_shape(),
            Some(CoordinateShape::Polygon)
        );
        assert_eq!(TaskType::Caption.coordinate_shape(), None);
    }

    #[test]
    fn test_parse_names_and_tokens() {
        assert_eq!(
            "object-detection".parse::<TaskType>().unwrap(),
            TaskType::ObjectDetection
        );
        assert_eq!("<OD>".parse::<TaskType>().unwrap(), TaskType::ObjectDetection);
        assert_eq!("ocr".parse::<TaskType>().unwrap(), TaskType::Ocr);
        assert!("segment-everything".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_prompt_input() {
        assert_eq!(
            TaskType::CaptionToPhraseGrounding.prompt(Some("a red car")),
            "<CAPTION_TO_PHRASE_GROUNDING>a red car"
        );
        assert_eq!(TaskType::Caption.prompt(Some("ignored")), "<CAPTION>");
        assert_eq!(TaskType::RegionToOcr.prompt(None), "<REGION_TO_OCR>");
    }
}
