//! Video codec identities and their frame boundary detection strategy

use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiated video codec of the received stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
    /// Payload format without a trustworthy end-of-frame marker
    Generic,
}

impl VideoCodec {
    /// Default boundary strategy for this codec
    pub fn boundary_strategy(&self) -> BoundaryStrategy {
        match self {
            VideoCodec::H264
            | VideoCodec::H265
            | VideoCodec::Vp8
            | VideoCodec::Vp9
            | VideoCodec::Av1 => BoundaryStrategy::EndMarker,
            VideoCodec::Generic => BoundaryStrategy::SuccessorInference,
        }
    }

    /// Short name used in logs and SDP
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::H265 => "H265",
            VideoCodec::Vp8 => "VP8",
            VideoCodec::Vp9 => "VP9",
            VideoCodec::Av1 => "AV1",
            VideoCodec::Generic => "generic",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the final packet of a frame is recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryStrategy {
    /// The packet carrying the RTP marker bit ends the frame
    EndMarker,
    /// The frame ends one sequence before the next frame's lowest sequence
    SuccessorInference,
}

impl BoundaryStrategy {
    /// Whether a marker bit on `marker` closes the frame
    pub fn marker_closes_frame(&self, marker: bool) -> bool {
        matches!(self, BoundaryStrategy::EndMarker) && marker
    }

    /// Whether the successor's minimum sequence defines this frame's final bound
    pub fn infers_from_successor(&self) -> bool {
        matches!(self, BoundaryStrategy::SuccessorInference)
    }
}
