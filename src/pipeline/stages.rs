// Monolithic pipeline stages and their fixed progress markers
// Markers are hard-coded per stage, never computed from elapsed work

use crate::audio::FeatureKind;
use crate::state::COMPLETE_MARKER;

/// Work done for one feature kind, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureStep {
    Computed,
    Images,
    Video,
    Persisted,
}

impl FeatureStep {
    pub const ALL: [FeatureStep; 4] = [
        FeatureStep::Computed,
        FeatureStep::Images,
        FeatureStep::Video,
        FeatureStep::Persisted,
    ];

    fn offset(&self) -> u32 {
        match self {
            FeatureStep::Computed => 0,
            FeatureStep::Images => 2,
            FeatureStep::Video => 4,
            FeatureStep::Persisted => 6,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FeatureStep::Computed => "computed",
            FeatureStep::Images => "images",
            FeatureStep::Video => "video",
            FeatureStep::Persisted => "persisted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidateUpload,
    Decode,
    ExtractSlice,
    PersistSlice,
    Segment,
    Feature(FeatureKind, FeatureStep),
    Complete,
}

impl Stage {
    pub fn marker(&self) -> String {
        let percent = match self {
            Stage::ValidateUpload => 2,
            Stage::Decode => 4,
            Stage::ExtractSlice => 6,
            Stage::PersistSlice => 8,
            Stage::Segment => 10,
            Stage::Feature(kind, step) => 12 + 8 * kind_index(*kind) + step.offset(),
            Stage::Complete => return COMPLETE_MARKER.to_string(),
        };
        format!("{}%", percent)
    }

    pub fn name(&self) -> String {
        match self {
            Stage::ValidateUpload => "validate_upload".to_string(),
            Stage::Decode => "decode".to_string(),
            Stage::ExtractSlice => "extract_slice".to_string(),
            Stage::PersistSlice => "persist_slice".to_string(),
            Stage::Segment => "segment".to_string(),
            Stage::Feature(kind, step) => format!("{}.{}", kind.slug(), step.name()),
            Stage::Complete => "complete".to_string(),
        }
    }
}

fn kind_index(kind: FeatureKind) -> u32 {
    FeatureKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(0) as u32
}

/// Every stage of a full run, in execution order
pub fn all_stages() -> Vec<Stage> {
    let mut stages = vec![
        Stage::ValidateUpload,
        Stage::Decode,
        Stage::ExtractSlice,
        Stage::PersistSlice,
        Stage::Segment,
    ];
    for kind in FeatureKind::ALL {
        for step in FeatureStep::ALL {
            stages.push(Stage::Feature(kind, step));
        }
    }
    stages.push(Stage::Complete);
    stages
}
