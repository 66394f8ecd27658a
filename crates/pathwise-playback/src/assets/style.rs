//! Asset requests derived from node content.

use std::fmt;

use serde::{Deserialize, Serialize};

use pathwise_core::{Node, NodeId, NodeKind};
use pathwise_storage::content_hash;

/// Generated media attached to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Audio,
    Image,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Audio => write!(f, "audio"),
            AssetKind::Image => write!(f, "image"),
        }
    }
}

/// Voice and visual style used for one kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    pub voice: &'static str,
    pub style: &'static str,
}

/// Fixed mapping from node kind to generation parameters.
pub fn params_for(kind: NodeKind) -> GenerationParams {
    let (voice, style) = match kind {
        NodeKind::Hook => ("nova", "bold cinematic illustration"),
        NodeKind::Narrative => ("fable", "storybook watercolor"),
        NodeKind::Explanation => ("alloy", "clean labeled diagram"),
        NodeKind::Interaction => ("echo", "minimal flat illustration"),
        NodeKind::Remediation => ("shimmer", "gentle hand-drawn sketch"),
        NodeKind::Summary => ("alloy", "tidy infographic"),
        NodeKind::Review => ("echo", "flashcard illustration"),
        NodeKind::Transition => ("onyx", "soft abstract gradient"),
    };
    GenerationParams { voice, style }
}

/// Cache identity of a generated asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey {
    /// blake3 hash of the node content, hex encoded.
    pub content_hash: String,
    pub kind: AssetKind,
    /// Voice for audio, style for images.
    pub variant: String,
}

/// One asset to produce for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub node: NodeId,
    pub key: AssetKey,
    /// Narration script or image prompt.
    pub input: String,
}

/// Assets a node needs: narration audio when it has a narration script and
/// an image when it has a visual prompt.
pub fn requests_for(id: NodeId, node: &Node) -> Vec<AssetRequest> {
    let params = params_for(node.kind);
    let hash = content_hash(&node.content).to_hex().to_string();
    let mut requests = Vec::new();

    let wanted = [
        (AssetKind::Audio, node.content.narration.as_deref(), params.voice),
        (AssetKind::Image, node.content.visual_prompt.as_deref(), params.style),
    ];
    for (kind, input, variant) in wanted {
        let Some(input) = input.map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        requests.push(AssetRequest {
            node: id,
            key: AssetKey {
                content_hash: hash.clone(),
                kind,
                variant: variant.to_string(),
            },
            input: input.to_string(),
        });
    }
    requests
}
