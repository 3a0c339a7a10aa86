//! Type-Name Mapping
//!
//! Maps the external tool's node type names onto the closed set of
//! host node kinds. Deliberately small; anything unmapped becomes a
//! labelled pass-through placeholder, which keeps imports lossless
//! (the original type rides along as metadata) while the table grows.

use crate::host::NodeKind;

/// External type name -> host node kind.
const NODE_TYPE_MAP: &[(&str, NodeKind)] = &[
    ("LoadImage", NodeKind::ReadLike),
    ("SaveImage", NodeKind::WriteLike),
    ("SaveImageSimple", NodeKind::WriteLike),
];

/// Resolves the host kind for an external type name.
pub fn kind_for(type_name: &str) -> NodeKind {
    NODE_TYPE_MAP
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, kind)| *kind)
        .unwrap_or(NodeKind::Placeholder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_types() {
        assert_eq!(kind_for("LoadImage"), NodeKind::ReadLike);
        assert_eq!(kind_for("SaveImage"), NodeKind::WriteLike);
        assert_eq!(kind_for("SaveImageSimple"), NodeKind::WriteLike);
    }

    #[test]
    fn test_unmapped_types_become_placeholders() {
        assert_eq!(kind_for("KSampler"), NodeKind::Placeholder);
        assert_eq!(kind_for("Unknown"), NodeKind::Placeholder);
        assert_eq!(kind_for(""), NodeKind::Placeholder);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert_eq!(kind_for("loadimage"), NodeKind::Placeholder);
    }
}
