//! Connection variant definitions
//!
//! A variant is a fixed combination of wire-protocol and caching/
//! pipelining settings under benchmark. The set is closed: it mirrors
//! the connection configurations the upstream connectors expose.

use std::fmt;

use serde::Serialize;

/// Wire protocol used for statement execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WireMode {
    /// COM_QUERY with inlined literals
    Text,
    /// Server-side prepared statements (COM_STMT_PREPARE / EXECUTE)
    Binary,
}

/// Transport security for the variant's connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransportSecurity {
    Disabled,
    Tls,
}

/// The named variants exposed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariantKind {
    Text,
    TextRewrite,
    Binary,
    BinaryNoCache,
    BinaryNoPipeline,
}

impl VariantKind {
    /// All variants, in benchmark order
    pub fn all() -> [VariantKind; 5] {
        [
            Self::Text,
            Self::TextRewrite,
            Self::Binary,
            Self::BinaryNoCache,
            Self::BinaryNoPipeline,
        ]
    }

    /// Parse variant name from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "text-rewrite" | "text_rewrite" => Some(Self::TextRewrite),
            "binary" => Some(Self::Binary),
            "binary-no-cache" | "binary_no_cache" => Some(Self::BinaryNoCache),
            "binary-no-pipeline" | "binary_no_pipeline" => Some(Self::BinaryNoPipeline),
            _ => None,
        }
    }

    /// Get display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::TextRewrite => "text-rewrite",
            Self::Binary => "binary",
            Self::BinaryNoCache => "binary-no-cache",
            Self::BinaryNoPipeline => "binary-no-pipeline",
        }
    }

    /// Resolve the field combination this name stands for
    pub fn settings(&self, security: TransportSecurity) -> Variant {
        match self {
            Self::Text => Variant {
                kind: *self,
                wire_mode: WireMode::Text,
                cache_statements: false,
                pipelining: true,
                rewrite_batched: false,
                security,
            },
            Self::TextRewrite => Variant {
                kind: *self,
                wire_mode: WireMode::Text,
                cache_statements: false,
                pipelining: true,
                rewrite_batched: true,
                security,
            },
            Self::Binary => Variant {
                kind: *self,
                wire_mode: WireMode::Binary,
                cache_statements: true,
                pipelining: true,
                rewrite_batched: false,
                security,
            },
            Self::BinaryNoCache => Variant {
                kind: *self,
                wire_mode: WireMode::Binary,
                cache_statements: false,
                pipelining: true,
                rewrite_batched: false,
                security,
            },
            Self::BinaryNoPipeline => Variant {
                kind: *self,
                wire_mode: WireMode::Binary,
                cache_statements: true,
                pipelining: false,
                rewrite_batched: false,
                security,
            },
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable connection configuration record
///
/// Identity is value-based: two variants with identical fields are
/// interchangeable. Built once at controller startup, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variant {
    pub kind: VariantKind,
    pub wire_mode: WireMode,
    pub cache_statements: bool,
    pub pipelining: bool,
    pub rewrite_batched: bool,
    pub security: TransportSecurity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variant_names() {
        assert_eq!(VariantKind::parse("text"), Some(VariantKind::Text));
        assert_eq!(VariantKind::parse("TEXT"), Some(VariantKind::Text));
        assert_eq!(
            VariantKind::parse("binary-no-cache"),
            Some(VariantKind::BinaryNoCache)
        );
        assert_eq!(
            VariantKind::parse("binary_no_pipeline"),
            Some(VariantKind::BinaryNoPipeline)
        );
        assert_eq!(VariantKind::parse("unknown"), None);
    }

    #[test]
    fn test_settings_mapping() {
        let text = VariantKind::Text.settings(TransportSecurity::Disabled);
        assert_eq!(text.wire_mode, WireMode::Text);
        assert!(!text.cache_statements);
        assert!(!text.rewrite_batched);

        let rewrite = VariantKind::TextRewrite.settings(TransportSecurity::Disabled);
        assert_eq!(rewrite.wire_mode, WireMode::Text);
        assert!(rewrite.rewrite_batched);

        let binary = VariantKind::Binary.settings(TransportSecurity::Disabled);
        assert_eq!(binary.wire_mode, WireMode::Binary);
        assert!(binary.cache_statements);
        assert!(binary.pipelining);

        let no_cache = VariantKind::BinaryNoCache.settings(TransportSecurity::Disabled);
        assert!(!no_cache.cache_statements);

        let no_pipeline = VariantKind::BinaryNoPipeline.settings(TransportSecurity::Disabled);
        assert!(no_pipeline.cache_statements);
        assert!(!no_pipeline.pipelining);
    }

    #[test]
    fn test_value_identity() {
        let a = VariantKind::Binary.settings(TransportSecurity::Disabled);
        let b = VariantKind::Binary.settings(TransportSecurity::Disabled);
        assert_eq!(a, b);

        let c = VariantKind::Binary.settings(TransportSecurity::Tls);
        assert_ne!(a, c);
    }

    #[test]
    fn test_all_roundtrip() {
        for kind in VariantKind::all() {
            assert_eq!(VariantKind::parse(kind.as_str()), Some(kind));
        }
    }
}
