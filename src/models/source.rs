//! External data sources and request classes.

use serde::{Deserialize, Serialize};

/// One of the two rate-limited upstreams the collector reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Stats website (HTML pages, dual-window budget).
    Stats,
    /// Wiki-style API (JSON, fixed spacing between calls).
    Wiki,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Stats, Source::Wiki];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Wiki => "wiki",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stats" => Some(Self::Stats),
            "wiki" => Some(Self::Wiki),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request class. Sources with fixed spacing apply a longer gap to `Parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OpClass {
    /// Cheap query/list request.
    #[default]
    Query,
    /// Expensive page render/detail request.
    Parse,
}

impl OpClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Parse => "parse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_roundtrip() {
        for source in Source::ALL {
            assert_eq!(Source::from_str(source.as_str()), Some(source));
        }
        assert_eq!(Source::from_str("liquid"), None);
    }
}
