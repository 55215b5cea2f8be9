//! Match actions: how matched text is transformed in the produced copy.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Side of the matched text a partial redaction applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialRedactDirection {
    #[serde(alias = "first")]
    FirstCharacters,
    #[serde(alias = "last")]
    LastCharacters,
}

/// Transformation applied to matched text.
///
/// | `type` | Result |
/// |--------|--------|
/// | `None` | text unchanged, the match is still reported |
/// | `Redact` | whole match replaced by `placeholder` |
/// | `Hash` | whole match replaced by its hex SHA-256 digest |
/// | `PartialRedact` | `character_count` characters at one end each replaced by `placeholder` |
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MatchAction {
    #[default]
    None,
    Redact {
        placeholder: String,
    },
    Hash,
    #[serde(alias = "Partial Redact")]
    PartialRedact {
        direction: PartialRedactDirection,
        character_count: u32,
        placeholder: String,
    },
}

impl MatchAction {
    pub fn redact(placeholder: impl Into<String>) -> Self {
        MatchAction::Redact {
            placeholder: placeholder.into(),
        }
    }

    /// True when applying the action leaves text unchanged.
    pub fn is_none(&self) -> bool {
        matches!(self, MatchAction::None)
    }

    /// Transform one matched span.
    pub fn apply(&self, matched: &str) -> String {
        match self {
            MatchAction::None => matched.to_string(),
            MatchAction::Redact { placeholder } => placeholder.clone(),
            MatchAction::Hash => hex::encode(Sha256::digest(matched.as_bytes())),
            MatchAction::PartialRedact {
                direction,
                character_count,
                placeholder,
            } => {
                let total = matched.chars().count();
                let count = (*character_count as usize).min(total);
                let masked = placeholder.repeat(count);
                match direction {
                    PartialRedactDirection::FirstCharacters => {
                        let rest: String = matched.chars().skip(count).collect();
                        masked + &rest
                    }
                    PartialRedactDirection::LastCharacters => {
                        let kept: String = matched.chars().take(total - count).collect();
                        kept + &masked
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        assert_eq!(MatchAction::redact("[REDACTED]").apply("one"), "[REDACTED]");
        assert_eq!(MatchAction::None.apply("one"), "one");
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(
            MatchAction::Hash.apply(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            MatchAction::Hash.apply("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(MatchAction::Hash.apply("one"), MatchAction::Hash.apply("two"));
    }

    #[test]
    fn test_partial_redact() {
        let first = MatchAction::PartialRedact {
            direction: PartialRedactDirection::FirstCharacters,
            character_count: 12,
            placeholder: "*".into(),
        };
        assert_eq!(first.apply("4111111111111111"), "************1111");

        let last = MatchAction::PartialRedact {
            direction: PartialRedactDirection::LastCharacters,
            character_count: 10,
            placeholder: "#".into(),
        };
        assert_eq!(last.apply("abc"), "###");
    }

    #[test]
    fn test_deserialize_descriptors() {
        let action: MatchAction =
            serde_json::from_str(r#"{"type":"Redact","placeholder":"[redacted]"}"#).unwrap();
        assert_eq!(action, MatchAction::redact("[redacted]"));

        let action: MatchAction = serde_json::from_str(r#"{"type":"Hash"}"#).unwrap();
        assert_eq!(action, MatchAction::Hash);

        let action: MatchAction = serde_json::from_str(
            r#"{"type":"Partial Redact","direction":"last","character_count":4,"placeholder":"*"}"#,
        )
        .unwrap();
        assert_eq!(
            action,
            MatchAction::PartialRedact {
                direction: PartialRedactDirection::LastCharacters,
                character_count: 4,
                placeholder: "*".into(),
            }
        );

        assert!(serde_json::from_str::<MatchAction>(r#"{"type":"Explode"}"#).is_err());
    }
}
