//! Standard definitions and user rule configuration for the scanner.
//!
//! Standard definitions are canonical, versioned patterns. A user rule
//! references one by ID and picks the match action and proximity keywords;
//! [`interpret_rule`] combines both into a [`ScanRuleConfig`].
//!
//! # Variant selection
//!
//! Variants are sorted by version, highest first, and the first one whose
//! required capabilities are all supported is used. Input order does not
//! matter.
//!
//! # Proximity keywords
//!
//! | User config | Keywords used |
//! |-------------|---------------|
//! | `use_recommended_keywords` | variant's included keywords, else default excluded keywords |
//! | keywords set and `character_count > 0` | the user's included keywords, as a whole |
//! | anything else | default excluded keywords |

use crate::action::MatchAction;
use crate::config::{ScannerConfig, CAPABILITY_LUHN_CHECKSUM};
use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};

/// Standard definitions document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardRulesConfig {
    #[serde(default)]
    pub priority: u32,
    /// Accepted for compatibility; standard definitions are always usable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    pub rules: Vec<StandardRuleConfig>,
    #[serde(default)]
    pub defaults: StandardRulesDefaults,
}

impl StandardRulesConfig {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PolicyError::Config(format!("invalid standard rules: {e}")))
    }

    pub fn rule(&self, id: &str) -> Option<&StandardRuleConfig> {
        self.rules.iter().find(|rule| rule.id == id)
    }
}

/// One standard definition and its variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardRuleConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub definitions: Vec<StandardRuleDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardRuleDefinition {
    pub version: u32,
    pub pattern: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub default_included_keywords: Vec<String>,
}

/// Defaults shared by all standard definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardRulesDefaults {
    #[serde(default)]
    pub included_keywords_char_count: u32,
    #[serde(default)]
    pub excluded_keywords_char_count: u32,
    #[serde(default)]
    pub excluded_keywords: Vec<String>,
}

/// User rule configuration document.
///
/// An empty document (`{}`) disables scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl UserConfig {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PolicyError::Config(format!("invalid user configuration: {e}")))
    }

    /// Enabled rules in definition order; none when the group is disabled.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &RuleConfig> {
        self.rules
            .iter()
            .filter(move |rule| self.is_enabled && rule.is_enabled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardRuleReference {
    pub standard_rule_id: String,
}

/// A user rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub definition: StandardRuleReference,
    #[serde(default)]
    pub tags: Vec<String>,
    pub match_action: MatchAction,
    #[serde(default)]
    pub included_keywords: ProximityKeywords,
    #[serde(default)]
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityKeywords {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub character_count: u32,
    #[serde(default)]
    pub use_recommended_keywords: bool,
}

/// Check run on a pattern match before it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecondaryValidator {
    LuhnChecksum,
}

/// Keywords that must (or must not) appear shortly before a match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProximityConfig {
    pub look_ahead_character_count: u32,
    pub included_keywords: Vec<String>,
    pub excluded_keywords: Vec<String>,
}

/// A user rule resolved against its standard definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRuleConfig {
    /// Name of the standard definition.
    pub id: String,
    pub pattern: String,
    pub match_action: MatchAction,
    pub tags: Vec<String>,
    pub proximity: Option<ProximityConfig>,
    pub secondary_validator: Option<SecondaryValidator>,
}

/// Pick the variant to use for the running engine's capabilities.
pub fn select_definition<'a>(
    standard: &'a StandardRuleConfig,
    capabilities: &ScannerConfig,
) -> Result<&'a StandardRuleDefinition> {
    let mut variants: Vec<&StandardRuleDefinition> = standard.definitions.iter().collect();
    variants.sort_by(|a, b| b.version.cmp(&a.version));
    variants
        .into_iter()
        .find(|variant| capabilities.supports_all(variant.required_capabilities.as_slice()))
        .ok_or_else(|| PolicyError::Capability(standard.id.clone()))
}

/// Resolve a user rule against its standard definition.
pub fn interpret_rule(
    rule: &RuleConfig,
    standard: &StandardRuleConfig,
    defaults: &StandardRulesDefaults,
    capabilities: &ScannerConfig,
) -> Result<ScanRuleConfig> {
    let variant = select_definition(standard, capabilities)?;

    let secondary_validator = variant
        .required_capabilities
        .iter()
        .any(|c| c == CAPABILITY_LUHN_CHECKSUM)
        .then_some(SecondaryValidator::LuhnChecksum);

    Ok(ScanRuleConfig {
        id: standard.name.clone(),
        pattern: variant.pattern.clone(),
        match_action: rule.match_action.clone(),
        tags: rule.tags.clone(),
        proximity: proximity_keywords(&rule.included_keywords, variant, defaults),
        secondary_validator,
    })
}

fn proximity_keywords(
    user: &ProximityKeywords,
    variant: &StandardRuleDefinition,
    defaults: &StandardRulesDefaults,
) -> Option<ProximityConfig> {
    let excluded = || {
        (!defaults.excluded_keywords.is_empty()).then(|| ProximityConfig {
            look_ahead_character_count: defaults.excluded_keywords_char_count,
            included_keywords: Vec::new(),
            excluded_keywords: defaults.excluded_keywords.clone(),
        })
    };

    if user.use_recommended_keywords {
        if variant.default_included_keywords.is_empty() {
            return excluded();
        }
        return Some(ProximityConfig {
            look_ahead_character_count: defaults.included_keywords_char_count,
            included_keywords: variant.default_included_keywords.clone(),
            excluded_keywords: Vec::new(),
        });
    }

    if !user.keywords.is_empty() && user.character_count > 0 {
        return Some(ProximityConfig {
            look_ahead_character_count: user.character_count,
            included_keywords: user.keywords.clone(),
            excluded_keywords: Vec::new(),
        });
    }

    excluded()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> StandardRulesDefaults {
        StandardRulesDefaults {
            included_keywords_char_count: 10,
            excluded_keywords_char_count: 10,
            excluded_keywords: vec!["trace-id".into()],
        }
    }

    fn variant(version: u32, pattern: &str, caps: &[&str]) -> StandardRuleDefinition {
        StandardRuleDefinition {
            version,
            pattern: pattern.into(),
            required_capabilities: caps.iter().map(|c| c.to_string()).collect(),
            default_included_keywords: Vec::new(),
        }
    }

    fn standard(definitions: Vec<StandardRuleDefinition>) -> StandardRuleConfig {
        StandardRuleConfig {
            id: "0".into(),
            name: "Zero".into(),
            description: "Zero desc".into(),
            definitions,
        }
    }

    fn user_rule(keywords: ProximityKeywords) -> RuleConfig {
        RuleConfig {
            name: "test".into(),
            description: "desc".into(),
            definition: StandardRuleReference {
                standard_rule_id: "0".into(),
            },
            tags: vec!["tag:test".into()],
            match_action: MatchAction::redact("[redacted]"),
            included_keywords: keywords,
            ..Default::default()
        }
    }

    fn recommended() -> ProximityKeywords {
        ProximityKeywords {
            use_recommended_keywords: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_variant() {
        let rule = interpret_rule(
            &user_rule(recommended()),
            &standard(vec![variant(1, "rule pattern 1", &[])]),
            &defaults(),
            &ScannerConfig::default(),
        )
        .unwrap();
        assert_eq!(rule.id, "Zero");
        assert_eq!(rule.pattern, "rule pattern 1");
        assert_eq!(rule.secondary_validator, None);
        assert_eq!(rule.tags, ["tag:test"]);
    }

    #[test]
    fn test_highest_supported_variant_regardless_of_order() {
        let std_rule = standard(vec![
            variant(2, "second pattern", &[CAPABILITY_LUHN_CHECKSUM]),
            variant(1, "first pattern", &[]),
            variant(3, "third pattern", &["unsupported"]),
        ]);
        let rule = interpret_rule(
            &user_rule(recommended()),
            &std_rule,
            &defaults(),
            &ScannerConfig::default(),
        )
        .unwrap();
        assert_eq!(rule.pattern, "second pattern");
        assert_eq!(rule.secondary_validator, Some(SecondaryValidator::LuhnChecksum));

        let rule = interpret_rule(
            &user_rule(recommended()),
            &std_rule,
            &defaults(),
            &ScannerConfig::without_capabilities(),
        )
        .unwrap();
        assert_eq!(rule.pattern, "first pattern");
        assert_eq!(rule.secondary_validator, None);
    }

    #[test]
    fn test_no_supported_variant() {
        let err = select_definition(
            &standard(vec![variant(1, "p", &["unsupported"])]),
            &ScannerConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, PolicyError::Capability("0".into()));
    }

    #[test]
    fn test_recommended_included_keywords() {
        let mut v2 = variant(2, "second pattern", &[CAPABILITY_LUHN_CHECKSUM]);
        v2.default_included_keywords = vec!["hello".into()];
        let std_rule = standard(vec![v2, variant(1, "first pattern", &[])]);

        let rule = interpret_rule(
            &user_rule(recommended()),
            &std_rule,
            &defaults(),
            &ScannerConfig::default(),
        )
        .unwrap();
        let proximity = rule.proximity.unwrap();
        assert_eq!(proximity.look_ahead_character_count, 10);
        assert_eq!(proximity.included_keywords, ["hello"]);
        assert!(proximity.excluded_keywords.is_empty());

        // user keywords win as a whole block
        let rule = interpret_rule(
            &user_rule(ProximityKeywords {
                keywords: vec!["custom".into()],
                character_count: 42,
                use_recommended_keywords: false,
            }),
            &std_rule,
            &defaults(),
            &ScannerConfig::default(),
        )
        .unwrap();
        let proximity = rule.proximity.unwrap();
        assert_eq!(proximity.look_ahead_character_count, 42);
        assert_eq!(proximity.included_keywords, ["custom"]);
    }

    #[test]
    fn test_default_excluded_keywords() {
        let std_rule = standard(vec![
            variant(2, "second pattern", &[CAPABILITY_LUHN_CHECKSUM]),
            variant(1, "first pattern", &[]),
        ]);
        let rule = interpret_rule(
            &user_rule(ProximityKeywords::default()),
            &std_rule,
            &defaults(),
            &ScannerConfig::default(),
        )
        .unwrap();
        assert_eq!(rule.pattern, "second pattern");
        let proximity = rule.proximity.unwrap();
        assert_eq!(proximity.look_ahead_character_count, 10);
        assert_eq!(proximity.excluded_keywords, ["trace-id"]);
        assert!(proximity.included_keywords.is_empty());

        // keywords without a window fall back to the defaults
        let rule = interpret_rule(
            &user_rule(ProximityKeywords {
                keywords: vec!["custom".into()],
                character_count: 0,
                use_recommended_keywords: false,
            }),
            &std_rule,
            &defaults(),
            &ScannerConfig::default(),
        )
        .unwrap();
        assert_eq!(rule.proximity.unwrap().excluded_keywords, ["trace-id"]);
    }

    #[test]
    fn test_parse_documents() {
        let standard = StandardRulesConfig::from_slice(
            br#"{"priority":1,"rules":[{"id":"zero-0","name":"zero","description":"d",
                "definitions":[{"version":1,"pattern":"zero"}]}]}"#,
        )
        .unwrap();
        assert_eq!(standard.rule("zero-0").unwrap().name, "zero");
        assert!(standard.rule("one-1").is_none());

        let user = UserConfig::from_slice(b"{}").unwrap();
        assert!(!user.is_enabled);
        assert_eq!(user.enabled_rules().count(), 0);

        let err = UserConfig::from_slice(b"{\"rules\": 3}").unwrap_err();
        assert!(matches!(err, PolicyError::Config(_)));
    }
}
