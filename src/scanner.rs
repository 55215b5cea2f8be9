//! Reconfigurable text scanner.
//!
//! The scanner applies user rules, resolved against standard definitions,
//! to raw payloads and produces a transformed copy where every accepted
//! match has been rewritten by its rule's match action.
//!
//! # Reconfiguration
//!
//! | Order | Effect |
//! |-------|--------|
//! | `StandardRules` | replaces the standard definitions; re-applies the retained user config |
//! | `AgentConfig` | replaces the user config; applied once standard definitions are known |
//! | `StopProcessing` | tears the scanner down for good |
//!
//! Any rule that fails to resolve or compile rejects the whole order and
//! leaves the scanner as it was.

use crate::config::{EngineConfig, ScannerConfig};
use crate::definitions::{
    interpret_rule, ProximityConfig, RuleConfig, ScanRuleConfig, SecondaryValidator,
    StandardRulesConfig, UserConfig,
};
use crate::error::{PolicyError, Result};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::publish::Published;
use aho_corasick::AhoCorasick;
use regex::bytes::Regex;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

/// Reconfiguration orders accepted by [`Scanner::reconfigure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfigureOrder {
    StandardRules(Vec<u8>),
    AgentConfig(Vec<u8>),
    StopProcessing,
}

/// One accepted match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMatch {
    /// Index of the rule in [`Scanner::configured_rules`].
    pub rule_idx: usize,
    pub start: usize,
    pub end: usize,
}

/// Result of scanning one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub matched: bool,
    /// Transformed copy, equal to the input when nothing matched.
    pub processed: Vec<u8>,
    pub matches: Vec<ScanMatch>,
}

impl ScanResult {
    fn unmatched(event: &[u8]) -> Self {
        Self {
            matched: false,
            processed: event.to_vec(),
            matches: Vec::new(),
        }
    }
}

struct KeywordMatcher {
    included: Option<AhoCorasick>,
    excluded: Option<AhoCorasick>,
    look_ahead: usize,
}

impl KeywordMatcher {
    fn new(config: &ProximityConfig) -> Result<Self> {
        let build = |keywords: &[String]| -> Result<Option<AhoCorasick>> {
            if keywords.is_empty() {
                return Ok(None);
            }
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(keywords)
                .map(Some)
                .map_err(|e| PolicyError::Config(format!("invalid keywords: {e}")))
        };
        Ok(Self {
            included: build(&config.included_keywords)?,
            excluded: build(&config.excluded_keywords)?,
            look_ahead: config.look_ahead_character_count as usize,
        })
    }

    fn accepts(&self, text: &[u8], start: usize) -> bool {
        let window = &text[window_start(text, start, self.look_ahead)..start];
        if let Some(included) = &self.included {
            if !included.is_match(window) {
                return false;
            }
        }
        match &self.excluded {
            Some(excluded) => !excluded.is_match(window),
            None => true,
        }
    }
}

/// Byte offset `chars` UTF-8 characters before `end`.
fn window_start(text: &[u8], end: usize, chars: usize) -> usize {
    let mut idx = end;
    let mut seen = 0;
    while idx > 0 && seen < chars {
        idx -= 1;
        if text[idx] & 0xC0 != 0x80 {
            seen += 1;
        }
    }
    idx
}

/// Luhn checksum over the digits of a match. Separators are ignored.
fn luhn_valid(matched: &[u8]) -> bool {
    let mut sum = 0u32;
    let mut digits = 0usize;
    for byte in matched.iter().rev() {
        match byte {
            b'0'..=b'9' => {
                let mut digit = u32::from(byte - b'0');
                if digits % 2 == 1 {
                    digit *= 2;
                    if digit > 9 {
                        digit -= 9;
                    }
                }
                sum += digit;
                digits += 1;
            }
            b' ' | b'-' | b'.' => {}
            _ => return false,
        }
    }
    digits > 1 && sum % 10 == 0
}

struct CompiledRule {
    config: ScanRuleConfig,
    regex: Regex,
    keywords: Option<KeywordMatcher>,
}

impl CompiledRule {
    fn compile(config: ScanRuleConfig) -> Result<Self> {
        let regex = Regex::new(&config.pattern)?;
        let keywords = config.proximity.as_ref().map(KeywordMatcher::new).transpose()?;
        Ok(Self {
            config,
            regex,
            keywords,
        })
    }

    fn accepts(&self, text: &[u8], start: usize, end: usize) -> bool {
        if let Some(keywords) = &self.keywords {
            if !keywords.accepts(text, start) {
                return false;
            }
        }
        match self.config.secondary_validator {
            Some(SecondaryValidator::LuhnChecksum) => luhn_valid(&text[start..end]),
            None => true,
        }
    }
}

/// Published scanning configuration.
struct ActiveRules {
    rules: Vec<CompiledRule>,
    configured: Vec<RuleConfig>,
}

impl ActiveRules {
    fn scan(&self, event: &[u8]) -> ScanResult {
        let mut found: Vec<ScanMatch> = Vec::new();
        for (rule_idx, rule) in self.rules.iter().enumerate() {
            for m in rule.regex.find_iter(event) {
                if m.start() < m.end() && rule.accepts(event, m.start(), m.end()) {
                    found.push(ScanMatch {
                        rule_idx,
                        start: m.start(),
                        end: m.end(),
                    });
                }
            }
        }
        if found.is_empty() {
            return ScanResult::unmatched(event);
        }

        // earliest match wins; ties go to the rule defined first
        found.sort_by_key(|m| (m.start, m.rule_idx));
        let mut matches = Vec::with_capacity(found.len());
        let mut processed = Vec::with_capacity(event.len());
        let mut cursor = 0;
        for m in found {
            if m.start < cursor {
                continue;
            }
            processed.extend_from_slice(&event[cursor..m.start]);
            let matched = String::from_utf8_lossy(&event[m.start..m.end]);
            let action = &self.rules[m.rule_idx].config.match_action;
            processed.extend_from_slice(action.apply(&matched).as_bytes());
            cursor = m.end;
            matches.push(m);
        }
        processed.extend_from_slice(&event[cursor..]);

        ScanResult {
            matched: true,
            processed,
            matches,
        }
    }
}

#[derive(Default)]
struct Control {
    lifecycle: LifecycleState,
    standard: Option<StandardRulesConfig>,
    user: Option<UserConfig>,
}

/// Scanner with atomic hot-swap of its rules.
///
/// # Examples
///
/// ```rust
/// use secl_engine::{ReconfigureOrder, Scanner};
///
/// let scanner = Scanner::default();
/// scanner.reconfigure(ReconfigureOrder::StandardRules(br#"
///     {"priority":1,"rules":[{"id":"one-1","name":"one","description":"",
///       "definitions":[{"version":1,"pattern":"one"}]}]}"#.to_vec()))?;
/// let active = scanner.reconfigure(ReconfigureOrder::AgentConfig(br#"
///     {"is_enabled":true,"rules":[{"id":"r1","name":"one",
///       "definition":{"standard_rule_id":"one-1"},
///       "match_action":{"type":"Redact","placeholder":"[REDACTED]"},
///       "is_enabled":true}]}"#.to_vec()))?;
/// assert!(active);
///
/// let result = scanner.scan(b"one two three go!");
/// assert!(result.matched);
/// assert_eq!(result.processed, b"[REDACTED] two three go!");
/// # Ok::<(), secl_engine::PolicyError>(())
/// ```
pub struct Scanner {
    config: ScannerConfig,
    published: Published<ActiveRules>,
    control: Mutex<Control>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("generation", &self.published.generation())
            .finish()
    }
}

impl Scanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            published: Published::new(),
            control: Mutex::new(Control::default()),
        }
    }

    /// Scanner using the capabilities of an engine configuration.
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(config.scanner.clone())
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a reconfiguration order. Returns whether the scanner is active.
    pub fn reconfigure(&self, order: ReconfigureOrder) -> Result<bool> {
        let mut control = self.control();
        if control.lifecycle.state() == Lifecycle::Destroyed {
            return match order {
                ReconfigureOrder::StopProcessing => Ok(false),
                _ => Err(PolicyError::Config("scanner has been stopped".to_string())),
            };
        }

        match order {
            ReconfigureOrder::StopProcessing => {
                self.published.clear();
                control.lifecycle.destroy();
                control.standard = None;
                control.user = None;
                info!("scanner stopped");
                Ok(false)
            }
            ReconfigureOrder::StandardRules(bytes) => {
                let standard = StandardRulesConfig::from_slice(&bytes)?;
                debug!(rules = standard.rules.len(), "standard rules received");
                let active = match control.user.clone() {
                    Some(user) => self.apply(&mut control, &standard, &user)?,
                    None => {
                        control.lifecycle.configured(false);
                        false
                    }
                };
                control.standard = Some(standard);
                Ok(active)
            }
            ReconfigureOrder::AgentConfig(bytes) => {
                let user = UserConfig::from_slice(&bytes)?;
                let Some(standard) = control.standard.clone() else {
                    debug!("user configuration received before standard rules, retained");
                    control.user = Some(user);
                    return Ok(false);
                };
                let active = self.apply(&mut control, &standard, &user)?;
                control.user = Some(user);
                Ok(active)
            }
        }
    }

    fn apply(
        &self,
        control: &mut Control,
        standard: &StandardRulesConfig,
        user: &UserConfig,
    ) -> Result<bool> {
        let configured: Vec<RuleConfig> = user.enabled_rules().cloned().collect();
        if configured.is_empty() {
            self.published.clear();
            control.lifecycle.configured(false);
            info!(group_enabled = user.is_enabled, "no enabled scanner rule, scanner inactive");
            return Ok(false);
        }

        let mut rules = Vec::with_capacity(configured.len());
        for rule in &configured {
            let compiled = standard
                .rule(&rule.definition.standard_rule_id)
                .ok_or_else(|| {
                    PolicyError::UnknownStandardRule(rule.definition.standard_rule_id.clone())
                })
                .and_then(|std_rule| {
                    interpret_rule(rule, std_rule, &standard.defaults, &self.config)
                })
                .and_then(CompiledRule::compile);
            match compiled {
                Ok(compiled) => rules.push(compiled),
                Err(error) => {
                    warn!(
                        rule_id = %rule.id,
                        rule_name = %rule.name,
                        %error,
                        "scanner rule rejected"
                    );
                    return Err(error);
                }
            }
        }

        info!(rules = rules.len(), "publishing scanner rules");
        self.published
            .store(Arc::new(ActiveRules { rules, configured }));
        control.lifecycle.configured(true);
        Ok(true)
    }

    /// Scan one payload. Inactive scanners return the payload unchanged.
    pub fn scan(&self, event: &[u8]) -> ScanResult {
        match self.published.load() {
            Some(active) => {
                let result = active.scan(event);
                trace!(matched = result.matched, matches = result.matches.len(), "scanned event");
                result
            }
            None => ScanResult::unmatched(event),
        }
    }

    /// User rule at `idx` in the active configuration.
    pub fn rule_by_idx(&self, idx: usize) -> Result<RuleConfig> {
        let active = self
            .published
            .load()
            .ok_or_else(|| PolicyError::Config("scanner is not active".to_string()))?;
        active
            .configured
            .get(idx)
            .cloned()
            .ok_or_else(|| PolicyError::Config(format!("no configured rule at index {idx}")))
    }

    /// User rules in use, in definition order.
    pub fn configured_rules(&self) -> Vec<RuleConfig> {
        self.published
            .load()
            .map(|active| active.configured.clone())
            .unwrap_or_default()
    }

    /// Resolved rules in use, in definition order.
    pub fn scan_rules(&self) -> Vec<ScanRuleConfig> {
        self.published
            .load()
            .map(|active| active.rules.iter().map(|r| r.config.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.control().lifecycle.is_ready()
    }

    pub fn is_active(&self) -> bool {
        !self.published.is_empty()
    }

    pub fn state(&self) -> Lifecycle {
        self.control().lifecycle.state()
    }

    /// Stop the scanner. Concurrent scans finish on their own snapshot.
    pub fn delete(&self) {
        if let Err(error) = self.reconfigure(ReconfigureOrder::StopProcessing) {
            debug!(%error, "failed to stop scanner");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luhn() {
        assert!(luhn_valid(b"4111111111111111"));
        assert!(luhn_valid(b"4111-1111-1111-1111"));
        assert!(!luhn_valid(b"4111111111111112"));
        assert!(!luhn_valid(b"0"));
        assert!(!luhn_valid(b"41x1"));
    }

    #[test]
    fn test_window_start_counts_characters() {
        let text = "é12345".as_bytes();
        assert_eq!(window_start(text, text.len(), 5), 2);
        assert_eq!(window_start(text, text.len(), 6), 0);
        assert_eq!(window_start(text, text.len(), 60), 0);
    }

    #[test]
    fn test_keyword_window() {
        let matcher = KeywordMatcher::new(&ProximityConfig {
            look_ahead_character_count: 8,
            included_keywords: vec!["card".into()],
            excluded_keywords: Vec::new(),
        })
        .unwrap();
        let text = b"my CARD: 1234 and later 1234";
        assert!(matcher.accepts(text, 9));
        assert!(!matcher.accepts(text, 24));

        let matcher = KeywordMatcher::new(&ProximityConfig {
            look_ahead_character_count: 10,
            included_keywords: Vec::new(),
            excluded_keywords: vec!["trace-id".into()],
        })
        .unwrap();
        let text = b"trace-id=1234 value=1234";
        assert!(!matcher.accepts(text, 9));
        assert!(matcher.accepts(text, 20));
    }

    #[test]
    fn test_overlapping_matches_first_wins() {
        let rule = |pattern: &str, placeholder: &str| {
            CompiledRule::compile(ScanRuleConfig {
                id: pattern.to_string(),
                pattern: pattern.to_string(),
                match_action: crate::action::MatchAction::redact(placeholder),
                tags: Vec::new(),
                proximity: None,
                secondary_validator: None,
            })
            .unwrap()
        };
        let active = ActiveRules {
            rules: vec![rule("onetwo", "[A]"), rule("two", "[B]")],
            configured: Vec::new(),
        };
        let result = active.scan(b"onetwo two");
        assert_eq!(result.processed, b"[A] [B]");
        assert_eq!(result.matches.len(), 2);
    }
}
