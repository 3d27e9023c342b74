// 🎭 Account Masking - irreversible redaction with exposure-dependent reveal
//
// Never-seen account:   XXXXXX7890  (last 4)
// Short mask stored:    XXXXX67890  (last 5)

use crate::config::IngestConfig;
use crate::error::StoreError;
use crate::store::{ExistsQuery, TransactionLookup};

/// Mask an account number, keeping only its trailing characters
///
/// - empty / absent → `None`
/// - already contains the mask character (any case) → unchanged
/// - `short_account_len` characters or fewer → unchanged
/// - otherwise everything but the last 4 (or 5 with `reveal_extended`) is masked
pub fn mask_account(raw: Option<&str>, reveal_extended: bool, config: &IngestConfig) -> Option<String> {
    let account = raw?.trim();
    if account.is_empty() {
        return None;
    }

    if is_masked(account, config.mask_char) {
        return Some(account.to_string());
    }

    let chars: Vec<char> = account.chars().collect();
    if chars.len() <= config.short_account_len {
        return Some(account.to_string());
    }

    let reveal = if reveal_extended {
        config.extended_reveal_digits
    } else {
        config.reveal_digits
    }
    .min(chars.len());

    let hidden = chars.len() - reveal;
    let mut masked: String = std::iter::repeat(config.mask_char).take(hidden).collect();
    masked.extend(&chars[hidden..]);
    Some(masked)
}

fn is_masked(account: &str, mask_char: char) -> bool {
    let lower = mask_char.to_lowercase().next().unwrap_or(mask_char);
    account
        .chars()
        .any(|c| c.to_lowercase().next().unwrap_or(c) == lower)
}

// ============================================================================
// MASK POLICY
// ============================================================================

/// Reveal length shared by every record of one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaskPolicy {
    pub reveal_extended: bool,
}

impl MaskPolicy {
    /// Decide the policy from the first record's account number
    ///
    /// If the short (4-character) mask of that number is already stored, the
    /// whole upload switches to the extended reveal.
    pub fn resolve<L: TransactionLookup + ?Sized>(
        store: &L,
        first_account: Option<&str>,
        config: &IngestConfig,
    ) -> Result<Self, StoreError> {
        let Some(short_mask) = mask_account(first_account, false, config) else {
            tracing::debug!("No account number on first record, using standard mask");
            return Ok(MaskPolicy::default());
        };

        let reveal_extended = store.exists(&ExistsQuery::MaskedAccount(&short_mask))?;
        tracing::debug!(
            "Masked account {} already stored: {}",
            short_mask,
            reveal_extended
        );

        Ok(MaskPolicy { reveal_extended })
    }

    pub fn apply(&self, raw: Option<&str>, config: &IngestConfig) -> Option<String> {
        mask_account(raw, self.reveal_extended, config)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn mask(raw: &str, extended: bool) -> Option<String> {
        mask_account(Some(raw), extended, &IngestConfig::default())
    }

    /// Lookup double answering masked-account queries from a fixed set
    struct KnownMasks(HashSet<String>);

    impl TransactionLookup for KnownMasks {
        fn exists(&self, query: &ExistsQuery<'_>) -> Result<bool, StoreError> {
            match query {
                ExistsQuery::MaskedAccount(m) => Ok(self.0.contains(*m)),
                _ => Ok(false),
            }
        }
    }

    #[test]
    fn test_standard_mask_reveals_four() {
        assert_eq!(mask("1234567890", false), Some("XXXXXX7890".to_string()));
    }

    #[test]
    fn test_extended_mask_reveals_five() {
        assert_eq!(mask("1234567890", true), Some("XXXXX67890".to_string()));
    }

    #[test]
    fn test_mask_is_idempotent() {
        let once = mask("1234567890", false).unwrap();
        assert_eq!(mask(&once, false), Some(once.clone()));
        assert_eq!(mask(&once, true), Some(once.clone()));

        // Lower-case placeholder also counts as masked
        assert_eq!(mask("xxxx5678", false), Some("xxxx5678".to_string()));
    }

    #[test]
    fn test_short_input_unchanged() {
        assert_eq!(mask("1234", false), Some("1234".to_string()));
        assert_eq!(mask("12", true), Some("12".to_string()));
    }

    #[test]
    fn test_five_chars_extended_reveals_everything() {
        assert_eq!(mask("12345", false), Some("X2345".to_string()));
        assert_eq!(mask("12345", true), Some("12345".to_string()));
    }

    #[test]
    fn test_empty_input_is_none() {
        assert_eq!(mask("", false), None);
        assert_eq!(mask("   ", false), None);
        assert_eq!(mask_account(None, true, &IngestConfig::default()), None);
    }

    #[test]
    fn test_input_is_trimmed() {
        assert_eq!(mask(" 1234567890 ", false), Some("XXXXXX7890".to_string()));
    }

    #[test]
    fn test_reveal_counts_for_long_inputs() {
        for len in 6..20 {
            let raw: String = (0..len).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
            let standard = mask(&raw, false).unwrap();
            let extended = mask(&raw, true).unwrap();

            assert_eq!(standard.len(), len);
            assert_eq!(standard.chars().filter(|c| *c != 'X').count(), 4);
            assert_eq!(extended.chars().filter(|c| *c != 'X').count(), 5);
            assert!(raw.ends_with(&standard[len - 4..]));
        }
    }

    #[test]
    fn test_policy_switches_when_short_mask_stored() {
        let config = IngestConfig::default();
        let seen = KnownMasks(HashSet::from(["XXXXXX7890".to_string()]));
        let unseen = KnownMasks(HashSet::new());

        let policy = MaskPolicy::resolve(&seen, Some("1234567890"), &config).unwrap();
        assert!(policy.reveal_extended);
        assert_eq!(
            policy.apply(Some("1234567890"), &config),
            Some("XXXXX67890".to_string())
        );

        let policy = MaskPolicy::resolve(&unseen, Some("1234567890"), &config).unwrap();
        assert!(!policy.reveal_extended);
    }

    #[test]
    fn test_policy_without_account_is_standard() {
        let config = IngestConfig::default();
        let seen = KnownMasks(HashSet::new());
        let policy = MaskPolicy::resolve(&seen, None, &config).unwrap();
        assert_eq!(policy, MaskPolicy::default());
    }
}
