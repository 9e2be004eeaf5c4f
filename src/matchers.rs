//! Predicate matchers for alert subscriptions and firm watchlists.
//!
//! Pure functions over a fine + one subscriber's criteria. All side effects
//! (ledger subtraction, sending, bookkeeping) live in the dispatch layer, so
//! everything here is directly testable with plain values.

use crate::models::{AlertSubscription, Fine, WatchlistEntry};

/// Canonical matching key for firm names: lower-cased and trimmed. Must stay
/// in lockstep with how `firm_name_normalized` is produced at sign-up time.
pub fn normalize_firm_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Does a fine satisfy an alert subscription's amount/category criteria?
///
/// Category matching is any-match on case-insensitive substrings: a subscriber
/// asking for "AML" matches a fine categorised "AML_FINANCIAL_CRIME". A fine
/// with no categories at all only matches subscriptions with no category
/// filter.
pub fn alert_matches(fine: &Fine, sub: &AlertSubscription) -> bool {
    if let Some(min_amount) = sub.min_amount {
        if fine.amount < min_amount {
            return false;
        }
    }

    if sub.breach_types.is_empty() {
        return true;
    }

    fine.breach_categories.iter().any(|category| {
        let category = category.to_lowercase();
        sub.breach_types
            .iter()
            .any(|wanted| category.contains(&wanted.to_lowercase()))
    })
}

/// Does a fine concern a watched firm?
///
/// Containment runs in both directions so that legal-entity suffixes don't
/// block a match ("barclays bank" watches "barclays bank plc" and vice versa).
/// Known limitation: a qualifier inserted mid-string defeats both directions —
/// "barclays bank plc" does NOT match "barclays bank uk plc". Changing this
/// needs product sign-off; the behaviour is asserted in tests as-is.
pub fn watchlist_matches(fine: &Fine, entry: &WatchlistEntry) -> bool {
    let fine_name = normalize_firm_name(&fine.firm_name);
    let watched = entry.firm_name_normalized.as_str();

    if fine_name.is_empty() || watched.is_empty() {
        return false;
    }

    if !fine_name.contains(watched) && !watched.contains(fine_name.as_str()) {
        return false;
    }

    match entry.notify_threshold {
        Some(threshold) => fine.amount >= threshold,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertFrequency, SubscriptionStatus};
    use chrono::NaiveDate;

    fn fine(firm: &str, amount: f64, categories: &[&str]) -> Fine {
        Fine {
            id: format!("fine-{firm}-{amount}"),
            firm_name: firm.to_string(),
            amount,
            date_issued: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            breach_type: categories.first().map(|c| c.to_string()),
            breach_categories: categories.iter().map(|c| c.to_string()).collect(),
            final_notice_url: None,
        }
    }

    fn alert_sub(min_amount: Option<f64>, breach_types: &[&str]) -> AlertSubscription {
        AlertSubscription {
            id: "sub-1".to_string(),
            email: "trader@example.com".to_string(),
            min_amount,
            breach_types: breach_types.iter().map(|c| c.to_string()).collect(),
            frequency: AlertFrequency::Immediate,
            status: SubscriptionStatus::Active,
            last_notified_at: None,
            unsubscribe_token: "tok".to_string(),
        }
    }

    fn watch(normalized: &str, threshold: Option<f64>) -> WatchlistEntry {
        WatchlistEntry {
            id: "watch-1".to_string(),
            email: "trader@example.com".to_string(),
            firm_name: normalized.to_string(),
            firm_name_normalized: normalized.to_string(),
            notify_threshold: threshold,
            status: SubscriptionStatus::Active,
            last_notified_at: None,
            unsubscribe_token: "tok".to_string(),
        }
    }

    #[test]
    fn amount_floor_rejects_below_minimum() {
        let sub = alert_sub(Some(5_000_000.0), &[]);

        assert!(!alert_matches(&fine("Acme", 4_999_999.99, &["AML"]), &sub));
        assert!(alert_matches(&fine("Acme", 5_000_000.0, &["AML"]), &sub));
        assert!(alert_matches(&fine("Acme", 6_000_000.0, &["AML"]), &sub));
    }

    #[test]
    fn category_any_match_semantics() {
        let sub = alert_sub(None, &["AML"]);

        assert!(alert_matches(&fine("A", 1000.0, &["AML", "GOVERNANCE"]), &sub));
        assert!(!alert_matches(&fine("B", 1000.0, &["MARKET_ABUSE"]), &sub));
    }

    #[test]
    fn category_match_is_case_insensitive_substring() {
        let sub = alert_sub(None, &["aml"]);

        // Subscriber label is a substring of the fine's category label.
        assert!(alert_matches(&fine("A", 1000.0, &["AML_FINANCIAL_CRIME"]), &sub));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let sub = alert_sub(None, &[]);

        assert!(alert_matches(&fine("A", 1.0, &["MARKET_ABUSE"]), &sub));
        assert!(alert_matches(&fine("B", 1.0, &[]), &sub));
    }

    #[test]
    fn uncategorised_fine_never_matches_filtered_subscription() {
        let sub = alert_sub(None, &["AML"]);

        assert!(!alert_matches(&fine("A", 1_000_000.0, &[]), &sub));
    }

    #[test]
    fn alert_scenario_floor_and_category() {
        let sub = alert_sub(Some(5_000_000.0), &["AML"]);

        let a = fine("A", 6_000_000.0, &["AML"]);
        let b = fine("B", 2_000_000.0, &["AML"]);
        let c = fine("C", 10_000_000.0, &["MARKET_ABUSE"]);

        let matched: Vec<&str> = [&a, &b, &c]
            .into_iter()
            .filter(|f| alert_matches(f, &sub))
            .map(|f| f.firm_name.as_str())
            .collect();

        assert_eq!(matched, vec!["A"]);
    }

    #[test]
    fn watchlist_containment_both_directions() {
        // Fine name extends the watched name.
        assert!(watchlist_matches(
            &fine("Barclays Bank plc", 1000.0, &[]),
            &watch("barclays bank", None),
        ));

        // Watched name extends the fine name.
        assert!(watchlist_matches(
            &fine("Barclays Bank", 1000.0, &[]),
            &watch("barclays bank plc", None),
        ));
    }

    #[test]
    fn watchlist_normalizes_case_and_whitespace() {
        assert!(watchlist_matches(
            &fine("  BARCLAYS BANK PLC  ", 1000.0, &[]),
            &watch("barclays bank plc", None),
        ));
    }

    #[test]
    fn watchlist_mid_string_qualifier_breaks_containment() {
        // Neither string contains the other contiguously once "uk" is inserted.
        // Documented limitation of the bidirectional-substring rule.
        assert!(!watchlist_matches(
            &fine("Barclays Bank UK plc", 1000.0, &[]),
            &watch("barclays bank plc", None),
        ));
    }

    #[test]
    fn watchlist_threshold_applies_after_name_match() {
        let entry = watch("barclays bank plc", Some(1_000_000.0));

        assert!(!watchlist_matches(&fine("Barclays Bank plc", 999_999.0, &[]), &entry));
        assert!(watchlist_matches(&fine("Barclays Bank plc", 1_000_000.0, &[]), &entry));
    }

    #[test]
    fn watchlist_empty_names_never_match() {
        assert!(!watchlist_matches(&fine("", 1000.0, &[]), &watch("barclays", None)));
        assert!(!watchlist_matches(&fine("Barclays", 1000.0, &[]), &watch("", None)));
    }
}
