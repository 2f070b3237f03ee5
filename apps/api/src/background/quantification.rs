//! Reconciles the model's X/Y/Z quantification claims against the bullet text.
//!
//! A bullet only counts as fully quantified when its text carries a measurable outcome.

use crate::background::models::{OtherBullet, XyzBullet};

const VAGUE_VERBS: &[&str] = &[
    "improved",
    "enhanced",
    "helped",
    "worked on",
    "assisted",
    "supported",
    "participated",
    "involved",
];

const VAGUE_SCALE_WORDS: &[&str] = &[
    "significant",
    "major",
    "large",
    "huge",
    "massive",
    "substantial",
    "considerable",
    "great",
    "many",
    "numerous",
    "various",
    "several",
];

const COMPONENTS: &[&str] = &["X", "Y", "Z"];

/// True when the text carries a measurement: a number, percentage, currency amount,
/// `~N` estimate or `Nx` multiplier.
pub fn has_measurable_outcome(text: &str) -> bool {
    let has_digit = text.chars().any(|c| c.is_ascii_digit());
    let has_percent = text.contains('%');
    let has_currency = text.contains('$') || text.contains('€') || text.contains('£');
    has_digit || has_percent || has_currency
}

/// Keeps `missing_components` to the known letters, uppercased, deduplicated and ordered.
pub fn normalize_components(components: &[String]) -> Vec<String> {
    COMPONENTS
        .iter()
        .filter(|c| {
            components
                .iter()
                .any(|m| m.trim().eq_ignore_ascii_case(c))
        })
        .map(|c| c.to_string())
        .collect()
}

/// Downgrades bullets that claim full quantification without a measurable outcome,
/// and keeps the flag consistent with `missing_components`.
pub fn reconcile_xyz_bullet(bullet: XyzBullet) -> XyzBullet {
    let mut missing = normalize_components(&bullet.missing_components);
    let text = bullet.text.trim().to_string();

    let mut fully_quantified = bullet.is_fully_quantified && missing.is_empty();
    if fully_quantified && !has_measurable_outcome(&text) {
        fully_quantified = false;
        missing.push("Y".to_string());
        missing = normalize_components(&missing);
    }
    if fully_quantified {
        missing.clear();
    }

    XyzBullet {
        text,
        is_fully_quantified: fully_quantified,
        missing_components: missing,
    }
}

/// Fills a missing `reason_not_quantified` from the wording of the bullet.
pub fn reconcile_other_bullet(bullet: OtherBullet) -> OtherBullet {
    let text = bullet.text.trim().to_string();
    let reason = if bullet.reason_not_quantified.trim().is_empty() {
        unquantified_reason(&text)
    } else {
        bullet.reason_not_quantified.trim().to_string()
    };
    OtherBullet {
        text,
        reason_not_quantified: reason,
    }
}

fn unquantified_reason(text: &str) -> String {
    let text_lower = text.to_lowercase();
    if let Some(vague) = VAGUE_VERBS.iter().find(|v| text_lower.contains(*v)) {
        return format!("Contains vague verb '{vague}' without quantified impact");
    }
    if let Some(vague) = VAGUE_SCALE_WORDS.iter().find(|v| text_lower.contains(*v)) {
        return format!("Uses vague scale word '{vague}' without a number");
    }
    "No quantified outcome found".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz(text: &str, quantified: bool, missing: &[&str]) -> XyzBullet {
        XyzBullet {
            text: text.to_string(),
            is_fully_quantified: quantified,
            missing_components: missing.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_measurable_with_percentage() {
        assert!(has_measurable_outcome("Reduced latency by 40% through caching"));
    }

    #[test]
    fn test_measurable_with_currency() {
        assert!(has_measurable_outcome("Saved $50,000 annually by optimizing queries"));
        assert!(has_measurable_outcome("Generated €200k in new revenue"));
    }

    #[test]
    fn test_measurable_with_estimate() {
        assert!(has_measurable_outcome("Reduced deployment time by ~2 hours"));
    }

    #[test]
    fn test_not_measurable_when_vague() {
        assert!(!has_measurable_outcome("Achieved significant performance improvements"));
        assert!(!has_measurable_outcome("Improved the user experience"));
    }

    #[test]
    fn test_quantified_claim_without_metric_is_downgraded() {
        let bullet = reconcile_xyz_bullet(xyz(
            "Accomplished faster checkout, measured by happier users, achieved via caching",
            true,
            &[],
        ));
        assert!(!bullet.is_fully_quantified);
        assert_eq!(bullet.missing_components, vec!["Y"]);
    }

    #[test]
    fn test_quantified_claim_with_metric_is_kept() {
        let bullet = reconcile_xyz_bullet(xyz(
            "Cut p99 latency, measured by a 40% drop, achieved via a Redis cache",
            true,
            &[],
        ));
        assert!(bullet.is_fully_quantified);
        assert!(bullet.missing_components.is_empty());
    }

    #[test]
    fn test_missing_components_are_normalized() {
        let bullet = reconcile_xyz_bullet(xyz("Shipped search", false, &["z", " x", "Q", "X"]));
        assert!(!bullet.is_fully_quantified);
        assert_eq!(bullet.missing_components, vec!["X", "Z"]);
    }

    #[test]
    fn test_quantified_flag_with_missing_components_is_cleared() {
        let bullet = reconcile_xyz_bullet(xyz("Served 1M users", true, &["Z"]));
        assert!(!bullet.is_fully_quantified);
        assert_eq!(bullet.missing_components, vec!["Z"]);
    }

    #[test]
    fn test_other_bullet_reason_filled() {
        let bullet = reconcile_other_bullet(OtherBullet {
            text: "Helped the team deliver projects".to_string(),
            reason_not_quantified: String::new(),
        });
        assert!(bullet.reason_not_quantified.contains("vague verb 'helped'"));

        let bullet = reconcile_other_bullet(OtherBullet {
            text: "Led various initiatives".to_string(),
            reason_not_quantified: "  ".to_string(),
        });
        assert!(bullet.reason_not_quantified.contains("vague scale word 'various'"));
    }

    #[test]
    fn test_other_bullet_reason_kept() {
        let bullet = reconcile_other_bullet(OtherBullet {
            text: "Mentored interns".to_string(),
            reason_not_quantified: "No count of interns given".to_string(),
        });
        assert_eq!(bullet.reason_not_quantified, "No count of interns given");
    }
}
