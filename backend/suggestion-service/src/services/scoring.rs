//! Candidate score calculator.
//!
//! Pure and deterministic: same features and params always produce the same
//! score. Each positive feature contributes a bounded multiplier, the product
//! is normalized and clamped into `[min_score, max_score]`.

use crate::config::ScoringParams;
use crate::domain::CandidateFeatures;

/// Compute the relationship score for one candidate.
///
/// Activity multipliers are capped before they enter the product. Negative
/// activity inputs are treated as zero.
pub fn score_candidate(params: &ScoringParams, features: &CandidateFeatures) -> f64 {
    let recent_activity = features.recent_activity.max(0.0);
    let total_activity = features.total_activity.max(0.0);
    let account_age_days = features.account_age_days.max(0);

    let mut score = params.base;

    if recent_activity > 0.0 {
        let multiplier = 1.0 + recent_activity * params.recent_activity_weight;
        score *= multiplier.min(params.recent_activity_cap);
    }

    if total_activity > 0.0 {
        let multiplier = 1.0 + total_activity * params.total_activity_weight;
        score *= multiplier.min(params.total_activity_cap);
    }

    if features.mutual_friends > 0 {
        score *= 1.0 + features.mutual_friends as f64 * params.mutual_friend_weight;
    }

    if features.common_following > 0 {
        score *= 1.0 + features.common_following as f64 * params.common_following_weight;
    }

    if features.common_followers > 0 {
        score *= 1.0 + features.common_followers as f64 * params.common_follower_weight;
    }

    if features.is_public {
        score *= params.public_profile_multiplier;
    }

    if account_age_days < params.new_account_age_days {
        let remaining =
            (params.new_account_age_days - account_age_days) as f64 / params.new_account_age_days as f64;
        score *= 1.0 + params.new_account_max_boost * remaining;
    }

    let normalized = (score / params.normalizer).min(1.0);
    normalized.clamp(params.min_score, params.max_score)
}
