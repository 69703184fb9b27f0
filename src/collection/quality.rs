//! Milk quality scoring.
//!
//! Scores a measurement on five independent dimensions and derives the grade
//! and payment multiplier that determine the farmer's per-liter rate.
//!
//! Acidity is carried on [`QualityMeasurement`] but does not contribute to the
//! score. That asymmetry is intentional until product owners decide on an
//! acidity band.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::collection::models::QualityMeasurement;

/// Points awarded per dimension.
const OPTIMAL_POINTS: Decimal = dec!(2.0);
const ACCEPTABLE_POINTS: Decimal = dec!(1.5);
const POOR_POINTS: Decimal = dec!(0.5);

const MAX_SCORE: Decimal = dec!(10.0);

/// A reference band for one quality dimension.
#[derive(Debug, Clone, Copy)]
enum Limit {
    /// Inclusive on both ends.
    Within(Decimal, Decimal),
    /// Inclusive below, exclusive above.
    From(Decimal, Decimal),
    /// Strictly below the bound.
    Below(Decimal),
}

impl Limit {
    fn contains(self, value: Decimal) -> bool {
        match self {
            Limit::Within(lo, hi) => value >= lo && value <= hi,
            Limit::From(lo, hi) => value >= lo && value < hi,
            Limit::Below(bound) => value < bound,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Dimension {
    optimal: Limit,
    acceptable: Limit,
}

impl Dimension {
    fn points(&self, value: Decimal) -> Decimal {
        if self.optimal.contains(value) {
            OPTIMAL_POINTS
        } else if self.acceptable.contains(value) {
            ACCEPTABLE_POINTS
        } else {
            POOR_POINTS
        }
    }
}

const FAT: Dimension = Dimension {
    optimal: Limit::Within(dec!(3.5), dec!(4.5)),
    acceptable: Limit::From(dec!(3.0), dec!(5.0)),
};

const PROTEIN: Dimension = Dimension {
    optimal: Limit::Within(dec!(3.0), dec!(3.5)),
    acceptable: Limit::Within(dec!(2.5), dec!(4.0)),
};

const SNF: Dimension = Dimension {
    optimal: Limit::Within(dec!(8.5), dec!(9.5)),
    acceptable: Limit::Within(dec!(8.0), dec!(10.0)),
};

const TEMPERATURE: Dimension = Dimension {
    optimal: Limit::Within(dec!(2), dec!(4)),
    acceptable: Limit::Within(dec!(1), dec!(8)),
};

const BACTERIAL_COUNT: Dimension = Dimension {
    optimal: Limit::Below(dec!(1000)),
    acceptable: Limit::Below(dec!(10000)),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityGrade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::APlus => write!(f, "A+"),
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}

/// Outcome of scoring one measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Score in `[0, 10]`.
    pub score: Decimal,
    pub grade: QualityGrade,
    /// Factor applied to the base per-liter rate.
    pub payment_multiplier: Decimal,
}

impl QualityAssessment {
    /// Per-liter rate paid to the farmer for milk of this quality.
    pub fn rate_per_liter(&self, base_rate: Decimal) -> Decimal {
        base_rate * self.payment_multiplier
    }
}

/// Score a measurement.
///
/// Each dimension earns 2.0 (optimal), 1.5 (acceptable) or 0.5 (poor) points;
/// the sum is capped at 10.
pub fn score_quality(measurement: &QualityMeasurement) -> QualityAssessment {
    let total = FAT.points(measurement.fat_content)
        + PROTEIN.points(measurement.protein_content)
        + SNF.points(measurement.snf_content)
        + TEMPERATURE.points(measurement.temperature_c)
        + BACTERIAL_COUNT.points(measurement.bacterial_count_cfu_ml);

    let score = total.min(MAX_SCORE);

    QualityAssessment {
        score,
        grade: grade_for_score(score),
        payment_multiplier: multiplier_for_score(score),
    }
}

pub fn grade_for_score(score: Decimal) -> QualityGrade {
    if score >= dec!(9) {
        QualityGrade::APlus
    } else if score >= dec!(8) {
        QualityGrade::A
    } else if score >= dec!(6) {
        QualityGrade::B
    } else {
        QualityGrade::C
    }
}

pub fn multiplier_for_score(score: Decimal) -> Decimal {
    if score >= dec!(9) {
        dec!(1.10)
    } else if score >= dec!(8) {
        dec!(1.05)
    } else if score >= dec!(6) {
        dec!(1.00)
    } else {
        dec!(0.95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ideal() -> QualityMeasurement {
        QualityMeasurement {
            fat_content: dec!(4.0),
            protein_content: dec!(3.2),
            snf_content: dec!(8.8),
            acidity_level: dec!(0.14),
            temperature_c: dec!(3),
            bacterial_count_cfu_ml: dec!(500),
        }
    }

    #[test]
    fn test_ideal_milk_scores_ten() {
        let result = score_quality(&ideal());
        assert_eq!(result.score, dec!(10.0));
        assert_eq!(result.grade, QualityGrade::APlus);
        assert_eq!(result.payment_multiplier, dec!(1.10));
    }

    #[test]
    fn test_all_poor_scores_floor() {
        let m = QualityMeasurement {
            fat_content: dec!(1.0),
            protein_content: dec!(5.0),
            snf_content: dec!(12.0),
            acidity_level: dec!(0.30),
            temperature_c: dec!(25),
            bacterial_count_cfu_ml: dec!(500000),
        };
        let result = score_quality(&m);
        assert_eq!(result.score, dec!(2.5));
        assert_eq!(result.grade, QualityGrade::C);
        assert_eq!(result.payment_multiplier, dec!(0.95));
    }

    #[test]
    fn test_band_edges_are_inclusive() {
        let mut m = ideal();
        m.fat_content = dec!(3.5);
        assert_eq!(score_quality(&m).score, dec!(10.0));

        m.fat_content = dec!(3.0);
        assert_eq!(score_quality(&m).score, dec!(9.5));

        m.protein_content = dec!(4.0);
        assert_eq!(score_quality(&m).score, dec!(9.0));
    }

    #[test]
    fn test_fat_acceptable_band_excludes_upper_bound() {
        let mut m = ideal();
        m.fat_content = dec!(4.99);
        assert_eq!(score_quality(&m).score, dec!(9.5));

        m.fat_content = dec!(5.0);
        let result = score_quality(&m);
        assert_eq!(result.score, dec!(8.5));
        assert_eq!(result.grade, QualityGrade::A);
        assert_eq!(result.payment_multiplier, dec!(1.05));
    }

    #[test]
    fn test_bacterial_bounds_are_strict() {
        let mut m = ideal();
        m.bacterial_count_cfu_ml = dec!(1000);
        assert_eq!(score_quality(&m).score, dec!(9.5));

        m.bacterial_count_cfu_ml = dec!(10000);
        assert_eq!(score_quality(&m).score, dec!(8.5));
    }

    #[test]
    fn test_acidity_does_not_move_score() {
        let mut m = ideal();
        m.acidity_level = dec!(9.9);
        assert_eq!(score_quality(&m), score_quality(&ideal()));
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(grade_for_score(dec!(9.0)), QualityGrade::APlus);
        assert_eq!(grade_for_score(dec!(8.99)), QualityGrade::A);
        assert_eq!(grade_for_score(dec!(8.0)), QualityGrade::A);
        assert_eq!(grade_for_score(dec!(7.5)), QualityGrade::B);
        assert_eq!(grade_for_score(dec!(6.0)), QualityGrade::B);
        assert_eq!(grade_for_score(dec!(5.99)), QualityGrade::C);
    }

    #[test]
    fn test_rate_per_liter_applies_multiplier() {
        let assessment = QualityAssessment {
            score: dec!(8.5),
            grade: QualityGrade::A,
            payment_multiplier: multiplier_for_score(dec!(8.5)),
        };
        assert_eq!(assessment.rate_per_liter(dec!(40)), dec!(42.00));
    }

    #[test]
    fn test_grade_display() {
        assert_eq!(QualityGrade::APlus.to_string(), "A+");
        assert_eq!(QualityGrade::C.to_string(), "C");
    }
}
