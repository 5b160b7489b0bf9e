use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Tasks whose total falls below this start out hidden.
pub const HIDDEN_THRESHOLD: u8 = 8;

/// A three-way tie only reads as "balanced" from this score upward. Lower
/// ties fall back to the category priority order.
pub const BALANCED_FLOOR: u8 = 2;

/// The sub-score dimension that dominates a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Consequence,
    Pride,
    Construction,
    Balanced,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consequence => "consequence",
            Self::Pride => "pride",
            Self::Construction => "construction",
            Self::Balanced => "balanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consequence" => Some(Self::Consequence),
            "pride" => Some(Self::Pride),
            "construction" => Some(Self::Construction),
            "balanced" => Some(Self::Balanced),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// The three 1-5 sub-scores of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub consequence: u8,
    pub pride: u8,
    pub construction: u8,
}

/// Everything computed from a full set of sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    pub total: u8,
    pub hidden: bool,
    pub dominant: Category,
}

impl Scores {
    pub fn new(consequence: u8, pride: u8, construction: u8) -> Self {
        Self {
            consequence,
            pride,
            construction,
        }
    }

    pub fn total(&self) -> u8 {
        compute_total(self.consequence, self.pride, self.construction)
    }

    /// Derive total, default visibility and dominant category.
    ///
    /// Callers must pass the fully merged score set, never only the fields
    /// that happened to change.
    pub fn derive(&self) -> Derived {
        let total = self.total();
        Derived {
            total,
            hidden: compute_hidden(total),
            dominant: compute_dominant_category(self.consequence, self.pride, self.construction),
        }
    }

    /// Iterate (field name, value) pairs in category priority order.
    pub fn fields(&self) -> [(&'static str, u8); 3] {
        [
            ("consequence", self.consequence),
            ("pride", self.pride),
            ("construction", self.construction),
        ]
    }
}

pub fn compute_total(consequence: u8, pride: u8, construction: u8) -> u8 {
    consequence + pride + construction
}

pub fn compute_hidden(total: u8) -> bool {
    total < HIDDEN_THRESHOLD
}

/// Strict maximum wins. Two-way ties resolve consequence > pride > construction.
pub fn compute_dominant_category(consequence: u8, pride: u8, construction: u8) -> Category {
    if consequence == pride && pride == construction && consequence >= BALANCED_FLOOR {
        return Category::Balanced;
    }
    let max = consequence.max(pride).max(construction);
    if consequence == max {
        Category::Consequence
    } else if pride == max {
        Category::Pride
    } else {
        Category::Construction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn total_is_sum() {
        assert_eq!(compute_total(1, 2, 3), 6);
        assert_eq!(Scores::new(5, 5, 5).total(), 15);
    }

    #[rstest]
    #[case(3, true)]
    #[case(7, true)]
    #[case(8, false)]
    #[case(15, false)]
    fn hidden_threshold(#[case] total: u8, #[case] hidden: bool) {
        assert_eq!(compute_hidden(total), hidden);
    }

    #[rstest]
    #[case(5, 5, 5, Category::Balanced)]
    #[case(3, 3, 3, Category::Balanced)]
    #[case(1, 1, 1, Category::Consequence)]
    #[case(2, 2, 2, Category::Balanced)]
    #[case(1, 1, 5, Category::Construction)]
    #[case(1, 4, 2, Category::Pride)]
    #[case(4, 4, 1, Category::Consequence)]
    #[case(1, 4, 4, Category::Pride)]
    #[case(4, 1, 4, Category::Consequence)]
    fn dominant_category(
        #[case] c: u8,
        #[case] p: u8,
        #[case] k: u8,
        #[case] expected: Category,
    ) {
        assert_eq!(compute_dominant_category(c, p, k), expected);
    }

    #[test]
    fn derive_combines_everything() {
        let derived = Scores::new(1, 1, 5).derive();
        assert_eq!(derived.total, 7);
        assert!(derived.hidden);
        assert_eq!(derived.dominant, Category::Construction);
    }

    #[test]
    fn category_parse_roundtrip() {
        for cat in [
            Category::Consequence,
            Category::Pride,
            Category::Construction,
            Category::Balanced,
        ] {
            assert_eq!(Category::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(Category::parse("Pride "), Some(Category::Pride));
        assert_eq!(Category::parse("urgency"), None);
    }
}
