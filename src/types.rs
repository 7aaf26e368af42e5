use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mastery of one competency, 0 (novice) through 3 (mastered).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Level(u8);

impl Level {
    pub const ZERO: Level = Level(0);
    pub const ONE: Level = Level(1);
    pub const TWO: Level = Level(2);
    pub const MAX: Level = Level(3);

    pub const ALL: [Level; 4] = [Self::ZERO, Self::ONE, Self::TWO, Self::MAX];

    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn raise(self) -> Self {
        Self(self.0.saturating_add(1).min(Self::MAX.0))
    }

    pub fn lower(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Correct answers move one level up, wrong answers one level down.
    pub fn after_answer(self, is_correct: bool) -> Self {
        if is_correct {
            self.raise()
        } else {
            self.lower()
        }
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_mastered(self) -> bool {
        self == Self::MAX
    }
}

impl TryFrom<i64> for Level {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Level::new)
            .ok_or_else(|| format!("competency level out of range: {value}"))
    }
}

impl From<Level> for i64 {
    fn from(level: Level) -> Self {
        level.0 as i64
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyDefinition {
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Resolves a possibly-missing stored level. This is the only place where
/// "no row" turns into level 0.
pub fn effective_level(stored: Option<Level>) -> Level {
    stored.unwrap_or(Level::ZERO)
}

/// A persisted level. Only levels above zero are ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCompetencyRecord {
    pub profile_id: String,
    pub competency_id: String,
    pub level: Level,
    pub last_evaluated_at: DateTime<Utc>,
}

/// Sparse level snapshot for one profile: only competencies above level 0
/// are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProfileLevels {
    levels: HashMap<String, Level>,
}

impl ProfileLevels {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = UserCompetencyRecord>,
    {
        let levels = records
            .into_iter()
            .filter(|record| !record.level.is_zero())
            .map(|record| (record.competency_id, record.level))
            .collect();
        Self { levels }
    }

    /// Effective level of a competency. A competency with no stored level is
    /// at level 0.
    pub fn level(&self, competency_id: &str) -> Level {
        effective_level(self.levels.get(competency_id).copied())
    }

    pub fn stored(&self) -> impl Iterator<Item = (&str, Level)> {
        self.levels.iter().map(|(id, level)| (id.as_str(), *level))
    }

    pub fn stored_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub competency_name: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionWithLevel {
    #[serde(flatten)]
    pub question: Question,
    pub competency_id: String,
    pub level: Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelChange {
    pub previous_level: Level,
    pub new_level: Level,
}

impl LevelChange {
    pub fn is_changed(&self) -> bool {
        self.previous_level != self.new_level
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSummary {
    pub total: usize,
    pub novice: usize,
    pub learning: usize,
    pub proficient: usize,
    pub mastered: usize,
    pub mastered_ratio: f64,
}

impl LevelSummary {
    pub fn record(&mut self, level: Level) {
        self.total += 1;
        match level.value() {
            0 => self.novice += 1,
            1 => self.learning += 1,
            2 => self.proficient += 1,
            _ => self.mastered += 1,
        }
        self.mastered_ratio = self.mastered as f64 / self.total as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(competency_id: &str, level: u8) -> UserCompetencyRecord {
        UserCompetencyRecord {
            profile_id: "p1".to_string(),
            competency_id: competency_id.to_string(),
            level: Level::new(level).unwrap(),
            last_evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_level_transitions_are_clamped() {
        assert_eq!(Level::ZERO.after_answer(false), Level::ZERO);
        assert_eq!(Level::MAX.after_answer(true), Level::MAX);
        assert_eq!(Level::new(1).unwrap().after_answer(true), Level::new(2).unwrap());
        assert_eq!(Level::new(2).unwrap().after_answer(false), Level::new(1).unwrap());
    }

    #[test]
    fn test_level_try_from_rejects_out_of_range() {
        assert!(Level::try_from(-1).is_err());
        assert!(Level::try_from(4).is_err());
        assert_eq!(Level::try_from(3).unwrap(), Level::MAX);
    }

    #[test]
    fn test_level_serde_uses_integer() {
        let json = serde_json::to_string(&Level::new(2).unwrap()).unwrap();
        assert_eq!(json, "2");
        assert!(serde_json::from_str::<Level>("7").is_err());
    }

    #[test]
    fn test_missing_competency_is_level_zero() {
        let levels = ProfileLevels::from_records(vec![record("a", 2)]);
        assert_eq!(levels.level("a"), Level::new(2).unwrap());
        assert_eq!(levels.level("unknown"), Level::ZERO);
    }

    #[test]
    fn test_zero_records_are_not_kept() {
        let levels = ProfileLevels::from_records(vec![record("a", 0), record("b", 1)]);
        assert_eq!(levels.stored_count(), 1);
    }

    #[test]
    fn test_level_summary_counts() {
        let mut summary = LevelSummary::default();
        for value in [0, 0, 1, 3] {
            summary.record(Level::new(value).unwrap());
        }
        assert_eq!(summary.total, 4);
        assert_eq!(summary.novice, 2);
        assert_eq!(summary.mastered, 1);
        assert!((summary.mastered_ratio - 0.25).abs() < f64::EPSILON);
    }
}
