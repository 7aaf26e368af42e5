use std::collections::HashMap;

use serde::Serialize;

use crate::config::AllocationWeights;
use crate::services::catalog::CompetencyCatalog;
use crate::types::{CompetencyDefinition, Level, ProfileLevels};

/// Levels in the order they claim budget. Mastered competencies are never
/// served.
const PRIORITY: [Level; 3] = [Level::TWO, Level::ONE, Level::ZERO];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub competency_id: String,
    pub level: Level,
    pub count: usize,
}

/// Question quota per competency, in serving order. Zero quotas are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AllocationPlan {
    entries: Vec<Allocation>,
}

impl AllocationPlan {
    pub fn get(&self, competency_id: &str) -> usize {
        self.entries
            .iter()
            .find(|entry| entry.competency_id == competency_id)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|entry| entry.count).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.entries.iter()
    }

    pub fn to_map(&self) -> HashMap<String, usize> {
        self.entries
            .iter()
            .map(|entry| (entry.competency_id.clone(), entry.count))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AllocationEngine {
    weights: AllocationWeights,
}

impl AllocationEngine {
    pub fn new(weights: AllocationWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &AllocationWeights {
        &self.weights
    }

    /// Splits `max_questions` across catalog competencies, lowest mastery
    /// getting the most practice and higher levels claiming budget first.
    pub fn plan(
        &self,
        catalog: &CompetencyCatalog,
        levels: &ProfileLevels,
        max_questions: usize,
    ) -> AllocationPlan {
        if max_questions == 0 || catalog.is_empty() {
            return AllocationPlan::default();
        }

        let mut groups: [Vec<&CompetencyDefinition>; 4] = Default::default();
        for definition in catalog.iter() {
            let level = levels.level(&definition.id);
            groups[level.value() as usize].push(definition);
        }

        let mut level_totals = [0usize; 4];
        let mut remaining = max_questions;
        for level in PRIORITY {
            let members = &groups[level.value() as usize];
            let weight = self.weights.weight(level);
            if members.is_empty() || weight == 0 {
                continue;
            }
            if remaining == 0 {
                break;
            }
            let demand = members.len().saturating_mul(weight);
            if demand <= remaining {
                level_totals[level.value() as usize] = demand;
                remaining -= demand;
            } else {
                level_totals[level.value() as usize] = remaining;
                remaining = 0;
                break;
            }
        }

        let mut entries = Vec::new();
        for level in PRIORITY {
            let members = &groups[level.value() as usize];
            let total = level_totals[level.value() as usize];
            let mut counts = split_evenly(total, members.len());

            if level.is_zero() && remaining > 0 && !members.is_empty() {
                let per_member = remaining.div_ceil(members.len());
                for count in counts.iter_mut() {
                    let extra = per_member.min(remaining);
                    *count += extra;
                    remaining -= extra;
                }
            }

            entries.extend(
                members
                    .iter()
                    .zip(counts)
                    .filter(|(_, count)| *count > 0)
                    .map(|(definition, count)| Allocation {
                        competency_id: definition.id.clone(),
                        level,
                        count,
                    }),
            );
        }

        let plan = AllocationPlan { entries };
        tracing::debug!(
            max_questions,
            allocated = plan.total(),
            competencies = plan.len(),
            mastered = groups[Level::MAX.value() as usize].len(),
            "allocation plan computed"
        );
        plan
    }
}

/// `total` spread over `count` slots; the first `total % count` slots get one
/// more than the rest.
fn split_evenly(total: usize, count: usize) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    let base = total / count;
    let extra = total % count;
    (0..count)
        .map(|idx| if idx < extra { base + 1 } else { base })
        .collect()
}
