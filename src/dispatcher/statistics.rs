use crate::taxonomy::{ErrorCategory, ErrorLevel, TaxonomyError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Running counters over every error reported to the dispatcher
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ErrorStatistics {
    pub total: u64,
    pub by_level: HashMap<ErrorLevel, u64>,
    pub by_category: HashMap<ErrorCategory, u64>,
    pub by_component: HashMap<String, u64>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub most_frequent_category: Option<ErrorCategory>,
}

impl ErrorStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `error`
    pub fn record(&mut self, error: &TaxonomyError) {
        self.total += 1;
        *self.by_level.entry(error.level).or_insert(0) += 1;
        *self.by_category.entry(error.category()).or_insert(0) += 1;
        if let Some(component) = error.component() {
            *self.by_component.entry(component.to_string()).or_insert(0) += 1;
        }
        self.last_error_time = Some(error.context.timestamp);
        self.most_frequent_category = self.compute_most_frequent();
    }

    pub fn level_count(&self, level: ErrorLevel) -> u64 {
        self.by_level.get(&level).copied().unwrap_or(0)
    }

    pub fn category_count(&self, category: ErrorCategory) -> u64 {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn component_count(&self, component: &str) -> u64 {
        self.by_component.get(component).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // Ties resolve to the category declared first
    fn compute_most_frequent(&self) -> Option<ErrorCategory> {
        ErrorCategory::ALL
            .iter()
            .filter_map(|category| {
                self.by_category
                    .get(category)
                    .filter(|count| **count > 0)
                    .map(|count| (*category, *count))
            })
            .fold(None, |best: Option<(ErrorCategory, u64)>, (category, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((category, count)),
            })
            .map(|(category, _)| category)
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    // Totals always equal the sum over levels and over categories
    #[quickcheck]
    fn prop_totals_are_consistent(picks: Vec<(u8, u8)>) -> bool {
        let mut stats = ErrorStatistics::new();
        for (category, level) in &picks {
            let category = ErrorCategory::ALL[*category as usize % ErrorCategory::ALL.len()];
            let level = ErrorLevel::ALL[*level as usize % ErrorLevel::ALL.len()];
            let error = match category {
                ErrorCategory::FileSystem => TaxonomyError::file_system("e", None),
                ErrorCategory::Parsing => TaxonomyError::parsing("e", None),
                ErrorCategory::Provider => {
                    TaxonomyError::provider("e", crate::taxonomy::ProviderType::Decoration)
                }
                ErrorCategory::Command => TaxonomyError::command("e", "c"),
                ErrorCategory::Configuration => TaxonomyError::configuration("e", "k"),
                ErrorCategory::Network => TaxonomyError::network("e", "u", None),
                ErrorCategory::Unknown => TaxonomyError::unknown("e"),
            }
            .with_level(level);
            stats.record(&error);
        }

        let by_level: u64 = stats.by_level.values().sum();
        let by_category: u64 = stats.by_category.values().sum();
        stats.total == picks.len() as u64 && by_level == stats.total && by_category == stats.total
    }
}
