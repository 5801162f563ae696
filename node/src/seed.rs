//! Seed data loaded at startup

use ras_core::{Accord, AccordId, RasError, RasResult, Reviewer, ReviewerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reviewer entry with the bearer token it authenticates with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedReviewer {
    pub id: i64,
    pub email: String,
    pub token: String,
}

/// Topic groups and reviewers to load into a fresh node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub accords: Vec<Accord>,
    #[serde(default)]
    pub reviewers: Vec<SeedReviewer>,
}

impl SeedConfig {
    /// One accord and twelve reviewers; enough for the default panel
    pub fn sample() -> Self {
        Self::default()
            .add_accord(1, "general", "Anything that does not fit elsewhere")
            .add_reviewers(12)
    }

    pub fn add_accord(mut self, id: i64, name: &str, about: &str) -> Self {
        self.accords.push(Accord {
            id: AccordId(id),
            name: name.to_string(),
            about: about.to_string(),
        });
        self
    }

    /// Append `count` reviewers numbered after the current highest id
    pub fn add_reviewers(mut self, count: i64) -> Self {
        let start = self.reviewers.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        for id in start..start + count {
            self.reviewers.push(SeedReviewer {
                id,
                email: format!("reviewer{id}@example.org"),
                token: format!("reviewer-{id}-token"),
            });
        }
        self
    }

    /// Reject duplicate ids and tokens and malformed emails
    pub fn validate(&self) -> RasResult<()> {
        let mut accords = HashSet::new();
        for accord in &self.accords {
            if !accords.insert(accord.id) {
                return Err(RasError::Config(format!("duplicate accord id {}", accord.id.0)));
            }
        }

        let mut ids = HashSet::new();
        let mut tokens = HashSet::new();
        for reviewer in &self.reviewers {
            if !ids.insert(reviewer.id) {
                return Err(RasError::Config(format!("duplicate reviewer id {}", reviewer.id)));
            }
            if reviewer.token.trim().is_empty() || !tokens.insert(reviewer.token.as_str()) {
                return Err(RasError::Config(format!(
                    "reviewer {} needs a unique non-empty token",
                    reviewer.id
                )));
            }
        }
        self.reviewer_records().map(|_| ())
    }

    /// Durable reviewer records paired with their tokens
    pub fn reviewer_records(&self) -> RasResult<Vec<(Reviewer, String)>> {
        self.reviewers
            .iter()
            .map(|r| {
                let reviewer = Reviewer::new(ReviewerId(r.id), &r.email)
                    .map_err(|e| RasError::Config(e.to_string()))?;
                Ok((reviewer, r.token.clone()))
            })
            .collect()
    }

    pub fn to_json(&self) -> RasResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| RasError::Config(e.to_string()))
    }

    pub fn from_json(json: &str) -> RasResult<Self> {
        serde_json::from_str(json).map_err(|e| RasError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_valid() {
        let seed = SeedConfig::sample();
        assert!(seed.validate().is_ok());
        assert_eq!(seed.accords.len(), 1);
        assert_eq!(seed.reviewers.len(), 12);

        let restored = SeedConfig::from_json(&seed.to_json().unwrap()).unwrap();
        assert_eq!(restored.reviewers[11].id, 12);
    }

    #[test]
    fn test_add_reviewers_continues_numbering() {
        let seed = SeedConfig::default().add_reviewers(2).add_reviewers(3);
        let ids: Vec<i64> = seed.reviewers.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_validation_errors() {
        let mut seed = SeedConfig::sample();
        seed.reviewers[1].token = seed.reviewers[0].token.clone();
        assert!(seed.validate().is_err());

        let mut seed = SeedConfig::sample();
        seed.reviewers[3].email = "not-an-address".into();
        assert!(matches!(seed.validate(), Err(RasError::Config(_))));

        let seed = SeedConfig::sample().add_accord(1, "dup", "");
        assert!(seed.validate().is_err());
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let seed = SeedConfig::from_json(r#"{"accords": [{"id": 2, "name": "art"}]}"#).unwrap();
        assert_eq!(seed.accords[0].about, "");
        assert!(seed.reviewers.is_empty());
    }
}
