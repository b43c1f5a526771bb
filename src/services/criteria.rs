use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

pub(crate) const SYSTEM_PROMPT: &str =
    "You are a strict and professional teaching assistant for a programming course.";

const DEFAULT_ALLOWED_SCORES: [u32; 7] = [100, 98, 97, 96, 95, 92, 90];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct ScoreRange {
    pub(crate) min: u32,
    pub(crate) max: u32,
    pub(crate) probability: f64,
}

/// Scoring policy embedded in every grading prompt.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub(crate) struct GradingCriteria {
    pub(crate) score_ranges: BTreeMap<String, ScoreRange>,
    pub(crate) deduction_items: BTreeMap<String, i32>,
    pub(crate) bonus_items: BTreeMap<String, i32>,
    #[validate(length(min = 1, message = "allowed_scores must not be empty"))]
    pub(crate) allowed_scores: Vec<u32>,
    #[validate(length(min = 1, message = "requirements must not be empty"))]
    pub(crate) requirements: Vec<String>,
}

#[derive(Debug, Error)]
pub(crate) enum CriteriaError {
    #[error("failed to read grading criteria {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid grading criteria {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("invalid grading criteria: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl Default for GradingCriteria {
    fn default() -> Self {
        let score_ranges = [
            ("excellent", 97, 100, 0.35),
            ("very_good", 95, 96, 0.40),
            ("good", 92, 94, 0.20),
            ("pass", 90, 91, 0.05),
        ]
        .into_iter()
        .map(|(name, min, max, probability)| {
            (name.to_string(), ScoreRange { min, max, probability })
        })
        .collect();

        let deduction_items = [
            ("no_error_handling", -3),
            ("poor_code_style", -2),
            ("missing_edge_cases", -5),
            ("inefficient_algorithm", -3),
        ]
        .into_iter()
        .map(|(name, points)| (name.to_string(), points))
        .collect();

        let bonus_items = [
            ("elegant_solution", 2),
            ("comprehensive_error_handling", 3),
            ("excellent_documentation", 2),
        ]
        .into_iter()
        .map(|(name, points)| (name.to_string(), points))
        .collect();

        let requirements = vec![
            "A functionally correct solution earns at least 92.".to_string(),
            "Code quality, edge-case handling and style may earn extra points.".to_string(),
            "Adjust the final score using the deduction and bonus items.".to_string(),
            "Prefer high scores; the class average should be around 96.".to_string(),
            "Below 95, give a concise comment (at most 20 words) naming the main mistake."
                .to_string(),
            "At 95 or above, give an encouraging comment.".to_string(),
        ];

        Self {
            score_ranges,
            deduction_items,
            bonus_items,
            allowed_scores: DEFAULT_ALLOWED_SCORES.to_vec(),
            requirements,
        }
    }
}

impl GradingCriteria {
    /// Reads a JSON rubric; keys missing from the file keep their built-in defaults.
    pub(crate) fn from_file(path: &Path) -> Result<Self, CriteriaError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| CriteriaError::Read { path: display.clone(), source })?;
        let criteria: Self = serde_json::from_str(&raw)
            .map_err(|source| CriteriaError::Parse { path: display, source })?;
        criteria.validate()?;
        Ok(criteria)
    }

    pub(crate) fn allows(&self, score: u32) -> bool {
        self.allowed_scores.contains(&score)
    }

    /// User message for one submission: rubric, reference, submission, output format.
    pub(crate) fn build_prompt(
        &self,
        student_id: &str,
        submission: &str,
        reference: &str,
    ) -> String {
        let rubric = serde_json::json!({
            "score_ranges": self.score_ranges,
            "deduction_items": self.deduction_items,
            "bonus_items": self.bonus_items,
        });
        let rubric = serde_json::to_string_pretty(&rubric).unwrap_or_default();
        let requirements = self
            .requirements
            .iter()
            .enumerate()
            .map(|(idx, line)| format!("{}. {line}", idx + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let allowed = self
            .allowed_scores
            .iter()
            .map(|score| score.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "### Role and task ###\n\
             You grade a student's programming assignment objectively against the reference \
             solution and the grading criteria below.\n\n\
             ### Grading criteria ###\n{rubric}\n\n\
             ### Requirements ###\n{requirements}\n\
             The score must be exactly one of: {allowed}.\n\n\
             ### Assignment ###\n\
             - Student ID: {student_id}\n\
             - Reference solution:\n```\n{reference}\n```\n\
             - Student submission:\n```\n{submission}\n```\n\n\
             ### Output format ###\n\
             Reply with exactly one line in the form \"<student_id>-<score>-<comment>\".\n\
             Example: \"S001-92-Handle the empty list case\"\n"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_criteria_are_valid() {
        let criteria = GradingCriteria::default();
        assert!(criteria.validate().is_ok());
        assert!(criteria.allows(96));
        assert!(!criteria.allows(94));
        assert_eq!(criteria.score_ranges["excellent"].min, 97);
    }

    #[test]
    fn prompt_embeds_rubric_reference_and_submission() {
        let criteria = GradingCriteria::default();
        let prompt = criteria.build_prompt("S007", "print('student')", "print('reference')");

        assert!(prompt.contains("S007"));
        assert!(prompt.contains("print('student')"));
        assert!(prompt.contains("print('reference')"));
        assert!(prompt.contains("missing_edge_cases"));
        assert!(prompt.contains("100, 98, 97, 96, 95, 92, 90"));
        assert!(prompt.contains("<student_id>-<score>-<comment>"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("criteria.json");
        std::fs::write(&path, r#"{"allowed_scores": [100, 80]}"#).unwrap();

        let criteria = GradingCriteria::from_file(&path).expect("criteria");
        assert_eq!(criteria.allowed_scores, vec![100, 80]);
        assert!(criteria.deduction_items.contains_key("poor_code_style"));
        assert!(!criteria.requirements.is_empty());
    }

    #[test]
    fn empty_allowed_scores_fail_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("criteria.json");
        std::fs::write(&path, r#"{"allowed_scores": []}"#).unwrap();

        let err = GradingCriteria::from_file(&path).expect_err("should fail");
        assert!(matches!(err, CriteriaError::Invalid(_)));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("criteria.json");
        std::fs::write(&path, "not json").unwrap();

        let err = GradingCriteria::from_file(&path).expect_err("should fail");
        assert!(matches!(err, CriteriaError::Parse { .. }));
    }
}
