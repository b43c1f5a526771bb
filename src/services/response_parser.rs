//! Turns the model's free-text verdict into a [`GradingRecord`].
//!
//! The expected reply shape is `<student_id>-<score>-<comment>`. Only the first two
//! delimiters are structural; the comment keeps any further `-` verbatim.

use crate::schemas::grading::GradingRecord;

pub(crate) const FIELD_DELIMITER: char = '-';

/// Parses a raw reply. Never fails: malformed replies become `success == false`
/// records whose comment embeds the raw text.
pub(crate) fn parse(raw_text: &str, student_id: &str) -> GradingRecord {
    let raw = raw_text.trim();

    match split_fields(raw) {
        Some((score, comment)) => GradingRecord::graded(student_id, score, comment, raw),
        None => {
            tracing::warn!(student_id, raw_response = %raw, "Reply does not match grading format");
            GradingRecord::failed(student_id, format!("Malformed grading reply: {raw}"))
                .with_raw_response(raw)
        }
    }
}

fn split_fields(raw: &str) -> Option<(u32, &str)> {
    let mut parts = raw.splitn(3, FIELD_DELIMITER);
    let _reported_id = parts.next()?;
    let score_field = parts.next()?;
    let comment = parts.next()?.trim();

    if score_field.is_empty() || !score_field.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let score = score_field.parse::<u32>().ok()?;

    if comment.is_empty() {
        return None;
    }

    Some((score, comment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reply() {
        let record = parse("S002-98-代码逻辑清晰", "S002");
        assert!(record.success);
        assert_eq!(record.student_id, "S002");
        assert_eq!(record.score, 98);
        assert_eq!(record.comment, "代码逻辑清晰");
        assert_eq!(record.raw_response.as_deref(), Some("S002-98-代码逻辑清晰"));
        assert!(!record.from_cache);
    }

    #[test]
    fn comment_keeps_embedded_delimiters() {
        let record = parse("S001-92-handle empty list - and x-y edge cases", "S001");
        assert!(record.success);
        assert_eq!(record.score, 92);
        assert_eq!(record.comment, "handle empty list - and x-y edge cases");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let record = parse("  \nS003-100-excellent\n", "S003");
        assert!(record.success);
        assert_eq!(record.score, 100);
        assert_eq!(record.raw_response.as_deref(), Some("S003-100-excellent"));
    }

    #[test]
    fn record_uses_caller_student_id_not_reported_one() {
        let record = parse("WRONG-95-fine", "S004");
        assert!(record.success);
        assert_eq!(record.student_id, "S004");
    }

    #[test]
    fn garbage_is_a_failure_with_raw_text() {
        let record = parse("garbage", "S001");
        assert!(!record.success);
        assert_eq!(record.score, 0);
        assert!(record.comment.contains("garbage"));
        assert_eq!(record.raw_response.as_deref(), Some("garbage"));
    }

    #[test]
    fn non_integer_score_is_a_failure() {
        let record = parse("S001-abc-comment", "S001");
        assert!(!record.success);
        assert_eq!(record.score, 0);
        assert!(record.comment.contains("S001-abc-comment"));
    }

    #[test]
    fn signed_or_fractional_scores_are_failures() {
        for raw in [
            "S001-+95-ok",
            "S001--95-ok",
            "S001-95.5-ok",
            "S001- -ok",
            "S001- 95 -ok",
        ] {
            let record = parse(raw, "S001");
            assert!(!record.success, "{raw} should be rejected");
            assert!(record.comment.contains(raw));
        }
    }

    #[test]
    fn overflowing_score_is_a_failure() {
        let record = parse("S001-99999999999999999999-ok", "S001");
        assert!(!record.success);
    }

    #[test]
    fn empty_reply_is_a_failure() {
        let record = parse("", "S001");
        assert!(!record.success);
        assert_eq!(record.score, 0);
        assert_eq!(record.raw_response.as_deref(), Some(""));
    }

    #[test]
    fn missing_comment_is_a_failure() {
        for raw in ["S001-95", "S001-95-", "S001-95-   "] {
            let record = parse(raw, "S001");
            assert!(!record.success, "{raw} should be rejected");
        }
    }
}
