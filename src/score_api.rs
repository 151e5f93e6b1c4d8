use serde_json::Value;

use crate::constants::{MAX_NAME_LEN, MIN_NAME_LEN, MIN_STAGE};
use crate::error::ScoreError;
use crate::ranking_store::RankingStore;
use crate::server_utils::round_time_hundredths;
use crate::types::{ScoreSubmission, StageRecord, SubmitOutcome};

/// Validates submissions and forwards accepted ones to the ranking store.
pub struct ScoreApi {
    store: RankingStore,
    max_stage: i64,
}

impl ScoreApi {
    pub fn new(store: RankingStore, max_stage: i64) -> Self {
        Self { store, max_stage }
    }

    pub async fn submit_score(&self, body: &Value) -> Result<SubmitOutcome, ScoreError> {
        let submission = validate_submission(body, self.max_stage)?;
        Ok(self.store.submit(&submission).await?)
    }

    pub async fn list_records(&self) -> Result<Vec<StageRecord>, ScoreError> {
        Ok(self.store.list_records().await?)
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}

/// Checks stage, then name, then time, and returns the normalized entry.
pub fn validate_submission(body: &Value, max_stage: i64) -> Result<ScoreSubmission, ScoreError> {
    let stage = body
        .get("stage")
        .and_then(coerce_number)
        .filter(|stage| stage.fract() == 0.0)
        .filter(|stage| (MIN_STAGE as f64..=max_stage as f64).contains(stage))
        .ok_or_else(|| ScoreError::invalid("stage", "Invalid stage"))? as i64;

    let name = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ScoreError::invalid("name", "Invalid name"))?
        .trim();
    let length = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&length) {
        return Err(ScoreError::invalid("name", "Invalid name length"));
    }
    if !name.chars().all(is_name_char) {
        return Err(ScoreError::invalid("name", "Invalid name characters"));
    }

    let time = body
        .get("time")
        .and_then(coerce_number)
        .filter(|time| time.is_finite() && *time > 0.0)
        .map(round_time_hundredths)
        .filter(|time| time.is_finite() && *time > 0.0)
        .ok_or_else(|| ScoreError::invalid("time", "Invalid time"))?;

    Ok(ScoreSubmission {
        stage,
        name: name.to_string(),
        time,
    })
}

/// Letters and digits in the `char::is_alphabetic` sense, which also admits
/// combining vowel signs of scripts such as Devanagari.
fn is_name_char(c: char) -> bool {
    c.is_alphabetic() || c.is_numeric() || c == ' ' || c == '_' || c == '-'
}

/// JSON numbers, or strings holding one (the browser client sometimes
/// serializes form values as text).
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RetentionPolicy;
    use serde_json::json;

    fn field_of(result: Result<ScoreSubmission, ScoreError>) -> &'static str {
        match result {
            Err(ScoreError::InvalidInput { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_and_normalizes_valid_submission() {
        let submission =
            validate_submission(&json!({"stage": 1, "name": "  Al ", "time": 12.345}), 3)
                .expect("valid submission");
        assert_eq!(
            submission,
            ScoreSubmission {
                stage: 1,
                name: "Al".to_string(),
                time: 12.35,
            }
        );
    }

    #[test]
    fn stage_must_be_integer_in_range() {
        for stage in [json!(0), json!(4), json!(1.5), json!("x"), json!(null)] {
            let body = json!({"stage": stage, "name": "Al", "time": 1.0});
            assert_eq!(field_of(validate_submission(&body, 3)), "stage");
        }
        let body = json!({"stage": "2", "name": "Al", "time": 1.0});
        assert_eq!(validate_submission(&body, 3).expect("numeric string").stage, 2);
        let body = json!({"stage": 5, "name": "Al", "time": 1.0});
        assert!(validate_submission(&body, 5).is_ok());
    }

    #[test]
    fn name_length_boundaries() {
        let check = |name: String| validate_submission(&json!({"stage": 1, "name": name, "time": 1.0}), 3);
        assert!(check("ab".to_string()).is_ok());
        assert_eq!(field_of(check("a".to_string())), "name");
        assert!(check("a".repeat(32)).is_ok());
        assert_eq!(field_of(check("a".repeat(33))), "name");
    }

    #[test]
    fn name_charset_is_restricted() {
        assert!(validate_submission(&json!({"stage": 1, "name": "Zoë_9 x-y", "time": 1.0}), 3).is_ok());
        match validate_submission(&json!({"stage": 1, "name": "<b>hi</b>", "time": 1.0}), 3) {
            Err(ScoreError::InvalidInput { field, message }) => {
                assert_eq!(field, "name");
                assert_eq!(message, "Invalid name characters");
            }
            other => panic!("expected charset error, got {other:?}"),
        }
        let hindi = validate_submission(&json!({"stage": 1, "name": "किरण", "time": 1.0}), 3);
        assert_eq!(hindi.expect("combining vowel sign accepted").name, "किरण");
        let body = json!({"stage": 1, "name": 42, "time": 1.0});
        assert_eq!(field_of(validate_submission(&body, 3)), "name");
    }

    #[test]
    fn time_boundaries() {
        let check = |time: Value| validate_submission(&json!({"stage": 1, "name": "Al", "time": time}), 3);
        assert_eq!(field_of(check(json!(0))), "time");
        assert_eq!(field_of(check(json!(-1.0))), "time");
        assert_eq!(field_of(check(json!("abc"))), "time");
        assert_eq!(field_of(check(json!(0.004))), "time");
        assert_eq!(field_of(check(json!(1e307))), "time");
        assert_eq!(field_of(check(json!(f64::MAX))), "time");
        assert_eq!(check(json!(0.01)).expect("smallest time").time, 0.01);
    }

    #[tokio::test]
    async fn invalid_submission_does_not_touch_store() {
        let store = RankingStore::in_memory(RetentionPolicy::SingleBest)
            .await
            .expect("open store");
        let api = ScoreApi::new(store, 3);
        let result = api
            .submit_score(&json!({"stage": 9, "name": "Al", "time": 1.0}))
            .await;
        assert!(matches!(
            result,
            Err(ScoreError::InvalidInput { field: "stage", .. })
        ));
        assert!(api.list_records().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn accepted_submission_round_trips_through_listing() {
        let store = RankingStore::in_memory(RetentionPolicy::TopK(3))
            .await
            .expect("open store");
        let api = ScoreApi::new(store, 3);
        api.submit_score(&json!({"stage": 3, "name": "Runner", "time": 33.333}))
            .await
            .expect("submit");
        let records = api.list_records().await.expect("list");
        assert_eq!(
            records,
            vec![StageRecord {
                stage: 3,
                name: "Runner".to_string(),
                time: 33.33
            }]
        );
    }
}
