//! Data exchanged between the pipeline stages.
//!
//! Field names serialize in camelCase because the same shapes are shown to
//! models as structured-output targets and returned to callers as JSON.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::llm::StructuredOutput;

/// One exam question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Question text, posed verbatim to every candidate.
    pub text: String,
    /// Maximum score a perfect answer earns.
    #[serde(alias = "full_score", deserialize_with = "lenient_u32")]
    pub full_score: u32,
}

impl Question {
    pub fn new(text: impl Into<String>, full_score: u32) -> Self {
        Self {
            text: text.into(),
            full_score,
        }
    }
}

/// The generated exam shared by all candidates of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestKit {
    pub questions: Vec<Question>,
    #[serde(default = "Utc::now", alias = "generated_at")]
    pub generated_at: DateTime<Utc>,
}

impl TestKit {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            generated_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Sum of all questions' full scores; the best total a candidate can reach.
    pub fn total_full_score(&self) -> u64 {
        self.questions.iter().map(|q| u64::from(q.full_score)).sum()
    }

    /// Full score of the question with this exact text.
    pub fn full_score_of(&self, text: &str) -> Option<u32> {
        self.questions
            .iter()
            .find(|q| q.text == text)
            .map(|q| q.full_score)
    }
}

impl StructuredOutput for TestKit {
    const TYPE_NAME: &'static str = "TestKit";
    const SHAPE_HINT: &'static str = r#"{
  "questions": [
    {
      "text": "<question text>",
      "fullScore": <integer, maximum score for this question>
    }
  ]
}"#;
}

/// One candidate's answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResponse {
    pub question: String,
    pub response: String,
    #[serde(alias = "modelName", alias = "model_alias")]
    pub model_alias: String,
}

impl ExamResponse {
    pub fn new(
        question: impl Into<String>,
        response: impl Into<String>,
        model_alias: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            response: response.into(),
            model_alias: model_alias.into(),
        }
    }
}

impl fmt::Display for ExamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Question asked to {}: {}\nResponse from LLM: {}",
            self.model_alias, self.question, self.response
        )
    }
}

/// The judge's verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameScoreAndRank {
    /// Candidate alias.
    pub name: String,
    /// Total score across all questions.
    #[serde(deserialize_with = "lenient_i64")]
    pub score: i64,
    /// 1 is best.
    #[serde(deserialize_with = "lenient_u32")]
    pub rank: u32,
}

impl NameScoreAndRank {
    pub fn new(name: impl Into<String>, score: i64, rank: u32) -> Self {
        Self {
            name: name.into(),
            score,
            rank,
        }
    }
}

/// The judge's ranking of all candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    #[serde(alias = "examResult", alias = "exam_result", alias = "results")]
    pub entries: Vec<NameScoreAndRank>,
    #[serde(default = "Utc::now", alias = "generated_at")]
    pub generated_at: DateTime<Utc>,
}

impl EvaluationResult {
    pub fn new(entries: Vec<NameScoreAndRank>) -> Self {
        Self {
            entries,
            generated_at: Utc::now(),
        }
    }

    pub fn entry_for(&self, name: &str) -> Option<&NameScoreAndRank> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries ordered by rank, then name.
    pub fn ranked(&self) -> Vec<&NameScoreAndRank> {
        let mut ranked: Vec<_> = self.entries.iter().collect();
        ranked.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)));
        ranked
    }

    /// Candidate ranked first, if any.
    pub fn winner(&self) -> Option<&NameScoreAndRank> {
        self.ranked().into_iter().next()
    }

    /// Rewrites ranks as 1..N ordered by score descending, ties broken by name.
    ///
    /// Entries end up sorted in rank order.
    pub fn normalize_ranks(&mut self) {
        self.entries
            .sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            entry.rank = idx as u32 + 1;
        }
    }

    /// Ways this result deviates from "one entry per candidate, ranks 1..N".
    ///
    /// An empty vector means the result honours the contract.
    pub fn contract_issues<'a>(&self, aliases: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let expected: BTreeSet<&str> = aliases.into_iter().collect();
        let mut issues = Vec::new();

        let mut seen = BTreeSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.name.as_str()) {
                issues.push(format!("duplicate entry for '{}'", entry.name));
            }
            if !expected.contains(entry.name.as_str()) {
                issues.push(format!("unknown candidate '{}'", entry.name));
            }
        }
        for alias in &expected {
            if !seen.contains(alias) {
                issues.push(format!("missing candidate '{}'", alias));
            }
        }

        let ranks: BTreeSet<u32> = self.entries.iter().map(|e| e.rank).collect();
        let n = self.entries.len() as u32;
        if ranks.len() != self.entries.len() || ranks.iter().any(|r| *r == 0 || *r > n) {
            issues.push(format!("ranks are not a permutation of 1..={}", n));
        }

        issues
    }
}

impl StructuredOutput for EvaluationResult {
    const TYPE_NAME: &'static str = "EvaluationResult";
    const SHAPE_HINT: &'static str = r#"{
  "entries": [
    {
      "name": "<candidate name exactly as given>",
      "score": <integer, total score of the candidate>,
      "rank": <integer, 1 for the best candidate>
    }
  ]
}"#;
}

impl fmt::Display for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<6} {:<32} {:>8}", "RANK", "CANDIDATE", "SCORE")?;
        for entry in self.ranked() {
            writeln!(f, "{:<6} {:<32} {:>8}", entry.rank, entry.name, entry.score)?;
        }
        Ok(())
    }
}

/// Terminal artifact of an evaluation run: the ranking plus the raw transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResult {
    pub evaluation_result: EvaluationResult,
    pub exam_responses: Vec<ExamResponse>,
}

impl FinalResult {
    pub fn new(evaluation_result: EvaluationResult, exam_responses: Vec<ExamResponse>) -> Self {
        Self {
            evaluation_result,
            exam_responses,
        }
    }

    /// Responses given by one candidate.
    pub fn responses_of<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a ExamResponse> {
        self.exam_responses
            .iter()
            .filter(move |r| r.model_alias == alias)
    }
}

/// Integers from models arrive as `8`, `8.0`, `7.5` or `"8"`; accept all of them.
fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("number out of range: {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("expected a number, got '{}'", s))),
        other => Err(D::Error::custom(format!("expected a number, got {}", other))),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_number(deserializer)?;
    if !value.is_finite() {
        return Err(serde::de::Error::custom("expected a finite number"));
    }
    Ok(value.round() as i64)
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_number(deserializer)?.round();
    if !(0.0..=f64::from(u32::MAX)).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative integer, got {}",
            value
        )));
    }
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_kit_wire_format() {
        let kit: TestKit = serde_json::from_str(
            r#"{"questions": [{"text": "Q1", "fullScore": 10}, {"text": "Q2", "full_score": "5"}]}"#,
        )
        .expect("kit parses");

        assert_eq!(kit.len(), 2);
        assert_eq!(kit.questions[1], Question::new("Q2", 5));
        assert_eq!(kit.total_full_score(), 15);
        assert_eq!(kit.full_score_of("Q1"), Some(10));
        assert_eq!(kit.full_score_of("Q3"), None);

        let json = serde_json::to_value(&kit).expect("serializes");
        assert_eq!(json["questions"][0]["fullScore"], 10);
        assert!(json.get("generatedAt").is_some());
    }

    #[test]
    fn test_negative_full_score_rejected() {
        let parsed = serde_json::from_str::<Question>(r#"{"text": "Q", "fullScore": -1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_evaluation_result_accepts_legacy_field_and_floats() {
        let result: EvaluationResult = serde_json::from_str(
            r#"{"examResult": [{"name": "a", "score": 7.6, "rank": 1.0}, {"name": "b", "score": "6", "rank": 2}]}"#,
        )
        .expect("result parses");

        assert_eq!(result.entries[0], NameScoreAndRank::new("a", 8, 1));
        assert_eq!(result.entries[1], NameScoreAndRank::new("b", 6, 2));
    }

    #[test]
    fn test_exam_response_accepts_model_name() {
        let response: ExamResponse =
            serde_json::from_str(r#"{"question": "Q", "response": "A", "modelName": "m"}"#)
                .expect("parses");
        assert_eq!(response.model_alias, "m");
        assert_eq!(
            response.to_string(),
            "Question asked to m: Q\nResponse from LLM: A"
        );
    }

    #[test]
    fn test_contract_issues() {
        let good = EvaluationResult::new(vec![
            NameScoreAndRank::new("a", 9, 1),
            NameScoreAndRank::new("b", 3, 2),
        ]);
        assert!(good.contract_issues(["a", "b"]).is_empty());

        let bad = EvaluationResult::new(vec![
            NameScoreAndRank::new("a", 9, 1),
            NameScoreAndRank::new("x", 9, 1),
        ]);
        let issues = bad.contract_issues(["a", "b"]);
        assert!(issues.iter().any(|i| i.contains("unknown candidate 'x'")));
        assert!(issues.iter().any(|i| i.contains("missing candidate 'b'")));
        assert!(issues.iter().any(|i| i.contains("permutation")));
    }

    #[test]
    fn test_normalize_ranks_sorts_by_score_then_name() {
        let mut result = EvaluationResult::new(vec![
            NameScoreAndRank::new("c", 5, 1),
            NameScoreAndRank::new("b", 8, 1),
            NameScoreAndRank::new("a", 5, 7),
        ]);
        result.normalize_ranks();

        let ranked: Vec<_> = result
            .entries
            .iter()
            .map(|e| (e.name.as_str(), e.rank))
            .collect();
        assert_eq!(ranked, vec![("b", 1), ("a", 2), ("c", 3)]);
        assert!(result.contract_issues(["a", "b", "c"]).is_empty());
    }

    #[test]
    fn test_winner_and_display() {
        let result = EvaluationResult::new(vec![
            NameScoreAndRank::new("modelB", 6, 2),
            NameScoreAndRank::new("modelA", 8, 1),
        ]);
        assert_eq!(result.winner().map(|w| w.name.as_str()), Some("modelA"));

        let rendered = result.to_string();
        let first_row = rendered.lines().nth(1).expect("has a data row");
        assert!(first_row.contains("modelA"));
    }

    #[test]
    fn test_final_result_filters_by_alias() {
        let result = FinalResult::new(
            EvaluationResult::new(vec![]),
            vec![
                ExamResponse::new("Q1", "A1", "a"),
                ExamResponse::new("Q1", "B1", "b"),
                ExamResponse::new("Q2", "A2", "a"),
            ],
        );
        assert_eq!(result.responses_of("a").count(), 2);

        let json = serde_json::to_value(&result).expect("serializes");
        assert!(json.get("evaluationResult").is_some());
        assert_eq!(json["examResponses"][0]["modelAlias"], "a");
    }
}
