//! Judge reply parsing and normalization.

use serde::Deserialize;
use serde_json::Value;

use scriptline_status::Verdict;
use scriptline_validation::ValidationReport;

use crate::error::StageError;

/// A normalized judge verdict. A non-empty `must_fix` always means `Fail`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeReport {
    pub verdict: Verdict,
    pub must_fix: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    verdict: String,
    #[serde(default)]
    must_fix: Vec<Value>,
    #[serde(default)]
    notes: Option<Value>,
}

/// Parse the first JSON object found in `reply`.
///
/// Judges tend to wrap the object in a code fence or a sentence of prose, so
/// every `{` is tried as a start position until one parses.
pub fn parse_judge_reply(reply: &str) -> Result<JudgeReport, StageError> {
    let raw = first_object(reply).ok_or_else(|| StageError::JudgeUnparseable {
        reason: format!("no JSON object with a verdict in: {}", excerpt(reply)),
    })?;

    let verdict = match raw.verdict.trim().to_ascii_lowercase().as_str() {
        "pass" | "passed" => Verdict::Pass,
        "fail" | "failed" => Verdict::Fail,
        other => {
            return Err(StageError::JudgeUnparseable {
                reason: format!("unknown verdict '{other}'"),
            });
        }
    };

    let must_fix: Vec<String> = raw
        .must_fix
        .iter()
        .filter_map(must_fix_text)
        .filter(|item| !item.trim().is_empty())
        .collect();

    let notes = raw.notes.and_then(|n| match n {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    });

    Ok(JudgeReport {
        verdict: if must_fix.is_empty() { verdict } else { Verdict::Fail },
        must_fix,
        notes,
    })
}

fn first_object(reply: &str) -> Option<RawReply> {
    reply.match_indices('{').find_map(|(idx, _)| {
        let mut stream =
            serde_json::Deserializer::from_str(&reply[idx..]).into_iter::<RawReply>();
        stream.next().and_then(Result::ok)
    })
}

fn must_fix_text(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(map) => ["issue", "message", "description", "fix"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
            .or_else(|| Some(item.to_string())),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    let mut out: String = trimmed.chars().take(80).collect();
    if trimmed.chars().count() > 80 {
        out.push('…');
    }
    out
}

impl JudgeReport {
    /// Fold validator errors into the must-fix list so a candidate that fails
    /// validation can never pass, whatever the judge said.
    pub fn merge_validation(&mut self, report: &ValidationReport) {
        for issue in report.issues.iter().filter(|i| i.is_error()) {
            let item = match issue.line {
                Some(line) => format!("{} (line {line}): {}", issue.code, issue.message),
                None => format!("{}: {}", issue.code, issue.message),
            };
            if !self.must_fix.contains(&item) {
                self.must_fix.push(item);
            }
        }
        if !self.must_fix.is_empty() {
            self.verdict = Verdict::Fail;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptline_validation::{ValidatorConfig, validate};

    #[test]
    fn test_parses_fenced_reply() {
        let reply = "Here is my review:\n```json\n{\"verdict\": \"PASS\", \"must_fix\": [], \"notes\": \"tight\"}\n```";
        let report = parse_judge_reply(reply).unwrap();
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.notes.as_deref(), Some("tight"));
    }

    #[test]
    fn test_must_fix_forces_fail() {
        let reply = r#"{"verdict":"pass","must_fix":["opening repeats the title",{"issue":"ending trails off"}]}"#;
        let report = parse_judge_reply(reply).unwrap();
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(
            report.must_fix,
            vec!["opening repeats the title", "ending trails off"]
        );
    }

    #[test]
    fn test_skips_braces_that_are_not_the_reply() {
        let reply = r#"Style note {tone} then {"verdict":"fail","must_fix":[]}"#;
        assert_eq!(parse_judge_reply(reply).unwrap().verdict, Verdict::Fail);
    }

    #[test]
    fn test_unparseable_replies() {
        for reply in ["looks good to me", r#"{"verdict":"maybe"}"#, r#"{"notes":"x"}"#] {
            assert!(
                matches!(parse_judge_reply(reply), Err(StageError::JudgeUnparseable { .. })),
                "{reply}"
            );
        }
    }

    #[test]
    fn test_validator_errors_become_must_fix() {
        let mut report = parse_judge_reply(r#"{"verdict":"pass"}"#).unwrap();
        let validation = validate("Too short.\n", &ValidatorConfig::default());
        report.merge_validation(&validation);

        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.must_fix[0].starts_with("length_too_short"));
    }
}
