//! Length rescue for candidates whose only error is length.
//!
//! Shortages grow the text at a marker boundary (`extend`) or lengthen the
//! shortest segment (`expand`); overages ask for a tighter rewrite
//! (`shrink`). When a candidate is still too long after the gateway passes,
//! [`truncate_proportionally`] cuts it deterministically.

use tracing::{debug, info, warn};

use scriptline_llm::{Message, tasks};
use scriptline_validation::segments::{is_marker_line, join_segments, sentences, split_segments};
use scriptline_validation::{ValidatorConfig, count_chars, validate};

use super::QualityGate;
use crate::error::StageError;

/// Shortages up to this fraction of `min_chars` rewrite one segment instead
/// of inserting new material.
const EXPAND_RATIO: f64 = 0.2;

#[derive(Debug)]
pub(crate) struct Rescued {
    pub text: String,
    /// Strategy names, in the order they were accepted
    pub applied: Vec<String>,
}

impl QualityGate<'_, '_> {
    pub(super) async fn rescue(&mut self, text: &str) -> Result<Rescued, StageError> {
        let validator = self.ctx.validator.clone();
        let target = validator.target_chars();
        let mut current = text.to_string();
        let mut applied = Vec::new();

        for pass in 1..=self.policy.rescue_passes {
            let report = validate(&current, &validator);
            let delta = report.length_delta();
            if delta == 0 {
                break;
            }
            let count = report.stats.char_count;
            let (strategy, raw) = if delta < 0 {
                let needed = target.saturating_sub(count);
                if delta.unsigned_abs() as f64 <= validator.min_chars as f64 * EXPAND_RATIO {
                    ("expand", self.expand(&current, needed).await?)
                } else {
                    ("extend", self.extend(&current, needed).await?)
                }
            } else {
                ("shrink", self.shrink(&current, target).await?)
            };

            let candidate = self.pipeline.apply(&raw);
            let candidate_report = validate(&candidate, &validator);
            if candidate_report.hard_errors().next().is_some() {
                warn!(job = %self.ctx.key, pass, strategy, "Discarding rescue candidate with hard errors");
                continue;
            }
            if candidate_report.length_delta().unsigned_abs() >= delta.unsigned_abs() {
                debug!(job = %self.ctx.key, pass, strategy, "Rescue candidate made no progress");
                continue;
            }
            debug!(
                job = %self.ctx.key,
                pass,
                strategy,
                before = count,
                after = candidate_report.stats.char_count,
                "Accepted rescue candidate"
            );
            current = candidate;
            applied.push(strategy.to_string());
        }

        if validate(&current, &validator).length_delta() > 0 {
            let truncated = truncate_proportionally(&current, &validator, target);
            if validate(&truncated, &validator).hard_errors().next().is_none() {
                info!(job = %self.ctx.key, "Truncated candidate to the length target");
                current = truncated;
                applied.push("truncate".to_string());
            }
        }

        let report = validate(&current, &validator);
        if report.has_errors() {
            return Err(StageError::RescueFailed {
                reason: format!(
                    "{} counted characters after {} pass(es), band is {}..={}",
                    report.stats.char_count,
                    self.policy.rescue_passes,
                    validator.min_chars,
                    validator.max_chars
                ),
                issues: report.issues,
            });
        }
        Ok(Rescued {
            text: current,
            applied,
        })
    }

    /// New material after the last marker line.
    async fn extend(&mut self, text: &str, needed: usize) -> Result<String, StageError> {
        let system = "Write additional narration that continues the script naturally. \
                      Plain spoken prose, no headings or lists. Do not repeat existing \
                      sentences. Return only the new passage.";
        let user = format!(
            "{}\nAdd about {needed} characters.\n\nScript so far:\n{text}",
            self.ctx.job_brief()
        );
        let request = self.ctx.request(
            tasks::EXTEND,
            vec![Message::system(system), Message::user(user)],
            Some(needed),
        );
        let addition = self.ctx.call(request).await?;
        Ok(insert_after_last_marker(
            text,
            addition.content.trim(),
            &self.ctx.validator.marker,
        ))
    }

    /// Lengthen the shortest segment by `needed`.
    async fn expand(&mut self, text: &str, needed: usize) -> Result<String, StageError> {
        let marker = self.ctx.validator.marker.clone();
        let mut segments = split_segments(text, &marker);
        let Some(index) = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.trim().is_empty())
            .min_by_key(|(_, s)| count_chars(s, &marker))
            .map(|(i, _)| i)
        else {
            return self.extend(text, needed).await;
        };

        let current = count_chars(&segments[index], &marker);
        let system = "Rewrite this passage longer with more concrete detail. Keep its meaning \
                      and its first and last sentence. Return only the rewritten passage.";
        let user = format!(
            "{}\nRewrite to about {} characters.\n\nPassage:\n{}",
            self.ctx.job_brief(),
            current + needed,
            segments[index]
        );
        let request = self.ctx.request(
            tasks::EXPAND,
            vec![Message::system(system), Message::user(user)],
            Some(current + needed),
        );
        let rewritten = self.ctx.call(request).await?;
        segments[index] = rewritten.content.trim().to_string();
        Ok(join_segments(&segments, &marker))
    }

    async fn shrink(&mut self, text: &str, target: usize) -> Result<String, StageError> {
        let system = "Tighten the narration script to the requested length. Keep every pause \
                      marker line and the order of sections. Return only the full script.";
        let user = format!(
            "{}\nTighten to about {target} characters.\n\nScript:\n{text}",
            self.ctx.job_brief()
        );
        let request = self.ctx.request(
            tasks::SHRINK,
            vec![Message::system(system), Message::user(user)],
            Some(target),
        );
        Ok(self.ctx.call(request).await?.content)
    }
}

/// Insert `addition` as its own paragraph right after the last marker line,
/// or at the end when the text has no marker.
#[must_use]
pub fn insert_after_last_marker(text: &str, addition: &str, marker: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    match lines.iter().rposition(|line| is_marker_line(line, marker)) {
        Some(idx) => {
            let before = lines[..=idx].join("\n");
            let after = lines[idx + 1..].join("\n");
            let after = after.trim();
            if after.is_empty() {
                format!("{before}\n\n{addition}\n")
            } else {
                format!("{before}\n\n{addition}\n\n{after}\n")
            }
        }
        None => format!("{}\n\n{addition}\n", text.trim_end()),
    }
}

/// Cut every marker segment down to its share of `target`, keeping whole
/// sentences from the start of each segment.
///
/// Each segment's budget is proportional to its current size, so the sum of
/// budgets never exceeds `target` and neither does the result's counted
/// length. Segments that keep nothing are dropped along with their marker.
#[must_use]
pub fn truncate_proportionally(text: &str, config: &ValidatorConfig, target: usize) -> String {
    let marker = &config.marker;
    let segments = split_segments(text, marker);
    let total: usize = segments.iter().map(|s| count_chars(s, marker)).sum();
    if total <= target {
        return text.to_string();
    }

    let kept: Vec<String> = segments
        .iter()
        .filter_map(|segment| {
            let budget = count_chars(segment, marker) * target / total;
            let cut = keep_sentences(segment, marker, budget, |c| config.is_sentence_end(c));
            (!cut.is_empty()).then_some(cut)
        })
        .collect();
    if kept.is_empty() {
        return String::new();
    }
    join_segments(&kept, marker)
}

fn keep_sentences(
    segment: &str,
    marker: &str,
    budget: usize,
    is_end: impl Fn(char) -> bool + Copy,
) -> String {
    let mut used = 0usize;
    let mut paragraphs = Vec::new();
    'outer: for paragraph in segment.split("\n\n") {
        let mut kept = Vec::new();
        for sentence in sentences(paragraph, is_end) {
            let complete = sentence.chars().last().is_some_and(is_end);
            let size = count_chars(sentence, marker);
            if !complete || used + size > budget {
                if !kept.is_empty() {
                    paragraphs.push(kept.join(" "));
                }
                break 'outer;
            }
            used += size;
            kept.push(sentence.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        if !kept.is_empty() {
            paragraphs.push(kept.join(" "));
        }
    }
    paragraphs.join("\n\n")
}
