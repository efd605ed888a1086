//! Rebuild from a section plan once the judge rounds are spent.

use tracing::{info, warn};

use scriptline_config::QualityGateConfig;
use scriptline_llm::{Message, tasks};
use scriptline_validation::segments::{join_segments, split_segments};
use scriptline_validation::{ValidatorConfig, validate};

use super::{GateResult, QualityGate};
use crate::error::StageError;
use scriptline_status::Verdict;

/// Character budget per section.
///
/// `rebuild_sections` sections (or one per marker segment when that is 0),
/// sharing the validator's target evenly; the remainder goes to the leading
/// sections so the budgets add up to the target exactly.
#[must_use]
pub fn plan_sections(
    policy: &QualityGateConfig,
    validator: &ValidatorConfig,
    marker_count: usize,
) -> Vec<usize> {
    let sections = if policy.rebuild_sections > 0 {
        policy.rebuild_sections
    } else {
        marker_count + 1
    };
    let target = validator.target_chars();
    let base = target / sections;
    let remainder = target % sections;
    (0..sections)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

impl QualityGate<'_, '_> {
    /// Regenerate the whole candidate section by section and judge it once.
    ///
    /// `Ok(None)` means the rebuilt candidate did not pass.
    pub(super) async fn rebuild_and_judge(
        &mut self,
        source: &str,
        round: u32,
    ) -> Result<Option<GateResult>, StageError> {
        self.rebuilt = true;
        let marker = self.ctx.validator.marker.clone();
        let previous = split_segments(source, &marker);
        let budgets = plan_sections(&self.policy, &self.ctx.validator, previous.len().saturating_sub(1));
        info!(job = %self.ctx.key, sections = budgets.len(), "Rebuilding candidate from section plan");

        let mut sections = Vec::with_capacity(budgets.len());
        for (index, budget) in budgets.iter().enumerate() {
            let system = "Write one section of a narration script. Plain spoken prose, no \
                          headings, lists or links. Return only the section text.";
            let mut user = format!(
                "{}\nSection {} of {}, about {budget} characters.\n",
                self.ctx.job_brief(),
                index + 1,
                budgets.len()
            );
            if let Some(old) = previous.get(index).filter(|s| !s.trim().is_empty()) {
                user.push_str(&format!("\nEarlier version of this section, for reference:\n{old}\n"));
            }
            let request = self.ctx.request(
                tasks::REBUILD_SECTION,
                vec![Message::system(system), Message::user(user)],
                Some(*budget),
            );
            let generation = self.ctx.call(request).await?;
            sections.push(generation.content.trim().to_string());
        }

        let mut candidate = self.clean(&join_segments(&sections, &marker), tasks::REBUILD_SECTION)?;
        let rescued = match self.settle(&mut candidate).await {
            Ok(applied) => applied,
            Err(StageError::RescueFailed { reason, .. }) => {
                warn!(job = %self.ctx.key, reason = %reason, "Rebuilt candidate could not be rescued");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let report = validate(&candidate, &self.ctx.validator);
        let verdict = self.judge(&candidate, &report).await?;
        self.record_round(round, &verdict, &candidate, &report, rescued)?;
        if verdict.verdict == Verdict::Pass {
            info!(job = %self.ctx.key, "Rebuilt candidate passed");
            return Ok(Some(GateResult {
                text: candidate,
                report,
            }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_budgets_sum_to_target() {
        let validator = ValidatorConfig::default();
        let policy = QualityGateConfig {
            rebuild_sections: 3,
            ..QualityGateConfig::default()
        };
        let budgets = plan_sections(&policy, &validator, 7);
        assert_eq!(budgets, vec![434, 433, 433]);
        assert_eq!(budgets.iter().sum::<usize>(), validator.target_chars());
    }

    #[test]
    fn test_plan_follows_markers_when_unset() {
        let policy = QualityGateConfig {
            rebuild_sections: 0,
            ..QualityGateConfig::default()
        };
        assert_eq!(plan_sections(&policy, &ValidatorConfig::default(), 1).len(), 2);
    }
}
