//! Optional prose generation for remediation plans.
//!
//! A [`Narrator`] turns a structured plan into a human-readable explanation.
//! Narration is best effort: a failing narrator leaves the plan's
//! `narrative` empty and never affects the structured fields.

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::model::RemediationPlan;

#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, plan: &RemediationPlan) -> anyhow::Result<String>;
}

/// Narrates every plan concurrently and stores the results in place.
pub async fn attach_narratives(plans: &mut [RemediationPlan], narrator: &dyn Narrator) {
    let results = join_all(plans.iter().map(|plan| narrator.narrate(plan))).await;

    for (plan, result) in plans.iter_mut().zip(results) {
        match result {
            Ok(text) if !text.trim().is_empty() => plan.narrative = Some(text),
            Ok(_) => {}
            Err(e) => warn!(
                package = %plan.dependency.name,
                error = %e,
                "narrator failed, keeping structured plan only"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestKind;
    use crate::model::{Dependency, Ecosystem, MergedFinding, Severity};
    use crate::remediation::classify;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    struct Echo;

    #[async_trait]
    impl Narrator for Echo {
        async fn narrate(&self, plan: &RemediationPlan) -> anyhow::Result<String> {
            if plan.dependency.name == "broken" {
                anyhow::bail!("model unavailable");
            }
            Ok(format!("{} needs attention", plan.dependency.name))
        }
    }

    fn plan(name: &str) -> RemediationPlan {
        classify(MergedFinding {
            dependency: Dependency::new(
                Ecosystem::Npm,
                name,
                "1.0.0",
                PathBuf::from("package.json"),
                ManifestKind::PackageJson,
            ),
            cve_ids: BTreeSet::new(),
            advisory_ids: BTreeSet::from(["GHSA-xxxx-yyyy-zzzz".to_string()]),
            severity: Severity::Low,
            fixed_version: Some("1.0.1".to_string()),
            sources: BTreeSet::new(),
            descriptions: vec![],
            summary: String::new(),
            changelog_url: None,
            clusters: vec![],
        })
    }

    #[tokio::test]
    async fn test_failure_leaves_plan_untouched() {
        let mut plans = vec![plan("lodash"), plan("broken")];
        let before = plans[1].clone();

        attach_narratives(&mut plans, &Echo).await;

        assert_eq!(plans[0].narrative.as_deref(), Some("lodash needs attention"));
        assert_eq!(plans[1], before);
        assert!(plans[1].narrative.is_none());
    }
}
