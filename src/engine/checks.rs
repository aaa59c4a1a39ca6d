//! Evaluation of check runs against the merge gate rules.

use crate::config::Config;
use crate::platform::{CheckConclusion, CheckRun, CheckStatus};

/// Check runs split by their gating outcome. The configured self-check is
/// excluded before evaluation.
#[derive(Debug, Default)]
pub struct CheckSummary {
    pub failing: Vec<CheckRun>,
    pub pending: Vec<CheckRun>,
}

impl CheckSummary {
    pub fn all_passing(&self) -> bool {
        self.failing.is_empty() && self.pending.is_empty()
    }
}

pub fn evaluate_checks(runs: &[CheckRun], config: &Config) -> CheckSummary {
    let mut summary = CheckSummary::default();
    for run in runs {
        if run.name == config.self_check_name {
            continue;
        }
        match run.status {
            CheckStatus::Queued | CheckStatus::InProgress => {
                summary.pending.push(run.clone());
            }
            CheckStatus::Completed => {
                if !conclusion_passes(run.conclusion, config) {
                    summary.failing.push(run.clone());
                }
            }
        }
    }
    summary
}

fn conclusion_passes(conclusion: Option<CheckConclusion>, config: &Config) -> bool {
    match conclusion {
        Some(CheckConclusion::Success) => true,
        Some(CheckConclusion::Neutral) | Some(CheckConclusion::Skipped) => {
            config.checks.neutral_is_passing
        }
        // A completed run without a conclusion is treated as still pending
        // by the platforms; be conservative and fail it.
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, status: CheckStatus, conclusion: Option<CheckConclusion>) -> CheckRun {
        CheckRun {
            id: 1,
            name: name.to_string(),
            status,
            conclusion,
            url: "https://ci.example.com/1".to_string(),
        }
    }

    #[test]
    fn passing_checks() {
        let config = Config::default();
        let runs = vec![
            run("build", CheckStatus::Completed, Some(CheckConclusion::Success)),
            run("lint", CheckStatus::Completed, Some(CheckConclusion::Skipped)),
        ];
        assert!(evaluate_checks(&runs, &config).all_passing());
    }

    #[test]
    fn pending_check_fails_gate() {
        let config = Config::default();
        let runs = vec![run("build", CheckStatus::InProgress, None)];
        let summary = evaluate_checks(&runs, &config);
        assert!(!summary.all_passing());
        assert_eq!(summary.pending.len(), 1);
    }

    #[test]
    fn failing_check() {
        let config = Config::default();
        let runs = vec![run(
            "build",
            CheckStatus::Completed,
            Some(CheckConclusion::Failure),
        )];
        let summary = evaluate_checks(&runs, &config);
        assert_eq!(summary.failing.len(), 1);
    }

    #[test]
    fn self_check_is_excluded() {
        let config = Config::default();
        let runs = vec![run(
            &config.self_check_name.clone(),
            CheckStatus::InProgress,
            None,
        )];
        assert!(evaluate_checks(&runs, &config).all_passing());
    }

    #[test]
    fn neutral_follows_config() {
        let mut config = Config::default();
        let runs = vec![run(
            "audit",
            CheckStatus::Completed,
            Some(CheckConclusion::Neutral),
        )];
        assert!(evaluate_checks(&runs, &config).all_passing());
        config.checks.neutral_is_passing = false;
        assert!(!evaluate_checks(&runs, &config).all_passing());
    }

    // Once a check passes, adding more passing checks cannot flip the
    // decision back to failing.
    #[test]
    fn gate_is_monotone_in_passing_checks() {
        let config = Config::default();
        let mut runs = vec![run(
            "build",
            CheckStatus::Completed,
            Some(CheckConclusion::Success),
        )];
        assert!(evaluate_checks(&runs, &config).all_passing());
        for i in 0..5 {
            runs.push(run(
                &format!("extra-{i}"),
                CheckStatus::Completed,
                Some(CheckConclusion::Success),
            ));
            assert!(evaluate_checks(&runs, &config).all_passing());
        }
    }
}
