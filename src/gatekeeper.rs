//! Safety gate between a freshly solved plan and automatic publication.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GatekeeperConfig;
use crate::error::NotifyError;
use crate::model::Solution;
use crate::traits::ReviewChannel;

/// Verdict of one gatekeeper evaluation. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub solution_id: Uuid,
    pub requires_approval: bool,
    /// `None` when there was nothing meaningful to compare against.
    pub score_change_percent: Option<f64>,
    pub warnings: Vec<String>,
    pub approval_id: Option<String>,
    pub justification: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload sent to the human review channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub solution_id: Uuid,
    pub approval_id: String,
    pub score: String,
    pub hard_score: u32,
    pub soft_score: i64,
    pub total_profit: i64,
    pub vehicle_count: usize,
    pub unassigned_count: usize,
    pub score_change_percent: Option<f64>,
    pub warnings: Vec<String>,
    pub justification: String,
}

/// Relative soft-score change in percent, `None` when the previous soft score
/// is zero.
pub fn score_change_percent(previous_soft: i64, current_soft: i64) -> Option<f64> {
    if previous_soft == 0 {
        return None;
    }
    Some((current_soft - previous_soft) as f64 * 100.0 / previous_soft.unsigned_abs() as f64)
}

pub struct Gatekeeper {
    config: GatekeeperConfig,
    channel: Option<Box<dyn ReviewChannel>>,
}

impl Gatekeeper {
    pub fn new(config: GatekeeperConfig) -> Self {
        Self {
            config,
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: Box<dyn ReviewChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Compares `current` against the last published plan.
    ///
    /// Only computes the verdict and emits the review event; publication is
    /// not blocked here.
    pub fn check(&self, solution_id: Uuid, current: &Solution, previous: Option<&Solution>) -> SafetyReport {
        let mut report = SafetyReport {
            solution_id,
            requires_approval: false,
            score_change_percent: None,
            warnings: Vec::new(),
            approval_id: None,
            justification: None,
            created_at: Utc::now(),
        };

        if !self.config.enabled {
            debug!(%solution_id, "Gatekeeper disabled, auto-approving");
            return report;
        }

        let Some(previous) = previous else {
            debug!(%solution_id, "No previous plan, auto-approving");
            return report;
        };

        report.score_change_percent = score_change_percent(previous.score.soft, current.score.soft);
        match report.score_change_percent {
            Some(pct) if pct.abs() > self.config.score_threshold_percent => {
                let direction = if pct < 0.0 { "worse" } else { "better" };
                report.warnings.push(format!(
                    "Significant score change: {:.2}% ({direction})",
                    pct.abs()
                ));
                report.requires_approval = true;
                warn!(
                    %solution_id,
                    change_percent = pct,
                    threshold = self.config.score_threshold_percent,
                    "Score change exceeds threshold"
                );
            }
            Some(_) => {}
            None => debug!(%solution_id, "Previous soft score is zero, skipping delta"),
        }

        let previous_routes = previous.vehicle_count();
        let current_routes = current.vehicle_count();
        let delta = previous_routes.abs_diff(current_routes);
        if delta > 0 {
            report
                .warnings
                .push(format!("Route count changed: {previous_routes} -> {current_routes}"));
            if delta > self.config.max_route_count_delta {
                report.requires_approval = true;
            }
        }

        if report.requires_approval {
            let approval_id = format!("GK-{solution_id}-{}", Utc::now().timestamp_millis());
            let justification = fallback_justification(report.score_change_percent, &report.warnings);
            self.request_review(&report, current, &approval_id, &justification);
            report.approval_id = Some(approval_id);
            report.justification = Some(justification);
        }

        info!(
            %solution_id,
            requires_approval = report.requires_approval,
            warnings = report.warnings.len(),
            "Gatekeeper verdict"
        );
        report
    }

    fn request_review(&self, report: &SafetyReport, current: &Solution, approval_id: &str, justification: &str) {
        let Some(channel) = &self.channel else {
            warn!(solution_id = %report.solution_id, "Approval required but no review channel configured");
            return;
        };

        let request = ReviewRequest {
            solution_id: report.solution_id,
            approval_id: approval_id.to_string(),
            score: current.score.to_string(),
            hard_score: current.score.hard,
            soft_score: current.score.soft,
            total_profit: current.total_profit(),
            vehicle_count: current.vehicle_count(),
            unassigned_count: current.unassigned_stops_count(),
            score_change_percent: report.score_change_percent,
            warnings: report.warnings.clone(),
            justification: justification.to_string(),
        };

        if let Err(err) = channel.request_review(&request) {
            warn!(solution_id = %report.solution_id, error = %err, "Failed to notify review channel");
        }
    }

    /// Records a human decision. The decision is not enforced here.
    pub fn process_approval(&self, approval_id: &str, approved: bool) -> String {
        if approved {
            info!(approval_id, "Plan approved");
            format!("Plan {approval_id} approved and ready for publication")
        } else {
            warn!(approval_id, "Plan rejected");
            format!("Plan {approval_id} rejected")
        }
    }
}

fn fallback_justification(change: Option<f64>, warnings: &[String]) -> String {
    let mut text = String::from("A significant change in route optimization was detected. ");
    match change {
        Some(pct) if pct > 0.0 => text.push_str(&format!("The score improved by {pct:.2}%. ")),
        Some(pct) if pct < 0.0 => text.push_str(&format!("The score worsened by {:.2}%. ", pct.abs())),
        _ => {}
    }
    if !warnings.is_empty() {
        text.push_str("Details: ");
        text.push_str(&warnings.join("; "));
        text.push_str(". ");
    }
    text.push_str("Review the plan before publishing it to drivers.");
    text
}

/// Posts review requests to an HTTP webhook.
#[derive(Debug, Clone)]
pub struct WebhookReviewChannel {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookReviewChannel {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Builds a channel from config; `None` without a webhook URL.
    pub fn from_config(config: &GatekeeperConfig) -> Result<Option<Self>, NotifyError> {
        config
            .webhook_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.webhook_timeout_secs))
            .transpose()
    }
}

impl ReviewChannel for WebhookReviewChannel {
    fn request_review(&self, request: &ReviewRequest) -> Result<(), NotifyError> {
        info!(url = %self.url, solution_id = %request.solution_id, "Sending review request");
        self.client
            .post(&self.url)
            .json(request)
            .send()
            .and_then(|resp| resp.error_for_status())?;
        Ok(())
    }
}
