//! Notification fan-out is an external collaborator per the scope note —
//! this is deliberately a narrow trait boundary, not a routing engine.

use async_trait::async_trait;

use crate::store::Incident;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, incident: &Incident);
}

/// The only shipped implementation: emits a structured log line at a level
/// derived from severity. A richer implementation (Slack/email/webhook
/// fan-out) can be dropped in without touching call sites.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, incident: &Incident) {
        let severity = incident.severity.as_deref().unwrap_or("medium");
        let diagnosis = incident.diagnosis.as_deref().unwrap_or("No diagnosis reached.");

        match severity {
            "critical" => tracing::error!(
                incident_id = %incident.incident_id,
                service = %incident.service,
                %severity,
                "{diagnosis}"
            ),
            "high" => tracing::warn!(
                incident_id = %incident.incident_id,
                service = %incident.service,
                %severity,
                "{diagnosis}"
            ),
            _ => tracing::info!(
                incident_id = %incident.incident_id,
                service = %incident.service,
                %severity,
                "{diagnosis}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_incident(severity: &str) -> Incident {
        Incident {
            incident_id: "inc_1".to_string(),
            service: "web-a".to_string(),
            trigger: "manual".to_string(),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            transcript: serde_json::json!([]),
            diagnosis: Some("disk full".to_string()),
            severity: Some(severity.to_string()),
            actions: vec![],
            turns: 1,
        }
    }

    #[tokio::test]
    async fn notify_does_not_panic_for_any_severity() {
        let notifier = LogNotifier;
        for severity in ["critical", "high", "medium", "low"] {
            notifier.notify(&sample_incident(severity)).await;
        }
    }
}
