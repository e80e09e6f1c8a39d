//! LLM-backed plausibility check over a month of attendance.
//!
//! The advisor only ever returns an assessment. It never changes data, and
//! a failing advisor degrades to a neutral negative result.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::AdvisorConfig;
use crate::report::MonthKey;
use crate::sync::MirrorSnapshot;

/// Shown when the advisor could not produce an answer.
pub const ASSESSMENT_FAILED: &str =
    "An error occurred while assessing data integrity. Please try again.";

const SYSTEM_PROMPT: &str = "You are an expert in data analysis and consistency checking. \
You will receive attendance data for employees at a construction site. \
Identify any inconsistencies, errors or anomalies, give a detailed assessment of the data's \
integrity and suggest corrective measures. If anything is inconsistent, isConsistent must be false. \
Answer with a JSON object {\"assessment\": string, \"isConsistent\": boolean}.";

/// The advisor's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityAssessment {
    pub assessment: String,
    pub is_consistent: bool,
}

impl IntegrityAssessment {
    pub fn failed() -> Self {
        Self {
            assessment: ASSESSMENT_FAILED.to_string(),
            is_consistent: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Integrity advisor is not configured")]
    NotConfigured,
    #[error("Advisor request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Advisor returned HTTP {0}")]
    Status(u16),
    #[error("Could not decode advisor answer: {0}")]
    Decode(String),
}

#[async_trait]
pub trait DataIntegrityAdvisor: Send + Sync {
    async fn assess(&self, attendance_text: &str) -> Result<IntegrityAssessment, AdvisorError>;
}

/// Advisor used when no endpoint is configured.
pub struct DisabledAdvisor;

#[async_trait]
impl DataIntegrityAdvisor for DisabledAdvisor {
    async fn assess(&self, _attendance_text: &str) -> Result<IntegrityAssessment, AdvisorError> {
        Err(AdvisorError::NotConfigured)
    }
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct HttpAdvisor {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl HttpAdvisor {
    pub fn new(base_url: &str, api_key: Option<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl DataIntegrityAdvisor for HttpAdvisor {
    async fn assess(&self, attendance_text: &str) -> Result<IntegrityAssessment, AdvisorError> {
        let body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("Attendance Data:\n{}", attendance_text) },
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AdvisorError::Status(response.status().as_u16()));
        }

        let completion: ChatCompletion = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AdvisorError::Decode("empty answer".to_string()))?;

        serde_json::from_str(&content).map_err(|e| AdvisorError::Decode(e.to_string()))
    }
}

/// Build the advisor described by `config`.
pub fn from_config(config: &AdvisorConfig) -> Box<dyn DataIntegrityAdvisor> {
    match &config.base_url {
        Some(url) => {
            tracing::info!(model = %config.model, "Integrity advisor enabled");
            Box::new(HttpAdvisor::new(url, config.api_key.clone(), &config.model))
        }
        None => {
            tracing::info!("No SITESCRIBE_ADVISOR_URL set, integrity advisor disabled");
            Box::new(DisabledAdvisor)
        }
    }
}

/// Render a month of committed attendance as advisor input.
///
/// One line per date that holds records:
/// `Date: 2024-03-02, Amara: Present, Kamal: Half Day`.
pub fn render_month_text(snapshot: &MirrorSnapshot, month: MonthKey) -> String {
    snapshot
        .attendance_between(month.first_day(), month.last_day())
        .filter(|(_, records)| !records.is_empty())
        .map(|(date, records)| {
            let marks: Vec<String> = records
                .iter()
                .map(|(employee_id, record)| {
                    let name = snapshot
                        .employee(employee_id)
                        .map(|e| e.name.as_str())
                        .unwrap_or(employee_id.as_str());
                    format!("{}: {}", name, record.status.label())
                })
                .collect();
            format!("Date: {}, {}", date, marks.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ask the advisor; any failure becomes [`IntegrityAssessment::failed`].
pub async fn check_data_integrity(
    advisor: &dyn DataIntegrityAdvisor,
    attendance_text: &str,
) -> IntegrityAssessment {
    match advisor.assess(attendance_text).await {
        Ok(assessment) => assessment,
        Err(err) => {
            tracing::error!(error = %err, "Error assessing data integrity");
            IntegrityAssessment::failed()
        }
    }
}
