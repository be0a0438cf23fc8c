//! Sector classification: external service with local keyword fallback.

use async_trait::async_trait;
use decklens_core::{defaults, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Classifies a company offering into a sector label.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Returns None when no confident classification exists.
    async fn classify(&self, offering: &str) -> Result<Option<String>>;
}

/// HTTP classification service client.
pub struct HttpClassifier {
    url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    classification: Option<String>,
}

impl HttpClassifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            timeout_secs: defaults::CLASSIFICATION_TIMEOUT_SECS,
        }
    }

    pub fn from_env() -> Option<Self> {
        let url = std::env::var(defaults::ENV_CLASSIFICATION_URL).ok()?;
        if url.is_empty() {
            return None;
        }
        Some(Self::new(url))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, offering: &str) -> Result<Option<String>> {
        let response = self
            .client
            .post(&self.url)
            .json(&ClassifyRequest { text: offering })
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Request(format!("Classification request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Request(format!(
                "Classification service returned {}",
                response.status()
            )));
        }

        let result: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| Error::Request(format!("Bad classification response: {}", e)))?;
        Ok(result.classification)
    }
}

/// Keyword-based local classifier. Checked in order; first match wins.
const KEYWORD_SECTORS: &[(&str, &[&str])] = &[
    (
        "biotech",
        &["biotech", "therapeutic", "drug discovery", "molecule", "gene therapy"],
    ),
    (
        "pharma",
        &["pharma", "clinical trial", "fda approval", "drug development"],
    ),
    (
        "medtech",
        &["medical device", "medtech", "implant", "surgical", "wearable"],
    ),
    (
        "diagnostics",
        &["diagnostic", "biomarker", "screening", "lab test", "imaging"],
    ),
    (
        "digital_health",
        &["digital health", "telemedicine", "telehealth", "health app", "patient platform"],
    ),
];

/// Local keyword fallback used when no classification service is configured
/// or the service call fails.
#[derive(Default)]
pub struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, offering: &str) -> Result<Option<String>> {
        let text = offering.to_lowercase();
        for (sector, keywords) in KEYWORD_SECTORS {
            if keywords.iter().any(|kw| text.contains(kw)) {
                return Ok(Some((*sector).to_string()));
            }
        }
        Ok(None)
    }
}

/// Service-first classifier that degrades to the keyword fallback on any
/// service error or empty result. Classification never fails the pipeline.
pub struct FallbackClassifier {
    service: Option<HttpClassifier>,
    fallback: KeywordClassifier,
}

impl FallbackClassifier {
    pub fn new(service: Option<HttpClassifier>) -> Self {
        Self {
            service,
            fallback: KeywordClassifier,
        }
    }

    pub fn from_env() -> Self {
        Self::new(HttpClassifier::from_env())
    }
}

#[async_trait]
impl Classifier for FallbackClassifier {
    async fn classify(&self, offering: &str) -> Result<Option<String>> {
        if let Some(service) = &self.service {
            match service.classify(offering).await {
                Ok(Some(classification)) => {
                    debug!(
                        subsystem = "worker",
                        component = "classify",
                        %classification,
                        "Service classification"
                    );
                    return Ok(Some(classification));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        subsystem = "worker",
                        component = "classify",
                        error = %e,
                        "Classification service failed, using keyword fallback"
                    );
                }
            }
        }
        self.fallback.classify(offering).await
    }
}
