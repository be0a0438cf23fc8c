//! Mock inference backends for deterministic testing.
//!
//! Both mocks keep a call log behind an `Arc<Mutex<_>>` so tests can assert
//! how many model calls a pipeline run actually made (the cache tests depend
//! on this). Responses are selected by substring match against the prompt,
//! falling back to a default response.
//!
//! ```rust,ignore
//! let vision = MockVisionBackend::new().with_fixed_response("A title slide");
//! let gen = MockGenerationBackend::new()
//!     .with_response_mapping("Score the following", "Score: 5")
//!     .with_fixed_response("Generic analysis");
//! assert_eq!(vision.call_count(), 0);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use decklens_core::{Error, Result};

use crate::generation::GenerationBackend;
use crate::vision::VisionBackend;

/// A single logged backend call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub input: String,
}

#[derive(Debug, Clone, Default)]
struct MockConfig {
    fixed_responses: Vec<(String, String)>,
    default_response: String,
    fail_when_input_contains: Option<String>,
}

fn select_response(config: &MockConfig, input: &str) -> Result<String> {
    if let Some(needle) = &config.fail_when_input_contains {
        if input.contains(needle.as_str()) {
            return Err(Error::Inference(format!(
                "mock failure triggered by input containing {:?}",
                needle
            )));
        }
    }
    for (needle, response) in &config.fixed_responses {
        if input.contains(needle.as_str()) {
            return Ok(response.clone());
        }
    }
    Ok(config.default_response.clone())
}

/// Deterministic in-process vision backend.
#[derive(Clone)]
pub struct MockVisionBackend {
    config: Arc<Mutex<MockConfig>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    /// Per-image descriptions, keyed by image byte length when set. Lets
    /// tests give each rendered page a distinct description.
    per_image: Arc<Mutex<HashMap<usize, String>>>,
}

impl Default for MockVisionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVisionBackend {
    pub fn new() -> Self {
        Self {
            config: Arc::new(Mutex::new(MockConfig {
                default_response: "Mock slide description".to_string(),
                ..Default::default()
            })),
            call_log: Arc::new(Mutex::new(Vec::new())),
            per_image: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_fixed_response(self, response: impl Into<String>) -> Self {
        self.config.lock().unwrap().default_response = response.into();
        self
    }

    pub fn with_image_response(self, image_len: usize, response: impl Into<String>) -> Self {
        self.per_image.lock().unwrap().insert(image_len, response.into());
        self
    }

    pub fn with_failure_on(self, needle: impl Into<String>) -> Self {
        self.config.lock().unwrap().fail_when_input_contains = Some(needle.into());
        self
    }

    /// Number of describe_image calls made so far.
    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionBackend for MockVisionBackend {
    async fn describe_image(
        &self,
        image_data: &[u8],
        _mime_type: &str,
        prompt: Option<&str>,
    ) -> Result<String> {
        let prompt = prompt.unwrap_or_default().to_string();
        self.call_log.lock().unwrap().push(MockCall {
            operation: "describe_image".to_string(),
            input: prompt.clone(),
        });
        if let Some(response) = self.per_image.lock().unwrap().get(&image_data.len()) {
            return Ok(response.clone());
        }
        select_response(&self.config.lock().unwrap(), &prompt)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn model_name(&self) -> &str {
        "mock-vision"
    }
}

/// Deterministic in-process generation backend.
#[derive(Clone)]
pub struct MockGenerationBackend {
    config: Arc<Mutex<MockConfig>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self {
            config: Arc::new(Mutex::new(MockConfig {
                default_response: "Mock response".to_string(),
                ..Default::default()
            })),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_fixed_response(self, response: impl Into<String>) -> Self {
        self.config.lock().unwrap().default_response = response.into();
        self
    }

    /// Respond with `output` whenever the prompt contains `needle`.
    /// Mappings are checked in insertion order.
    pub fn with_response_mapping(
        self,
        needle: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.config
            .lock()
            .unwrap()
            .fixed_responses
            .push((needle.into(), output.into()));
        self
    }

    /// Fail any call whose prompt contains `needle`.
    pub fn with_failure_on(self, needle: impl Into<String>) -> Self {
        self.config.lock().unwrap().fail_when_input_contains = Some(needle.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    fn respond(&self, operation: &str, prompt: &str) -> Result<String> {
        self.call_log.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            input: prompt.to_string(),
        });
        select_response(&self.config.lock().unwrap(), prompt)
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.respond("generate", prompt)
    }

    async fn generate_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
        self.respond("generate_with_system", prompt)
    }

    async fn generate_json(&self, _system: &str, prompt: &str) -> Result<String> {
        self.respond("generate_json", prompt)
    }

    fn model_name(&self) -> &str {
        "mock-generation"
    }
}
