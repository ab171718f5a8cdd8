use crate::domain::gateway::CaptureMethod;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Purchases only place a hold; a separate capture collects the funds.
    #[default]
    Manual,
    Automatic,
}

impl From<CaptureMode> for CaptureMethod {
    fn from(mode: CaptureMode) -> Self {
        match mode {
            CaptureMode::Manual => CaptureMethod::Manual,
            CaptureMode::Automatic => CaptureMethod::Automatic,
        }
    }
}

/// Merchant-side settings for one configured gateway payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub payment_method: String,
    #[serde(default)]
    pub capture_mode: CaptureMode,
    #[serde(default)]
    pub reauthorization_enabled: bool,
    #[serde(default)]
    pub notification_recipients: Vec<String>,
}

impl GatewayConfig {
    pub fn new(payment_method: impl Into<String>) -> Self {
        Self {
            payment_method: payment_method.into(),
            capture_mode: CaptureMode::default(),
            reauthorization_enabled: false,
            notification_recipients: Vec::new(),
        }
    }

    pub fn with_capture_mode(mut self, capture_mode: CaptureMode) -> Self {
        self.capture_mode = capture_mode;
        self
    }

    pub fn with_reauthorization(mut self, recipients: Vec<String>) -> Self {
        self.reauthorization_enabled = true;
        self.notification_recipients = recipients;
        self
    }
}
