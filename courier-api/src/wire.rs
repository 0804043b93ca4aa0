//! JSON request and response bodies.
//!
//! Field names follow the camelCase wire format. Requests convert into the
//! dispatch engine's types; attachment content arrives base64-encoded.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::RelayConfig;
use courier_dispatch::{
    Attachment, Body, DeliveryMode, DispatchRequest, DispatchSummary, SingleMessageRequest,
    TransmissionOutcome, ValidationError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAttachment {
    pub filename: String,
    /// Base64
    pub content: String,
    pub content_type: String,
}

fn decode_attachments(
    attachments: Vec<WireAttachment>,
) -> Result<Vec<Attachment>, ValidationError> {
    attachments
        .into_iter()
        .enumerate()
        .map(|(i, attachment)| {
            let data = STANDARD
                .decode(attachment.content.trim())
                .map_err(|err| ValidationError::new(format!("attachments[{i}].content"), err.to_string()))?;
            Ok(Attachment::new(
                attachment.filename,
                attachment.content_type,
                data,
            ))
        })
        .collect()
}

/// `POST /api/send-email`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    pub smtp: RelayConfig,
    #[serde(default)]
    pub from: Option<String>,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
}

impl SendEmailRequest {
    /// Splits into the relay and the message.
    pub fn into_parts(self) -> Result<(RelayConfig, SingleMessageRequest), ValidationError> {
        let attachments = decode_attachments(self.attachments)?;
        Ok((
            self.smtp,
            SingleMessageRequest {
                from: self.from,
                to: self.to,
                cc: self.cc,
                bcc: self.bcc,
                subject: self.subject,
                body: Body {
                    text: self.text,
                    html: self.html,
                },
                attachments,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMethod {
    /// One message per recipient
    #[default]
    Individual,
    /// One message to everyone
    Batch,
}

impl From<SendMethod> for DeliveryMode {
    fn from(method: SendMethod) -> Self {
        match method {
            SendMethod::Individual => Self::Individual,
            SendMethod::Batch => Self::CombinedRecipients,
        }
    }
}

/// `POST /api/send-bulk-email`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEmailRequest {
    pub smtp: RelayConfig,
    #[serde(default)]
    pub from: Option<String>,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub send_method: SendMethod,
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Milliseconds
    #[serde(default)]
    pub delay_between_batches: Option<u64>,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
}

impl BulkEmailRequest {
    pub fn into_parts(self) -> Result<(RelayConfig, DispatchRequest), ValidationError> {
        let attachments = decode_attachments(self.attachments)?;
        Ok((
            self.smtp,
            DispatchRequest {
                from: self.from,
                recipients: self.recipients,
                subject: self.subject,
                body: Body {
                    text: self.text,
                    html: self.html,
                },
                attachments,
                mode: Some(self.send_method.into()),
                batch_size: self.batch_size,
                pause: self.delay_between_batches.map(Duration::from_millis),
            },
        ))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummaryCounts {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEmailResponse {
    pub success: bool,
    pub message: &'static str,
    pub results: Vec<TransmissionOutcome>,
    pub errors: Vec<TransmissionOutcome>,
    pub summary: SummaryCounts,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl From<DispatchSummary> for BulkEmailResponse {
    fn from(summary: DispatchSummary) -> Self {
        let (results, errors) = summary
            .outcomes
            .into_iter()
            .partition(|outcome| outcome.success);

        Self {
            success: true,
            message: "Bulk email operation completed",
            results,
            errors,
            summary: SummaryCounts {
                total: summary.total,
                successful: summary.successful,
                failed: summary.failed,
            },
            cancelled: summary.cancelled,
        }
    }
}
