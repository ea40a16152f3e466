use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::service::issuer::{IssuanceOutcome, IssuanceRequest, IssuanceResponse};

/// Prefix that marks a response entry as a failure rather than a URL.
pub const ERROR_MARKER: &str = "Error: ";

#[derive(Debug, Deserialize)]
pub struct GenerateSignedUrlsRequest {
    /// client key -> object name; absent or `null` is an empty batch
    #[serde(default)]
    pub files: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
pub struct GenerateSignedUrlsResponse {
    /// client key -> signed URL, or [`ERROR_MARKER`] followed by the reason
    pub urls: HashMap<String, String>,
}

impl GenerateSignedUrlsRequest {
    pub fn into_issuance_request(self) -> IssuanceRequest {
        self.files.unwrap_or_default()
    }
}

impl From<IssuanceResponse> for GenerateSignedUrlsResponse {
    fn from(value: IssuanceResponse) -> Self {
        Self {
            urls: value
                .into_iter()
                .map(|(client_key, outcome)| {
                    let entry = match outcome {
                        IssuanceOutcome::Credential(signed_url) => signed_url.url,
                        IssuanceOutcome::Failure(reason) => format!("{ERROR_MARKER}{reason}"),
                    };
                    (client_key, entry)
                })
                .collect(),
        }
    }
}
