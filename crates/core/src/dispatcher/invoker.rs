//! The upstream invoker boundary. The HTTP client and the actual Lark/Feishu
//! API surface are explicitly out of scope (§1); the Dispatcher only needs
//! something implementing this trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::tool::{AuthMode, UpstreamBinding};

/// A single piece of the heterogeneous result payload (§9 "Heterogeneous
/// result payloads"): tagged variants instead of a language-native dynamic
/// value.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
    Json { json: Value },
    Binary {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
        mime_type: String,
    },
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        use base64::Engine;
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InvocationResult {
    pub content: Vec<Content>,
    pub metadata: Value,
}

#[async_trait]
pub trait UpstreamInvoker: Send + Sync {
    async fn invoke(
        &self,
        binding: &UpstreamBinding,
        auth_mode: AuthMode,
        args: &Value,
        timeout: std::time::Duration,
    ) -> Result<InvocationResult, CoreError>;
}
