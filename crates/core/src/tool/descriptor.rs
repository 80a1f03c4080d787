use serde::{Deserialize, Serialize};

/// Read/write/admin/default classification drives both rate-limit tier
/// selection (§4.3) and whether a call is cache-eligible (§4.2 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Read,
    Write,
    Admin,
    Default,
}

impl Classification {
    pub fn tier_name(&self) -> &'static str {
        match self {
            Classification::Read => "read",
            Classification::Write => "write",
            Classification::Admin => "admin",
            Classification::Default => "default",
        }
    }

    pub fn is_cache_eligible(&self) -> bool {
        matches!(self, Classification::Read)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Tenant,
    User,
    Either,
}

/// Opaque handle the Dispatcher hands to the upstream invoker. The core
/// never inspects its contents (§9 "dynamic tool descriptors").
#[derive(Debug, Clone)]
pub struct UpstreamBinding {
    pub opaque_id: String,
}

impl UpstreamBinding {
    pub fn opaque(id: impl Into<String>) -> Self {
        Self {
            opaque_id: id.into(),
        }
    }
}

/// Immutable tool record (§3). Created at registry initialization time and
/// never mutated afterward.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub classification: Classification,
    pub auth_modes: Vec<AuthMode>,
    pub binding: UpstreamBinding,
}

impl ToolDescriptor {
    pub fn supports(&self, mode: AuthMode) -> bool {
        self.auth_modes.contains(&mode) || self.auth_modes.contains(&AuthMode::Either)
    }
}
