//! Persona and policy configuration keyed by business vertical.
//!
//! The catalog is loaded once at startup and is read-only afterwards. Every
//! identifier is validated at load time: vertical ids must be well formed,
//! the default vertical must exist, and tool names must map to a known
//! [`ToolKind`]. Lookups with an unknown vertical fail instead of silently
//! falling back to another persona.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Maximum length of a vertical identifier.
const MAX_VERTICAL_ID_LEN: usize = 64;

/// Errors produced while building or querying a [`PersonaCatalog`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("persona catalog is empty")]
    Empty,

    #[error("invalid vertical identifier: {0:?}")]
    InvalidVertical(String),

    #[error("unknown vertical: {0}")]
    UnknownVertical(String),

    #[error("default vertical {0} has no persona")]
    MissingDefault(String),

    #[error("persona {vertical} has an empty {field}")]
    IncompletePersona {
        vertical: String,
        field: &'static str,
    },
}

/// A validated business-vertical identifier (e.g. `support`, `dental-office`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VerticalId(String);

impl VerticalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VerticalId {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= MAX_VERTICAL_ID_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(CatalogError::InvalidVertical(s.to_string()))
        }
    }
}

impl fmt::Display for VerticalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Side-effecting actions a persona is permitted to request from the
/// reasoning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    LookupOrder,
    CreateTicket,
    ScheduleAppointment,
    SendSms,
    TransferToHuman,
}

impl ToolKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::LookupOrder => "lookup_order",
            Self::CreateTicket => "create_ticket",
            Self::ScheduleAppointment => "schedule_appointment",
            Self::SendSms => "send_sms",
            Self::TransferToHuman => "transfer_to_human",
        }
    }
}

fn default_tone() -> String {
    "warm and concise".to_string()
}

/// Persona and policy for one vertical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Text spoken when a call connects.
    pub greeting: String,
    /// Base instructions for the reasoning engine.
    pub system_prompt: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    /// Tools the reasoning engine may invoke for this vertical.
    #[serde(default)]
    pub tools: Vec<ToolKind>,
    /// Compliance text the agent must respect (disclosures, restrictions).
    #[serde(default)]
    pub compliance_text: Option<String>,
    /// Reasoning provider override.
    #[serde(default)]
    pub provider: Option<String>,
    /// Reasoning model override.
    #[serde(default)]
    pub model: Option<String>,
}

impl PersonaConfig {
    /// Renders the full instruction block sent to the reasoning engine.
    pub fn instructions(&self) -> String {
        let mut out = self.system_prompt.trim().to_string();
        out.push_str("\n\nTone: ");
        out.push_str(&self.tone);
        out.push_str(
            "\nYou are speaking on a phone call. Keep replies short and avoid markup.",
        );
        if !self.tools.is_empty() {
            let names: Vec<&str> = self.tools.iter().map(|t| t.label()).collect();
            out.push_str("\nPermitted tools: ");
            out.push_str(&names.join(", "));
        }
        if let Some(compliance) = self.compliance_text.as_deref().map(str::trim) {
            if !compliance.is_empty() {
                out.push_str("\nCompliance: ");
                out.push_str(compliance);
            }
        }
        out
    }

    fn validate(&self, vertical: &VerticalId) -> Result<(), CatalogError> {
        if self.greeting.trim().is_empty() {
            return Err(CatalogError::IncompletePersona {
                vertical: vertical.to_string(),
                field: "greeting",
            });
        }
        if self.system_prompt.trim().is_empty() {
            return Err(CatalogError::IncompletePersona {
                vertical: vertical.to_string(),
                field: "system_prompt",
            });
        }
        Ok(())
    }
}

/// Immutable lookup table of personas, safe to share across sessions.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    default_vertical: VerticalId,
    personas: HashMap<VerticalId, Arc<PersonaConfig>>,
}

impl PersonaCatalog {
    /// Builds a catalog, validating every identifier and persona.
    pub fn new<I>(default_vertical: &str, entries: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (String, PersonaConfig)>,
    {
        let mut personas = HashMap::new();
        for (id, persona) in entries {
            let vertical: VerticalId = id.parse()?;
            persona.validate(&vertical)?;
            personas.insert(vertical, Arc::new(persona));
        }
        if personas.is_empty() {
            return Err(CatalogError::Empty);
        }

        let default_vertical: VerticalId = default_vertical.parse()?;
        if !personas.contains_key(&default_vertical) {
            return Err(CatalogError::MissingDefault(default_vertical.to_string()));
        }

        Ok(Self {
            default_vertical,
            personas,
        })
    }

    pub fn default_vertical(&self) -> &VerticalId {
        &self.default_vertical
    }

    /// Resolves a requested vertical.
    ///
    /// `None` or a blank request selects the default vertical. A malformed or
    /// unknown identifier is an error.
    pub fn resolve(
        &self,
        requested: Option<&str>,
    ) -> Result<(VerticalId, Arc<PersonaConfig>), CatalogError> {
        let vertical = match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw.parse::<VerticalId>()?,
            None => self.default_vertical.clone(),
        };
        let persona = self
            .personas
            .get(&vertical)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownVertical(vertical.to_string()))?;
        Ok((vertical, persona))
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Vertical identifiers in sorted order.
    pub fn verticals(&self) -> Vec<&VerticalId> {
        let mut ids: Vec<&VerticalId> = self.personas.keys().collect();
        ids.sort();
        ids
    }
}
