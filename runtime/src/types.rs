//! Shared data model: requests, candidates and normalized records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four extraction techniques, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Network,
    Hydration,
    Dom,
    Heuristic,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Network => "network",
            StrategyKind::Hydration => "hydration",
            StrategyKind::Dom => "dom",
            StrategyKind::Heuristic => "heuristic",
        }
    }
}

/// Which strategy produced the records of a call, or `none`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyUsed {
    Network,
    Hydration,
    Dom,
    Heuristic,
    None,
}

impl From<Option<StrategyKind>> for StrategyUsed {
    fn from(kind: Option<StrategyKind>) -> Self {
        match kind {
            Some(StrategyKind::Network) => StrategyUsed::Network,
            Some(StrategyKind::Hydration) => StrategyUsed::Hydration,
            Some(StrategyKind::Dom) => StrategyUsed::Dom,
            Some(StrategyKind::Heuristic) => StrategyUsed::Heuristic,
            None => StrategyUsed::None,
        }
    }
}

/// What the caller wants done with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Extract,
    Continue,
    EndSession,
}

/// Load-more trigger performed between passes on `continue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContinueTrigger {
    /// Click a "load more" / "next" control.
    Click { selector: String },
    /// Scroll a container (or the result container when `target` is absent).
    Scroll {
        #[serde(default)]
        target: Option<String>,
    },
}

/// One caller invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    #[serde(default)]
    pub page_hint: Option<String>,
    #[serde(default)]
    pub max_records: Option<usize>,
    #[serde(default)]
    pub dom_selector_override: Option<String>,
    pub session_id: String,
    pub action: Action,
    #[serde(default)]
    pub trigger: Option<ContinueTrigger>,
}

impl ExtractionRequest {
    /// Convenience constructor for a plain request.
    pub fn new(session_id: impl Into<String>, action: Action) -> Self {
        Self {
            page_hint: None,
            max_records: None,
            dom_selector_override: None,
            session_id: session_id.into(),
            action,
            trigger: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.page_hint = Some(hint.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.dom_selector_override = Some(selector.into());
        self
    }

    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = Some(max);
        self
    }

    pub fn with_trigger(mut self, trigger: ContinueTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }
}

/// Untyped output of one strategy, consumed immediately by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCandidate {
    pub source_strategy: StrategyKind,
    pub payload: Value,
    pub extracted_at: DateTime<Utc>,
}

impl RawCandidate {
    pub fn new(source_strategy: StrategyKind, payload: Value) -> Self {
        Self {
            source_strategy,
            payload,
            extracted_at: Utc::now(),
        }
    }
}

/// Rating with its detected scale. `normalized` is always on 0–5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub raw: Option<f64>,
    pub raw_text: String,
    pub scale: Option<u16>,
    pub normalized: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceBasis {
    PerNight,
    PerStay,
}

/// Price in integer minor currency units plus the raw text it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub amount_minor_units: Option<i64>,
    pub currency: Option<String>,
    pub basis: Option<PriceBasis>,
    pub taxes_included: Option<bool>,
    pub raw: String,
    #[serde(default)]
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Limited,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub strategy: StrategyKind,
    pub page_index: u32,
}

/// Canonical output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub rating: Option<Rating>,
    pub price: Option<Price>,
    pub media: Vec<String>,
    pub availability: Option<Availability>,
    pub provenance: Provenance,
}

/// Why a candidate or record did not make it into the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingCoreFields,
    Duplicate,
    RecordCapReached,
    MalformedCapture,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::MissingCoreFields => "missing_core_fields",
            RejectionReason::Duplicate => "duplicate",
            RejectionReason::RecordCapReached => "record_cap_reached",
            RejectionReason::MalformedCapture => "malformed_capture",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = r#"{"sessionId":"s1","action":"continue","pageHint":"booking",
            "trigger":{"kind":"click","selector":"button.load-more"}}"#;
        let req: ExtractionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.session_id, "s1");
        assert_eq!(req.action, Action::Continue);
        assert_eq!(req.page_hint.as_deref(), Some("booking"));
        assert_eq!(
            req.trigger,
            Some(ContinueTrigger::Click {
                selector: "button.load-more".into()
            })
        );
        assert!(req.max_records.is_none());
    }

    #[test]
    fn test_end_session_action_name() {
        let req: ExtractionRequest =
            serde_json::from_str(r#"{"sessionId":"s","action":"end_session"}"#).unwrap();
        assert_eq!(req.action, Action::EndSession);
    }

    #[test]
    fn test_strategy_used_from_option() {
        assert_eq!(StrategyUsed::from(None), StrategyUsed::None);
        assert_eq!(
            serde_json::to_value(StrategyUsed::from(Some(StrategyKind::Dom))).unwrap(),
            "dom"
        );
    }
}
