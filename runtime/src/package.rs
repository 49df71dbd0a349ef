//! Result packaging: typed response, diagnostics and the compressed full payload.

use crate::chain::AttemptLog;
use crate::error::{HarvestError, HarvestResult};
use crate::session::{CompletionReason, ExtractionSession, PassResult, SessionPhase};
use crate::types::{NormalizedRecord, RejectionReason, StrategyUsed};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};

pub const PAYLOAD_ENCODING: &str = "gzip+base64";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&HarvestError> for ErrorInfo {
    fn from(e: &HarvestError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub stability_timed_out: bool,
    pub rejected_count: usize,
    /// Counts keyed by reason code (`duplicate`, `missing_core_fields`, ...).
    pub rejection_reasons: BTreeMap<String, usize>,
    pub attempts: Vec<AttemptLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionReason>,
    /// Records accumulated by the session so far.
    pub session_record_count: usize,
}

/// What every call returns to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    pub ok: bool,
    pub strategy_used: StrategyUsed,
    pub record_count: usize,
    pub records: Vec<NormalizedRecord>,
    /// The session's accumulated records, gzip-compressed then base64-encoded.
    pub full_payload: String,
    pub payload_encoding: String,
    pub timing_ms: u64,
    pub session_id: String,
    pub session_state: Option<SessionPhase>,
    pub page_index: Option<u32>,
    pub diagnostics: Diagnostics,
}

impl ExtractionResponse {
    /// Decode `full_payload` back into records.
    pub fn full_records(&self) -> HarvestResult<Vec<NormalizedRecord>> {
        decode_payload(&self.full_payload)
    }
}

pub fn encode_payload(records: &[NormalizedRecord]) -> HarvestResult<String> {
    let json = serde_json::to_vec(records).map_err(|e| HarvestError::Encoding(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| HarvestError::Encoding(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| HarvestError::Encoding(e.to_string()))?;
    Ok(STANDARD.encode(compressed))
}

pub fn decode_payload(payload: &str) -> HarvestResult<Vec<NormalizedRecord>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let compressed = STANDARD
        .decode(payload.trim())
        .map_err(|e| HarvestError::Encoding(format!("base64: {e}")))?;
    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| HarvestError::Encoding(format!("gzip: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| HarvestError::Encoding(format!("json: {e}")))
}

fn reason_counts(rejections: &BTreeMap<RejectionReason, usize>) -> BTreeMap<String, usize> {
    rejections
        .iter()
        .map(|(reason, count)| (reason.as_str().to_string(), *count))
        .collect()
}

pub struct ResultPackager;

impl ResultPackager {
    /// Response for a completed `extract` or `continue` pass.
    pub fn from_pass(
        pass: PassResult,
        session_records: &[NormalizedRecord],
        timing_ms: u64,
    ) -> HarvestResult<ExtractionResponse> {
        Ok(ExtractionResponse {
            ok: true,
            strategy_used: pass.strategy_used.into(),
            record_count: pass.accepted.len(),
            full_payload: encode_payload(session_records)?,
            payload_encoding: PAYLOAD_ENCODING.to_string(),
            timing_ms,
            session_id: pass.session_id,
            session_state: Some(pass.phase),
            page_index: Some(pass.page_index),
            diagnostics: Diagnostics {
                stability_timed_out: pass.stability_timed_out,
                rejected_count: pass.rejections.values().sum(),
                rejection_reasons: reason_counts(&pass.rejections),
                attempts: pass.attempts,
                error: None,
                notes: pass.notes,
                completion: pass.completion,
                session_record_count: session_records.len(),
            },
            records: pass.accepted,
        })
    }

    /// Response for `end_session`: every record the session accumulated.
    pub fn ended(session: ExtractionSession, timing_ms: u64) -> HarvestResult<ExtractionResponse> {
        Ok(ExtractionResponse {
            ok: true,
            strategy_used: StrategyUsed::None,
            record_count: session.records.len(),
            full_payload: encode_payload(&session.records)?,
            payload_encoding: PAYLOAD_ENCODING.to_string(),
            timing_ms,
            session_id: session.id,
            session_state: Some(session.phase),
            page_index: session.pages.checked_sub(1),
            diagnostics: Diagnostics {
                completion: session.completion,
                session_record_count: session.records.len(),
                ..Default::default()
            },
            records: session.records,
        })
    }

    /// `ok: false` response carrying a non-fatal error.
    pub fn failure(
        session_id: &str,
        error: &HarvestError,
        session_state: Option<SessionPhase>,
        timing_ms: u64,
    ) -> ExtractionResponse {
        ExtractionResponse {
            ok: false,
            strategy_used: StrategyUsed::None,
            record_count: 0,
            records: Vec::new(),
            full_payload: String::new(),
            payload_encoding: PAYLOAD_ENCODING.to_string(),
            timing_ms,
            session_id: session_id.to_string(),
            session_state,
            page_index: None,
            diagnostics: Diagnostics {
                error: Some(error.into()),
                ..Default::default()
            },
        }
    }
}
