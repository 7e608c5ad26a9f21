use json_patch::{Patch, PatchOperation};
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{Verdict, grace_period_pointer};

pub const API_VERSION: &str = "admission.k8s.io/v1";
pub const KIND: &str = "AdmissionReview";

const JSON_PATCH: &str = "JSONPatch";

/// A verdict whose patch violates the emitted-patch contract is a bug in the
/// decision engine; the handler turns this into HTTP 500 rather than sending
/// a malformed patch to the API server.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("patch operation {index} is not an add or replace")]
    UnexpectedOp { index: usize },
    #[error("patch operation {index} targets '{path}' instead of '{expected}'")]
    WrongPath {
        index: usize,
        path: String,
        expected: String,
    },
    #[error("patch operation {index} does not carry an integer value")]
    NonIntegerValue { index: usize },
    #[error("failed to serialize patch: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Response half of an `AdmissionReview`, shaped per the admission.k8s.io/v1
/// wire contract.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEnvelope {
    pub api_version: String,
    pub kind: String,
    pub response: ReviewResponse,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    /// Echoed verbatim from the request; the API server pairs responses with
    /// requests by this field.
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReviewStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
    /// Base64 on the wire; `ByteString` carries the `[]byte` encoding rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<ByteString>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub message: String,
}

/// Wraps a verdict in a response envelope. A patch, when present, is checked
/// against the emitted-patch contract, serialized, and carried base64-encoded
/// with `patchType: JSONPatch`.
pub fn encode(uid: &str, verdict: Verdict) -> Result<ReviewEnvelope, EncodeError> {
    let patch = match verdict.patch {
        Some(patch) => {
            check_patch_shape(&patch)?;
            Some(ByteString(serde_json::to_vec(&patch)?))
        }
        None => None,
    };
    let patch_type = patch.is_some().then(|| JSON_PATCH.to_string());

    Ok(ReviewEnvelope {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        response: ReviewResponse {
            uid: uid.to_string(),
            allowed: verdict.allowed,
            status: Some(ReviewStatus {
                code: verdict.code,
                message: verdict.message,
            }),
            patch_type,
            patch,
        },
    })
}

/// Every emitted operation must set the grace-period field: `add` or
/// `replace`, the fixed pointer, an integer value.
fn check_patch_shape(patch: &Patch) -> Result<(), EncodeError> {
    let expected = grace_period_pointer();

    for (index, op) in patch.0.iter().enumerate() {
        let (path, value) = match op {
            PatchOperation::Add(add) => (&add.path, &add.value),
            PatchOperation::Replace(replace) => (&replace.path, &replace.value),
            _ => return Err(EncodeError::UnexpectedOp { index }),
        };
        if *path != expected {
            return Err(EncodeError::WrongPath {
                index,
                path: path.to_string(),
                expected: expected.to_string(),
            });
        }
        if !value.is_i64() {
            return Err(EncodeError::NonIntegerValue { index });
        }
    }

    Ok(())
}
