use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use kube::core::DynamicObject;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

/// Floor enforced by the validating webhook. Values at or below this are
/// denied; the smallest accepted value is 31.
pub const MIN_GRACE_PERIOD_SECONDS: i64 = 30;

/// The field this webhook owns, used both for lookup and as patch target.
pub const GRACE_PERIOD_FIELD: &str = "terminationGracePeriodSeconds";

/// JSON pointer to the grace period inside the workload manifest.
pub fn grace_period_pointer() -> PointerBuf {
    PointerBuf::from_tokens(["spec", "template", "spec", GRACE_PERIOD_FIELD])
}

/// The registered resource kinds guarantee `spec.template.spec` exists, so a
/// request violating that shape is a caller error surfaced as HTTP 500, not a
/// policy denial.
#[derive(Debug, Error)]
pub enum SpecShapeError {
    #[error("admission request carries no object")]
    MissingObject,
    #[error("object has no mapping at spec.template.spec")]
    MissingPodSpec,
    #[error("terminationGracePeriodSeconds is not an integer: {0}")]
    NonIntegerValue(Value),
}

/// Grace period as found on the object under review. Absence is its own
/// state: a zero-second grace period is `Present(0)`, never "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracePeriod {
    Absent,
    Present(i64),
}

impl GracePeriod {
    pub fn is_present(self) -> bool {
        matches!(self, GracePeriod::Present(_))
    }
}

/// Reads `spec.template.spec.terminationGracePeriodSeconds` from the object
/// under review. The fragment itself is never modified; mutation is expressed
/// as patch instructions downstream.
pub fn extract_grace_period(
    object: Option<&DynamicObject>,
) -> Result<GracePeriod, SpecShapeError> {
    let object = object.ok_or(SpecShapeError::MissingObject)?;

    let pod_spec = object
        .data
        .get("spec")
        .and_then(|s| s.get("template"))
        .and_then(|t| t.get("spec"))
        .and_then(|s| s.as_object())
        .ok_or(SpecShapeError::MissingPodSpec)?;

    match pod_spec.get(GRACE_PERIOD_FIELD) {
        None | Some(Value::Null) => Ok(GracePeriod::Absent),
        Some(value) => value
            .as_i64()
            .map(GracePeriod::Present)
            .ok_or_else(|| SpecShapeError::NonIntegerValue(value.clone())),
    }
}

/// Outcome of a single admission decision.
#[derive(Debug)]
pub struct Verdict {
    pub allowed: bool,
    pub message: String,
    pub code: Option<u16>,
    pub patch: Option<Patch>,
}

impl Verdict {
    fn allow(message: String) -> Self {
        Self {
            allowed: true,
            message,
            code: None,
            patch: None,
        }
    }
}

pub fn op_label(op: &PatchOperation) -> &'static str {
    match op {
        PatchOperation::Add(_) => "add",
        PatchOperation::Replace(_) => "replace",
        _ => "other",
    }
}

pub struct GraceEngine {
    default_grace_period: i64,
}

impl GraceEngine {
    pub fn new(default_grace_period: i64) -> Self {
        Self {
            default_grace_period,
        }
    }

    /// Pins the grace period to the configured default on every admitted
    /// object: `replace` when the field pre-exists, `add` when it does not.
    /// The caller-supplied value is never kept. Mutation only sets defaults,
    /// so the decision is always an allow.
    pub fn decide_mutation(&self, uid: &str, current: GracePeriod) -> Verdict {
        let path = grace_period_pointer();
        let value = json!(self.default_grace_period);

        let op = if current.is_present() {
            PatchOperation::Replace(ReplaceOperation { path, value })
        } else {
            PatchOperation::Add(AddOperation { path, value })
        };

        info!(
            uid = %uid,
            op = op_label(&op),
            value = self.default_grace_period,
            "setting terminationGracePeriodSeconds"
        );

        Verdict {
            allowed: true,
            message: format!(
                "terminationGracePeriodSeconds set to {}",
                self.default_grace_period
            ),
            code: None,
            patch: Some(Patch(vec![op])),
        }
    }

    /// Three-way check: absent values are valid (defaulting is the mutating
    /// webhook's job), present values must clear the floor. Validation never
    /// patches.
    pub fn decide_validation(&self, uid: &str, current: GracePeriod) -> Verdict {
        match current {
            GracePeriod::Absent => Verdict::allow(
                "no terminationGracePeriodSeconds provided, defaulting is left to the \
                 mutating webhook"
                    .to_string(),
            ),
            GracePeriod::Present(value) if value > MIN_GRACE_PERIOD_SECONDS => {
                Verdict::allow(format!("valid value has been provided ({value})"))
            }
            GracePeriod::Present(value) => {
                warn!(uid = %uid, value, "denying termination grace period below the floor");
                Verdict {
                    allowed: false,
                    message: format!(
                        "termination period lower than {MIN_GRACE_PERIOD_SECONDS}s is not \
                         allowed (given {value})"
                    ),
                    code: Some(403),
                    patch: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(pod_spec: Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "demo", "namespace": "default"},
            "spec": {"replicas": 1, "template": {"spec": pod_spec}},
        }))
        .unwrap()
    }

    #[test]
    fn test_extract_absent_and_present() {
        let object = deployment(json!({"containers": []}));
        assert_eq!(
            extract_grace_period(Some(&object)).unwrap(),
            GracePeriod::Absent
        );

        let object = deployment(json!({"terminationGracePeriodSeconds": 10}));
        assert_eq!(
            extract_grace_period(Some(&object)).unwrap(),
            GracePeriod::Present(10)
        );

        let object = deployment(json!({"terminationGracePeriodSeconds": 0}));
        assert_eq!(
            extract_grace_period(Some(&object)).unwrap(),
            GracePeriod::Present(0)
        );
    }

    #[test]
    fn test_extract_rejects_malformed_shapes() {
        assert!(matches!(
            extract_grace_period(None),
            Err(SpecShapeError::MissingObject)
        ));

        let object: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "demo"},
            "spec": {"replicas": 1},
        }))
        .unwrap();
        assert!(matches!(
            extract_grace_period(Some(&object)),
            Err(SpecShapeError::MissingPodSpec)
        ));

        let object = deployment(json!({"terminationGracePeriodSeconds": "30"}));
        assert!(matches!(
            extract_grace_period(Some(&object)),
            Err(SpecShapeError::NonIntegerValue(_))
        ));
    }

    #[test]
    fn test_mutation_adds_when_absent() {
        let engine = GraceEngine::new(31_556_952);
        let verdict = engine.decide_mutation("uid-1", GracePeriod::Absent);

        assert!(verdict.allowed);
        let patch = verdict.patch.unwrap();
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{
                "op": "add",
                "path": "/spec/template/spec/terminationGracePeriodSeconds",
                "value": 31_556_952,
            }])
        );
    }

    #[test]
    fn test_mutation_replaces_when_present_ignoring_caller_value() {
        let engine = GraceEngine::new(600);
        let verdict = engine.decide_mutation("uid-2", GracePeriod::Present(10));

        assert!(verdict.allowed);
        let patch = verdict.patch.unwrap();
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{
                "op": "replace",
                "path": "/spec/template/spec/terminationGracePeriodSeconds",
                "value": 600,
            }])
        );
    }

    // op choice follows presence of the field, not its value: a pre-set
    // period equal to the default still gets a replace.
    #[test]
    fn test_mutation_op_pinned_to_presence() {
        let engine = GraceEngine::new(300);

        let on_present = engine.decide_mutation("uid-3", GracePeriod::Present(300));
        assert_eq!(op_label(&on_present.patch.unwrap().0[0]), "replace");

        let on_absent = engine.decide_mutation("uid-3", GracePeriod::Absent);
        assert_eq!(op_label(&on_absent.patch.unwrap().0[0]), "add");
    }

    #[test]
    fn test_mutation_always_allows() {
        let engine = GraceEngine::new(31_556_952);
        for current in [
            GracePeriod::Absent,
            GracePeriod::Present(0),
            GracePeriod::Present(-5),
            GracePeriod::Present(1_000_000),
        ] {
            assert!(engine.decide_mutation("uid", current).allowed);
        }
    }

    #[test]
    fn test_validation_boundary() {
        let engine = GraceEngine::new(31_556_952);

        let at_floor = engine.decide_validation("uid", GracePeriod::Present(30));
        assert!(!at_floor.allowed);
        assert_eq!(at_floor.code, Some(403));
        assert!(at_floor.message.contains("given 30"));

        let above_floor = engine.decide_validation("uid", GracePeriod::Present(31));
        assert!(above_floor.allowed);
        assert_eq!(above_floor.code, None);
        assert!(above_floor.message.contains("31"));
    }

    #[test]
    fn test_validation_denies_zero_and_negative() {
        let engine = GraceEngine::new(31_556_952);

        let zero = engine.decide_validation("uid", GracePeriod::Present(0));
        assert!(!zero.allowed);
        assert_eq!(zero.code, Some(403));

        let negative = engine.decide_validation("uid", GracePeriod::Present(-1));
        assert!(!negative.allowed);
    }

    #[test]
    fn test_validation_allows_absent() {
        let engine = GraceEngine::new(31_556_952);
        let verdict = engine.decide_validation("uid", GracePeriod::Absent);
        assert!(verdict.allowed);
        assert!(verdict.patch.is_none());
    }

    #[test]
    fn test_validation_never_patches() {
        let engine = GraceEngine::new(31_556_952);
        for current in [GracePeriod::Absent, GracePeriod::Present(5), GracePeriod::Present(60)] {
            assert!(engine.decide_validation("uid", current).patch.is_none());
        }
    }
}
