//! Admission gate constants.

/// Guards the admission score's logarithms and divisions at 0 and 1.
pub const SCORE_EPSILON: f64 = 1e-7;

/// Default admission score threshold.
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.6;

/// API version of admission reviews accepted and produced by the webhook.
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";

pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";
