use crate::types::Severity;

/// Map a glog/klog level code to a severity. Anything but W, E and F is ignored.
pub fn classify(level_code: &str) -> Severity {
    match level_code {
        "W" => Severity::Warning,
        "E" => Severity::Error,
        "F" => Severity::Fail,
        _ => Severity::Ignored,
    }
}
