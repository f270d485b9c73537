//! Queue message envelope.

use serde::{Deserialize, Serialize};

/// Body of every message on the topic. Meaning depends on the populated
/// fields:
///
/// | `job_name` | `resource_canonical` | meaning |
/// |---|---|---|
/// | set | unset | run that job |
/// | set | set | run that job, binding the given resource version |
/// | unset | set | run the check handler for that resource |
/// | unset | unset | no-op, acknowledge |
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub pipeline_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_canonical: Option<String>,
    /// Zero means "use the latest stored version".
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version_id: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl Body {
    /// Serializes the body for the wire.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes a wire body.
    pub fn decode(raw: &[u8]) -> serde_json::Result<Body> {
        serde_json::from_slice(raw)
    }

    /// A resource-check message, as published by the scheduler.
    pub fn check(pipeline_name: impl Into<String>, resource_canonical: impl Into<String>) -> Body {
        Body {
            pipeline_name: pipeline_name.into(),
            job_name: None,
            resource_canonical: Some(resource_canonical.into()),
            version_id: 0,
        }
    }

    /// A job-run message.
    pub fn job(pipeline_name: impl Into<String>, job_name: impl Into<String>) -> Body {
        Body {
            pipeline_name: pipeline_name.into(),
            job_name: Some(job_name.into()),
            resource_canonical: None,
            version_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_body_wire_format() {
        let b = Body::check("pp", "git.source");
        let raw = serde_json::to_string(&b).unwrap();
        assert_eq!(
            raw,
            r#"{"pipeline_name":"pp","resource_canonical":"git.source"}"#
        );
    }

    #[test]
    fn test_version_id_defaults_to_zero() {
        let b: Body = serde_json::from_str(r#"{"pipeline_name":"pp","job_name":"build"}"#).unwrap();
        assert_eq!(b.version_id, 0);
        assert_eq!(b.job_name.as_deref(), Some("build"));
        assert!(b.resource_canonical.is_none());
    }
}
