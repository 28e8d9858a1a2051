// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The runner-attach handshake: the first frame a runner
//! writes after opening the connection, and the broker's reply.

use rb_core::id::RunnerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AttachRequest {
    Attach {
        runner_id: RunnerId,
        secret: String,
        version: String,
        platform: String,
    },
}

impl AttachRequest {
    pub fn runner_id(&self) -> &RunnerId {
        match self {
            AttachRequest::Attach { runner_id, .. } => runner_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AttachResponse {
    Attached,
    Error { error: String },
}

impl AttachResponse {
    pub fn unauthorized() -> Self {
        AttachResponse::Error { error: "unauthorized".into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_request_serializes_with_kebab_case_tag() {
        let req = AttachRequest::Attach {
            runner_id: RunnerId::new(),
            secret: "s3cr3t".into(),
            version: "1.2.3".into(),
            platform: "linux-x86_64".into(),
        };
        let json = serde_json::to_string(&req).expect("serialize");
        assert!(json.contains("\"type\":\"attach\""));
        let back: AttachRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(req, back);
    }

    #[test]
    fn attached_response_round_trips() {
        let json = serde_json::to_string(&AttachResponse::Attached).expect("serialize");
        assert_eq!(json, "{\"type\":\"attached\"}");
    }

    #[test]
    fn unauthorized_response_matches_wire_shape() {
        let json = serde_json::to_string(&AttachResponse::unauthorized()).expect("serialize");
        assert_eq!(json, "{\"type\":\"error\",\"error\":\"unauthorized\"}");
    }
}
