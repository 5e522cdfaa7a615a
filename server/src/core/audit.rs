//! Tracing-backed audit sink.
//!
//! Default [`AuditAdapter`] implementation writing entries to the tracing
//! pipeline under the `canopy::audit` target. Deployments that need a
//! durable trail plug in their own adapter.

use async_trait::async_trait;
use canopy_types::audit_adapter::AuditAdapter;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct TracingAuditAdapter;

#[async_trait]
impl AuditAdapter for TracingAuditAdapter {
	async fn event(&self, action: &str, details: Value) {
		tracing::info!(target: "canopy::audit", action, details = %details);
	}

	async fn warning(&self, action: &str, code: &str, details: Value) {
		tracing::warn!(target: "canopy::audit", action, code, details = %details);
	}

	async fn error(&self, action: &str, code: &str, details: Value) {
		tracing::error!(target: "canopy::audit", action, code, details = %details);
	}
}

// vim: ts=4
