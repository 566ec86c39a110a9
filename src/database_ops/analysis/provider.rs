use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::util::env as env_util;

/// Shape of the analyze-game edge function result. Everything is optional on
/// our side; the raw object is what gets persisted, this type only backs
/// structured logging and sanity checks.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenGemAnalysis {
    pub hidden_gem_verdict: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    pub risk_score: Option<f64>,
    pub bug_risk: Option<f64>,
    pub refund_mentions: Option<f64>,
    pub review_quality_score: Option<f64>,
    pub ai_error: Option<bool>,
}

/// Computation seam for the AI analysis step. The production impl calls the
/// analyze-game edge function; tests script this trait directly.
#[async_trait::async_trait]
pub trait AnalysisCompute: Send + Sync {
    /// Compute an analysis for one game from its full cached payload. The
    /// returned value is the object to store under the payload's `analysis`
    /// key, verbatim.
    async fn analyze(&self, app_id: i64, payload: &Value) -> Result<Value>;
}

/// Client for the analyze-game edge function. The function reads the whole
/// cached payload (title, tags, review ratios, pricing, playtime), so the
/// request body is the payload as-is rather than a trimmed projection.
/// Env: ANALYZE_GAME_URL (or SUPABASE_URL to derive it),
/// SUPABASE_SERVICE_ROLE_KEY, ANALYZE_TIMEOUT_SECS (default 90).
pub struct AnalysisProvider {
    client: Client,
    endpoint: String,
    service_key: String,
    timeout_secs: u64,
}

impl AnalysisProvider {
    pub fn new(endpoint: String, service_key: String, timeout_secs: u64) -> Self {
        // Keep the builder timeout above the per-call deadline; the
        // tokio::time::timeout wrapper in analyze() is the enforcing layer.
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs + 5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint,
            service_key,
            timeout_secs,
        }
    }

    pub fn from_env() -> Result<Self> {
        let endpoint = match env_util::env_opt("ANALYZE_GAME_URL") {
            Some(url) => url,
            None => {
                let base = env_util::env_req("SUPABASE_URL")
                    .context("set ANALYZE_GAME_URL or SUPABASE_URL for the analyze endpoint")?;
                analyze_endpoint_from(&base)
            }
        };
        let service_key = env_util::env_req("SUPABASE_SERVICE_ROLE_KEY")?;
        let timeout_secs = env_util::env_parse("ANALYZE_TIMEOUT_SECS", 90u64);
        Ok(Self::new(endpoint, service_key, timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_analyze(&self, app_id: i64, payload: &Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("analyze-game request failed for appId {app_id}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("analyze-game returned {status} for appId {app_id}: {body}");
        }

        response
            .json::<Value>()
            .await
            .with_context(|| format!("analyze-game response was not JSON for appId {app_id}"))
    }
}

#[async_trait::async_trait]
impl AnalysisCompute for AnalysisProvider {
    #[instrument(skip(self, payload))]
    async fn analyze(&self, app_id: i64, payload: &Value) -> Result<Value> {
        let body = match tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            self.post_analyze(app_id, payload),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(anyhow!(
                    "analyze-game timed out after {}s for appId {app_id}",
                    self.timeout_secs
                ))
            }
        };

        let analysis = select_analysis_value(body).ok_or_else(|| {
            anyhow!("analyze-game response carried no analysis object for appId {app_id}")
        })?;

        // Best-effort structured peek; the raw object is returned regardless.
        if let Ok(parsed) = serde_json::from_value::<HiddenGemAnalysis>(analysis.clone()) {
            if parsed.ai_error.unwrap_or(false) {
                warn!(app_id, "analyze-game fell back to a heuristic analysis (aiError=true)");
            } else {
                info!(
                    app_id,
                    verdict = ?parsed.hidden_gem_verdict,
                    risk_score = ?parsed.risk_score,
                    "analysis computed"
                );
            }
        }
        Ok(analysis)
    }
}

/// Derive the analyze-game endpoint from a Supabase project base URL.
pub fn analyze_endpoint_from(base: &str) -> String {
    format!("{}/functions/v1/analyze-game", base.trim_end_matches('/'))
}

// The edge function historically returned either the analysis object itself
// or a wrapper with an `analysis` field; accept both, reject anything that
// does not yield a non-empty object.
fn select_analysis_value(body: Value) -> Option<Value> {
    if !body.is_object() {
        return None;
    }
    let candidate = match body.get("analysis") {
        Some(inner) if !inner.is_null() => inner.clone(),
        _ => body,
    };
    let usable = candidate.as_object().map(|m| !m.is_empty()).unwrap_or(false);
    if usable {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_analyze_endpoint_from_base_url() {
        assert_eq!(
            analyze_endpoint_from("https://abc.supabase.co"),
            "https://abc.supabase.co/functions/v1/analyze-game"
        );
        assert_eq!(
            analyze_endpoint_from("https://abc.supabase.co///"),
            "https://abc.supabase.co/functions/v1/analyze-game"
        );
    }

    #[test]
    fn test_select_analysis_prefers_nested_field() {
        let wrapped = json!({"analysis": {"summary": "gem"}, "aiTags": ["Roguelike"]});
        assert_eq!(
            select_analysis_value(wrapped),
            Some(json!({"summary": "gem"}))
        );

        let bare = json!({"hiddenGemVerdict": "Yes", "summary": "gem"});
        assert_eq!(select_analysis_value(bare.clone()), Some(bare));
    }

    #[test]
    fn test_select_analysis_rejects_unusable_shapes() {
        assert_eq!(select_analysis_value(json!("not an object")), None);
        assert_eq!(select_analysis_value(json!({})), None);
        assert_eq!(select_analysis_value(json!({"analysis": "plain text"})), None);
        assert_eq!(select_analysis_value(json!({"analysis": {}})), None);
    }

    #[test]
    fn test_hidden_gem_analysis_parses_edge_function_result() {
        let raw = json!({
            "hiddenGemVerdict": "Yes",
            "summary": "Tight movement shooter with a tiny but devoted audience.",
            "labels": ["Hidden Gem", "Niche"],
            "pros": ["Excellent gunplay"],
            "cons": ["Sparse content"],
            "riskScore": 3,
            "bugRisk": 2,
            "refundMentions": 1,
            "reviewQualityScore": 8,
            "aiTags": ["FPS"],
            "featureLabelsV2": ["movement-shooter"]
        });
        let parsed: HiddenGemAnalysis = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.hidden_gem_verdict.as_deref(), Some("Yes"));
        assert_eq!(parsed.labels, vec!["Hidden Gem", "Niche"]);
        assert_eq!(parsed.risk_score, Some(3.0));
        assert_eq!(parsed.ai_error, None);
    }
}
