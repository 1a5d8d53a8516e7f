//! Builds engine components from [`Settings`].

use anyhow::{Context, Result, anyhow};
use healthcrew_common::config::EnvError;
use healthcrew_common::{ErrorCode, Settings, ThresholdOverrides};
use healthcrew_engine::rca::{HttpAnalysisSource, KnowledgeLookup, KnownBugSource, RuleBasedSource};
use healthcrew_engine::session::{FallbackCredential, SessionConfig, SessionTarget};
use healthcrew_engine::{CheckRegistry, KnowledgeBase, RcaCorrelator};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fold accumulated environment errors into one report.
pub fn env_errors(errors: Vec<EnvError>) -> anyhow::Error {
    let lines: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
    anyhow!("invalid environment configuration:\n{}", lines.join("\n"))
}

/// Builtin checks with threshold overrides applied.
pub fn registry(settings: &Settings) -> Result<CheckRegistry> {
    let mut registry = CheckRegistry::with_builtin_checks();
    let Some(path) = &settings.thresholds_file.value else {
        return Ok(registry);
    };
    let overrides = ThresholdOverrides::load(path).context(ErrorCode::ConfigThresholdError)?;
    for unknown in overrides.unknown_checks(&registry.ids()) {
        warn!(check = %unknown, path = %path.display(), "Threshold override names an unknown check");
    }
    registry.apply_overrides(&overrides);
    debug!(path = %path.display(), "Applied threshold overrides");
    Ok(registry)
}

pub fn knowledge(settings: &Settings) -> Result<KnowledgeBase> {
    let path = &settings.knowledge_file.value;
    KnowledgeBase::open(path).with_context(|| format!("opening knowledge base {}", path.display()))
}

pub fn session_config(settings: &Settings, host: &str) -> Result<SessionConfig> {
    let port = u16::try_from(settings.ssh_port.value).context("ssh port out of range")?;
    let target = SessionTarget::new(host, settings.user.value.clone())
        .with_port(port)
        .with_identity(settings.ssh_key.value.clone())
        .with_connect_timeout(settings.connect_timeout());

    let fallback = match (
        &settings.fallback_server.value,
        &settings.fallback_token.value,
    ) {
        (Some(server), Some(token)) => Some(FallbackCredential {
            server: server.clone(),
            token: token.clone(),
        }),
        (None, None) => None,
        _ => {
            warn!("Only one of HEALTHCREW_FALLBACK_SERVER/HEALTHCREW_FALLBACK_TOKEN set; re-login disabled");
            None
        }
    };

    Ok(SessionConfig::new(target)
        .with_kubeconfig(settings.remote_kubeconfig.value.clone())
        .with_fallback(fallback)
        .with_command_timeout(settings.command_timeout()))
}

/// Knowledge, rule and known-bug sources always; the analysis endpoint when
/// configured.
pub fn correlator(settings: &Settings, knowledge: &Arc<KnowledgeBase>) -> Result<RcaCorrelator> {
    let mut rca = RcaCorrelator::new(settings.lookup_timeout())
        .with_source(Arc::new(KnowledgeLookup::new(Arc::clone(knowledge))))
        .with_source(Arc::new(RuleBasedSource))
        .with_source(Arc::new(KnownBugSource));

    if let Some(url) = &settings.analysis_url.value {
        let source = HttpAnalysisSource::new(
            url.clone(),
            settings.analysis_model.value.clone(),
            settings.analysis_api_key.value.clone(),
            settings.lookup_timeout(),
        )?;
        rca = rca.with_source(Arc::new(source));
    }
    Ok(rca)
}
