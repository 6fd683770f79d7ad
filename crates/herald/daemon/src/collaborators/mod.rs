//! HTTP adapters for the platform gateway and the persona service.

mod http;

pub use http::{HttpPersona, HttpPlatform};

use crate::config::CollaboratorConfig;
use crate::error::DaemonResult;
use herald_runtime::Collaborators;
use std::sync::Arc;
use tracing::warn;

/// Build whatever collaborators the configuration provides endpoints for.
pub fn from_config(config: &CollaboratorConfig) -> DaemonResult<Collaborators> {
    let mut collaborators = Collaborators::default();

    match config.platform_url.as_deref() {
        Some(url) => {
            collaborators.platform = Some(Arc::new(HttpPlatform::new(url, config)?));
        }
        None => warn!("No platform_url configured; ingestion and publishing stay disabled"),
    }

    match config.persona_url.as_deref() {
        Some(url) => {
            let persona = Arc::new(HttpPersona::new(url, config)?);
            collaborators.generator = Some(persona.clone());
            collaborators.scorer = Some(persona.clone());
            collaborators.extractor = Some(persona.clone());
            collaborators.analyzer = Some(persona);
        }
        None => warn!("No persona_url configured; generation, learning and self-style stay disabled"),
    }

    Ok(collaborators)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_endpoints_leave_collaborators_empty() {
        let collaborators = from_config(&CollaboratorConfig::default()).unwrap();
        assert!(collaborators.platform.is_none());
        assert!(collaborators.generator.is_none());
        assert!(collaborators.analyzer.is_none());
    }

    #[test]
    fn test_persona_url_provides_all_persona_roles() {
        let config = CollaboratorConfig {
            persona_url: Some("http://127.0.0.1:9".to_string()),
            ..Default::default()
        };
        let collaborators = from_config(&config).unwrap();
        assert!(collaborators.platform.is_none());
        assert!(collaborators.generator.is_some());
        assert!(collaborators.scorer.is_some());
        assert!(collaborators.extractor.is_some());
        assert!(collaborators.analyzer.is_some());
    }
}
