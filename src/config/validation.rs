//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check uniqueness (service names, strategy names per namespace)
//! - Validate value ranges (periods > 0, ratios ≤ 100)
//! - Check each detector and activator the way their constructors will
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ControllerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::activator::ActivatorPolicy;
use crate::anomaly;
use crate::config::schema::{ActivatorConfig, ControllerConfig, ServiceConfig};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("duplicate service name '{0}'")]
    DuplicateService(String),

    #[error("service '{0}' has an empty namespace")]
    EmptyNamespace(String),

    #[error("service '{0}' has an empty selector")]
    EmptySelector(String),

    #[error("strategy '{strategy}' is defined twice in namespace '{namespace}'")]
    DuplicateStrategy { namespace: String, strategy: String },

    #[error("strategy '{strategy}' of service '{service}': {reason}")]
    Strategy {
        service: String,
        strategy: String,
        reason: String,
    },

    #[error("activator '{activator}' of service '{service}': {reason}")]
    Activator {
        service: String,
        activator: String,
        reason: String,
    },

    #[error("garbage collector of service '{service}': {reason}")]
    Gc { service: String, reason: String },

    #[error("invalid URL '{url}' for {field}")]
    InvalidUrl { field: &'static str, url: String },
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &ControllerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let api_url = &config.cluster.api_url;
    if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
        errors.push(ValidationError::InvalidUrl {
            field: "cluster.api_url",
            url: api_url.clone(),
        });
    }

    let mut services = HashSet::new();
    let mut strategies: HashMap<&str, HashSet<&str>> = HashMap::new();

    for service in &config.services {
        if !services.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.namespace.is_empty() {
            errors.push(ValidationError::EmptyNamespace(service.name.clone()));
        }
        if service.selector.is_empty() {
            errors.push(ValidationError::EmptySelector(service.name.clone()));
        }

        let names = strategies.entry(service.namespace.as_str()).or_default();
        for strategy in &service.strategies {
            if !names.insert(strategy.name.as_str()) {
                errors.push(ValidationError::DuplicateStrategy {
                    namespace: service.namespace.clone(),
                    strategy: strategy.name.clone(),
                });
            }
        }

        validate_service(service, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    for strategy in &service.strategies {
        let mut reject = |reason: String| {
            errors.push(ValidationError::Strategy {
                service: service.name.clone(),
                strategy: strategy.name.clone(),
                reason,
            })
        };

        if strategy.name.is_empty() {
            reject("name must not be empty".to_string());
        }
        if strategy.evaluation_period_secs == 0 {
            reject("evaluation period must be positive".to_string());
        }
        if strategy.min_available_ratio > 100 {
            reject(format!(
                "min_available_ratio {} exceeds 100",
                strategy.min_available_ratio
            ));
        }
        if let Err(e) = anomaly::validate(&strategy.detector) {
            reject(e.to_string());
        }

        if let Some(activator) = &strategy.activator {
            validate_activator(service, &strategy.name, activator, errors);
        }
    }

    validate_activator(service, "default", &service.default_activator, errors);

    if service.gc.period_secs == 0 {
        errors.push(ValidationError::Gc {
            service: service.name.clone(),
            reason: "period must be positive".to_string(),
        });
    }
    if service.gc.miss_count_before_gc < 1 {
        errors.push(ValidationError::Gc {
            service: service.name.clone(),
            reason: "miss_count_before_gc must be at least 1".to_string(),
        });
    }
}

fn validate_activator(
    service: &ServiceConfig,
    name: &str,
    config: &ActivatorConfig,
    errors: &mut Vec<ValidationError>,
) {
    if let Err(e) = ActivatorPolicy::from_config(config) {
        errors.push(ValidationError::Activator {
            service: service.name.clone(),
            activator: name.to_string(),
            reason: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        ActivatorMode, BreakerStrategyConfig, CustomServiceConfig, DetectorConfig, GcConfig,
    };
    use std::collections::BTreeMap;

    fn strategy(name: &str) -> BreakerStrategyConfig {
        BreakerStrategyConfig {
            name: name.to_string(),
            evaluation_period_secs: 10,
            min_available_count: 1,
            min_available_ratio: 50,
            detector: DetectorConfig::CustomService(CustomServiceConfig {
                url: "http://verdict.local/pods".to_string(),
                timeout_secs: 2,
            }),
            activator: None,
        }
    }

    fn service(name: &str, namespace: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            namespace: namespace.to_string(),
            selector: BTreeMap::from([("app".to_string(), name.to_string())]),
            strategies: vec![strategy("errors")],
            default_activator: ActivatorConfig::default(),
            gc: GcConfig::default(),
        }
    }

    fn config(services: Vec<ServiceConfig>) -> ControllerConfig {
        ControllerConfig {
            services,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let cfg = config(vec![service("checkout", "shop"), service("search", "catalog")]);
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_strategy_names_unique_per_namespace() {
        let cfg = config(vec![service("checkout", "shop"), service("cart", "shop")]);
        let errors = validate_config(&cfg).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateStrategy {
                namespace: "shop".to_string(),
                strategy: "errors".to_string(),
            }]
        );
    }

    #[test]
    fn test_collects_all_errors() {
        let mut bad = service("checkout", "shop");
        bad.selector.clear();
        bad.strategies[0].evaluation_period_secs = 0;
        bad.strategies[0].activator = Some(ActivatorConfig {
            mode: ActivatorMode::RetryAndPause,
            max_retry_count: Some(3),
            ..Default::default()
        });
        bad.gc.miss_count_before_gc = 0;

        let errors = validate_config(&config(vec![bad.clone(), bad])).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateService("checkout".to_string())));
        assert!(errors.contains(&ValidationError::EmptySelector("checkout".to_string())));
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::Activator { activator, .. } if activator == "errors"
        )));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Gc { .. })));
    }

    #[test]
    fn test_rejects_bad_detector() {
        let mut bad = service("checkout", "shop");
        bad.strategies[0].detector = DetectorConfig::CustomService(CustomServiceConfig {
            url: "ftp://verdict.local".to_string(),
            timeout_secs: 2,
        });
        let errors = validate_config(&config(vec![bad])).unwrap_err();
        assert!(matches!(errors[0], ValidationError::Strategy { .. }));
    }
}
