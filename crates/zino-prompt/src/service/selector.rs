use super::BackendService;
use crate::{
    error::{Error, Result},
    function::ExecutionSettings,
};
use std::{fmt, sync::Arc};

/// The outcome of backend selection.
pub struct ServiceSelection<'a> {
    /// The selected service.
    pub service: &'a Arc<dyn BackendService>,
    /// The rule that matched, or `None` for the default service.
    pub settings: Option<&'a ExecutionSettings>,
}

impl fmt::Debug for ServiceSelection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSelection")
            .field("model_id", &self.service.model_id())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Selects the backend service for one invocation.
///
/// Rules are tried in declaration order and, for each rule, services in
/// registration order. The first service whose model id equals the rule's
/// model id or matches its pattern wins, so a later rule never beats an earlier
/// one however exact it is. Without a match the default service is used.
pub fn select_service<'a>(
    rules: &'a [ExecutionSettings],
    services: &'a [Arc<dyn BackendService>],
    default_service: Option<&'a Arc<dyn BackendService>>,
) -> Result<ServiceSelection<'a>> {
    for rule in rules {
        if let Some(service) = services.iter().find(|s| rule.matches(s.model_id())) {
            tracing::debug!(model_id = service.model_id(), "backend service selected by rule");
            return Ok(ServiceSelection {
                service,
                settings: Some(rule),
            });
        }
    }
    let service = default_service.ok_or(Error::NoBackendAvailable)?;
    if !rules.is_empty() {
        tracing::warn!(
            model_id = service.model_id(),
            "no execution settings match, falling back to the default service"
        );
    }
    Ok(ServiceSelection {
        service,
        settings: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::mock::MockService;

    fn services(model_ids: &[&str]) -> Vec<Arc<dyn BackendService>> {
        model_ids
            .iter()
            .map(|model_id| Arc::new(MockService::new(*model_id, "")) as Arc<dyn BackendService>)
            .collect()
    }

    #[test]
    fn test_earlier_pattern_rule_wins() {
        let rules = vec![
            ExecutionSettings::for_pattern("^gpt-4").unwrap(),
            ExecutionSettings::for_model("gpt-3.5-turbo"),
        ];
        let services = services(&["gpt-3.5-turbo", "gpt-4-32k"]);
        let selection = select_service(&rules, &services, services.first()).unwrap();
        assert_eq!(selection.service.model_id(), "gpt-4-32k");
        assert!(selection.settings.is_some_and(|rule| rule.model_id().is_none()));
    }

    #[test]
    fn test_exact_rule_before_later_pattern() {
        let rules = vec![
            ExecutionSettings::for_model("gpt-3.5-turbo").with_parameter("temperature", 0.1),
            ExecutionSettings::for_pattern("gpt").unwrap(),
        ];
        let services = services(&["gpt-4", "gpt-3.5-turbo"]);
        let selection = select_service(&rules, &services, None).unwrap();
        assert_eq!(selection.service.model_id(), "gpt-3.5-turbo");
        assert_eq!(
            selection.settings.map(|rule| rule.parameters()["temperature"].clone()),
            Some(serde_json::json!(0.1))
        );
    }

    #[test]
    fn test_pattern_matches_first_service_in_registration_order() {
        let rules = vec![ExecutionSettings::for_pattern("^gpt-4").unwrap()];
        let services = services(&["gpt-4-turbo", "gpt-4-32k"]);
        let selection = select_service(&rules, &services, None).unwrap();
        assert_eq!(selection.service.model_id(), "gpt-4-turbo");
    }

    #[test]
    fn test_falls_back_to_default_service() {
        let rules = vec![ExecutionSettings::for_model("claude")];
        let services = services(&["gpt-4", "llama"]);
        let selection = select_service(&rules, &services, services.get(1)).unwrap();
        assert_eq!(selection.service.model_id(), "llama");
        assert!(selection.settings.is_none());

        let selection = select_service(&[], &services, services.first()).unwrap();
        assert_eq!(selection.service.model_id(), "gpt-4");
    }

    #[test]
    fn test_no_backend_available() {
        let rules = vec![ExecutionSettings::for_model("claude")];
        let err = select_service(&rules, &services(&["gpt-4"]), None).unwrap_err();
        assert!(matches!(err, Error::NoBackendAvailable));
        let err = select_service(&[], &[], None).unwrap_err();
        assert!(matches!(err, Error::NoBackendAvailable));
    }
}
