//! Entities that run policies: services, encasses, policy-backed services
//! and scheduled tasks. Each one resolves the policy it points at by path.

use anyhow::Result;

use super::{named, policy::policy_resources, Entity, EntityBuilder};
use crate::{
    bundle::{
        Bundle, Encass, EntityType, PolicyBackedService, Properties, PropertyValue,
        ScheduledTask, Service,
    },
    xml::{properties_element, Element},
};

/// Verbs a service answers to when none are configured
pub(crate) const DEFAULT_HTTP_METHODS: [&str; 4] = ["DELETE", "GET", "POST", "PUT"];

/// Service properties the gateway sets on its own. Written unless
/// overridden, and dropped again when reading if unchanged.
pub(crate) fn service_default_properties() -> Properties {
    [
        ("internal", false),
        ("soap", false),
        ("tracingEnabled", false),
        ("wssProcessingEnabled", false),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), PropertyValue::Boolean(v)))
    .collect()
}

fn policy_id<'b>(bundle: &'b Bundle, reference: &str, referrer: String) -> Result<&'b str> {
    Ok(bundle.resolve_policy(reference, &referrer)?.id.as_str())
}

/// Builds published services.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceEntityBuilder;

impl ServiceEntityBuilder {
    fn element(service: &Service) -> Element {
        let mut properties = service_default_properties();
        properties.extend(service.properties.clone());

        let mut verbs = Element::l7("Verbs");
        if service.http_methods.is_empty() {
            for verb in DEFAULT_HTTP_METHODS {
                verbs.push(Element::l7_text("Verb", verb));
            }
        } else {
            for verb in &service.http_methods {
                verbs.push(Element::l7_text("Verb", verb.as_str()));
            }
        }

        Element::l7("Service")
            .with_attr("id", &service.id)
            .with_child(
                Element::l7("ServiceDetail")
                    .with_attr("folderId", &service.folder_id)
                    .with_attr("id", &service.id)
                    .with_child(Element::l7_text("Name", &service.name))
                    .with_child(Element::l7_text("Enabled", service.enabled.to_string()))
                    .with_child(
                        Element::l7("ServiceMappings").with_child(
                            Element::l7("HttpMapping")
                                .with_child(Element::l7_text("UrlPattern", &service.url))
                                .with_child(verbs),
                        ),
                    )
                    .with_optional_child(properties_element(&properties)),
            )
            .with_child(policy_resources(&service.policy_xml))
    }
}

impl EntityBuilder for ServiceEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::Service
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        Ok(bundle
            .services
            .values()
            .map(|s| Entity::new(EntityType::Service, &s.name, &s.id, Self::element(s)))
            .collect())
    }
}

/// Builds encapsulated assertions.
#[derive(Clone, Copy, Debug, Default)]
pub struct EncassEntityBuilder;

impl EncassEntityBuilder {
    fn element(bundle: &Bundle, encass: &Encass) -> Result<Element> {
        let policy_id = policy_id(bundle, &encass.policy, format!("encass `{}`", encass.name))?;

        let mut arguments = Element::l7("EncapsulatedArguments");
        for (ordinal, argument) in encass.arguments.iter().enumerate() {
            arguments.push(
                Element::l7("EncapsulatedAssertionArgument")
                    .with_child(Element::l7_text("Ordinal", (ordinal + 1).to_string()))
                    .with_child(Element::l7_text("ArgumentName", &argument.name))
                    .with_child(Element::l7_text("ArgumentType", &argument.argument_type))
                    .with_optional_child(
                        argument
                            .gui_label
                            .as_ref()
                            .map(|l| Element::l7_text("GuiLabel", l)),
                    )
                    .with_child(Element::l7_text("GuiPrompt", argument.gui_prompt.to_string())),
            );
        }
        let mut results = Element::l7("EncapsulatedResults");
        for result in &encass.results {
            results.push(
                Element::l7("EncapsulatedAssertionResult")
                    .with_child(Element::l7_text("ResultName", &result.name))
                    .with_child(Element::l7_text("ResultType", &result.result_type)),
            );
        }

        Ok(named("EncapsulatedAssertion", &encass.id, &encass.name)
            .with_child(Element::l7_text("Guid", &encass.guid))
            .with_child(Element::l7("PolicyReference").with_attr("id", policy_id))
            .with_child(arguments)
            .with_child(results)
            .with_optional_child(properties_element(&encass.properties)))
    }
}

impl EntityBuilder for EncassEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::Encass
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        bundle
            .encasses
            .values()
            .map(|e| {
                Ok(Entity::new(
                    EntityType::Encass,
                    &e.name,
                    &e.id,
                    Self::element(bundle, e)?,
                ))
            })
            .collect()
    }
}

/// Builds policy-backed services.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyBackedServiceEntityBuilder;

impl PolicyBackedServiceEntityBuilder {
    fn element(bundle: &Bundle, pbs: &PolicyBackedService) -> Result<Element> {
        let mut operations = Element::l7("PolicyBackedServiceOperations");
        for operation in &pbs.operations {
            let policy_id = policy_id(
                bundle,
                &operation.policy,
                format!(
                    "operation `{}` of policy-backed service `{}`",
                    operation.operation_name, pbs.name
                ),
            )?;
            operations.push(
                Element::l7("PolicyBackedServiceOperation")
                    .with_child(Element::l7_text("PolicyId", policy_id))
                    .with_child(Element::l7_text("OperationName", &operation.operation_name)),
            );
        }
        Ok(named("PolicyBackedService", &pbs.id, &pbs.name)
            .with_child(Element::l7_text("InterfaceName", &pbs.interface_name))
            .with_child(operations))
    }
}

impl EntityBuilder for PolicyBackedServiceEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::PolicyBackedService
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        bundle
            .policy_backed_services
            .values()
            .map(|p| {
                Ok(Entity::new(
                    EntityType::PolicyBackedService,
                    &p.name,
                    &p.id,
                    Self::element(bundle, p)?,
                ))
            })
            .collect()
    }
}

/// Builds scheduled tasks.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScheduledTaskEntityBuilder;

impl ScheduledTaskEntityBuilder {
    fn element(bundle: &Bundle, task: &ScheduledTask) -> Result<Element> {
        let policy_id = policy_id(
            bundle,
            &task.policy,
            format!("scheduled task `{}`", task.name),
        )?;
        Ok(named("ScheduledTask", &task.id, &task.name)
            .with_child(Element::l7("PolicyReference").with_attr("id", policy_id))
            .with_child(Element::l7_text("OneNode", task.one_node.to_string()))
            .with_child(Element::l7_text("JobType", &task.job_type))
            .with_child(Element::l7_text("JobStatus", "Scheduled"))
            .with_optional_child(
                task.cron_expression
                    .as_ref()
                    .map(|c| Element::l7_text("CronExpression", c)),
            )
            .with_optional_child(
                task.execution_date
                    .as_ref()
                    .map(|d| Element::l7_text("ExecutionDate", d)),
            )
            .with_child(Element::l7_text(
                "ExecuteOnCreate",
                task.execute_on_create.to_string(),
            ))
            .with_optional_child(properties_element(&task.properties)))
    }
}

impl EntityBuilder for ScheduledTaskEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::ScheduledTask
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        bundle
            .scheduled_tasks
            .values()
            .map(|t| {
                Ok(Entity::new(
                    EntityType::ScheduledTask,
                    &t.name,
                    &t.id,
                    Self::element(bundle, t)?,
                ))
            })
            .collect()
    }
}
