//! Item resources to entity beans.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use roxmltree::Node;

use super::{optional_text, parsed_text, required_text, Item};
use crate::{
    build::{service_default_properties, DEFAULT_HTTP_METHODS},
    bundle::{
        Bundle, BundleEntity, CassandraConnection, ClusterProperty, Encass, EncassArgument,
        EncassResult, EntityType, Folder, GenericEntity, IdentityProvider, IdentityProviderType,
        JdbcConnection, ListenPort, Policy, PolicyBackedService, PolicyBackedServiceOperation,
        PrivateKey, Properties, PropertyValue, ScheduledTask, Service, StoredPassword,
        TrustedCert, DEFAULT_KEYSTORE_ID,
    },
    error::{EntityBuilderError, ReadError},
    project::clean_string_for_path,
    xml::{l7_child, read_properties, L7_NAMESPACE},
};

/// Convert one item into a bean.
pub(super) fn read_item(item: &Item, bundle: &Bundle) -> Result<BundleEntity> {
    let resource = item.resource;
    Ok(match item.entity_type {
        EntityType::Folder => BundleEntity::Folder(folder(item)),
        EntityType::Policy => BundleEntity::Policy(policy(item, bundle)?),
        EntityType::Service => BundleEntity::Service(service(item, bundle)?),
        EntityType::Encass => BundleEntity::Encass(encass(item, bundle)?),
        EntityType::PolicyBackedService => {
            BundleEntity::PolicyBackedService(policy_backed_service(item, bundle)?)
        }
        EntityType::ClusterProperty => BundleEntity::ClusterProperty(ClusterProperty {
            id: item.id.to_owned(),
            name: item.name.to_owned(),
            value: optional_text(resource, "Value").unwrap_or_default(),
        }),
        EntityType::ListenPort => BundleEntity::ListenPort(listen_port(item, bundle)?),
        EntityType::JdbcConnection => BundleEntity::JdbcConnection(jdbc_connection(item)?),
        EntityType::CassandraConnection => {
            BundleEntity::CassandraConnection(cassandra_connection(item, bundle)?)
        }
        EntityType::IdentityProvider => BundleEntity::IdentityProvider(IdentityProvider {
            id: item.id.to_owned(),
            name: item.name.to_owned(),
            provider_type: required_text(resource, "IdentityProviderType", &item.context())?
                .parse::<IdentityProviderType>()?,
            properties: properties(resource),
        }),
        EntityType::TrustedCert => BundleEntity::TrustedCert(TrustedCert {
            id: item.id.to_owned(),
            name: item.name.to_owned(),
            encoded: l7_child(resource, "CertificateData")
                .and_then(|c| optional_text(c, "Encoded"))
                .ok_or_else(|| ReadError::MissingElement {
                    element: "CertificateData/Encoded".to_owned(),
                    context: item.context(),
                })?
                .split_whitespace()
                .collect(),
            properties: properties(resource),
        }),
        EntityType::PrivateKey => BundleEntity::PrivateKey(private_key(item)),
        EntityType::StoredPassword => BundleEntity::StoredPassword(StoredPassword {
            id: item.id.to_owned(),
            name: item.name.to_owned(),
            password: optional_text(resource, "Password").unwrap_or_default(),
            properties: properties(resource),
        }),
        EntityType::ScheduledTask => BundleEntity::ScheduledTask(scheduled_task(item, bundle)?),
        EntityType::GenericEntity => BundleEntity::GenericEntity(GenericEntity {
            id: item.id.to_owned(),
            name: item.name.to_owned(),
            entity_class_name: required_text(resource, "EntityClassName", &item.context())?,
            description: optional_text(resource, "Description"),
            enabled: parsed_text(resource, "Enabled")?.unwrap_or(true),
            value_xml: optional_text(resource, "ValueXml").unwrap_or_default(),
        }),
    })
}

fn properties(resource: Node) -> Properties {
    l7_child(resource, "Properties")
        .map(read_properties)
        .unwrap_or_default()
}

fn folder(item: &Item) -> Folder {
    Folder {
        id: item.id.to_owned(),
        name: item.name.to_owned(),
        parent_folder_id: item.resource.attribute("folderId").map(str::to_owned),
    }
}

/// Folder-relative path for a policy or service file in the given folder.
fn file_path(bundle: &Bundle, folder_id: &str, name: &str, referrer: String) -> Result<String> {
    let folder = bundle
        .folder_tree
        .path_by_id(folder_id)
        .ok_or_else(|| EntityBuilderError::MissingReference {
            entity_type: EntityType::Folder,
            reference: folder_id.to_owned(),
            referrer,
        })?;
    let file = format!("{}.xml", clean_string_for_path(name));
    let path = if folder.is_empty() {
        file
    } else {
        format!("{folder}/{file}")
    };
    if bundle.policies.contains_key(&path) || bundle.services.contains_key(&path) {
        bail!("more than one policy or service is stored at `{path}`");
    }
    Ok(path)
}

/// The policy document under `<l7:Resources>`
fn policy_xml(node: Node, context: &str) -> Result<String> {
    node.descendants()
        .find(|n| {
            n.has_tag_name((L7_NAMESPACE, "Resource")) && n.attribute("type") == Some("policy")
        })
        .map(|r| r.text().unwrap_or_default().to_owned())
        .ok_or_else(|| {
            ReadError::MissingElement {
                element: "Resources/ResourceSet/Resource".to_owned(),
                context: context.to_owned(),
            }
            .into()
        })
}

fn detail<'a, 'input>(item: &Item<'a, 'input>, local_name: &str) -> Result<Node<'a, 'input>> {
    l7_child(item.resource, local_name).ok_or_else(|| {
        ReadError::MissingElement {
            element: local_name.to_owned(),
            context: item.context(),
        }
        .into()
    })
}

fn folder_id<'a>(node: Node<'a, '_>, context: &str) -> Result<&'a str> {
    node.attribute("folderId").ok_or_else(|| {
        ReadError::MissingElement {
            element: "@folderId".to_owned(),
            context: context.to_owned(),
        }
        .into()
    })
}

fn policy(item: &Item, bundle: &Bundle) -> Result<Policy> {
    let context = item.context();
    let detail = detail(item, "PolicyDetail")?;
    let folder_id = folder_id(detail, &context)?;
    let policy_type = required_text(detail, "PolicyType", &context)?;
    if !["Include", "Global", "Internal"].contains(&policy_type.as_str()) {
        return Err(ReadError::InvalidValue {
            element: "PolicyType".to_owned(),
            value: policy_type,
        }
        .into());
    }
    let mut properties = properties(detail);
    let string_property = |p: Option<PropertyValue>| p.map(|v| v.to_string());

    Ok(Policy {
        id: item.id.to_owned(),
        guid: item
            .resource
            .attribute("guid")
            .or_else(|| detail.attribute("guid"))
            .unwrap_or_default()
            .to_owned(),
        name: item.name.to_owned(),
        path: file_path(bundle, folder_id, &item.name, context.to_owned())?,
        folder_id: folder_id.to_owned(),
        policy_xml: policy_xml(item.resource, &context)?,
        tag: string_property(properties.remove("tag")),
        subtag: string_property(properties.remove("subtag")),
        dependencies: Default::default(),
    })
}

fn service(item: &Item, bundle: &Bundle) -> Result<Service> {
    let context = item.context();
    let detail = detail(item, "ServiceDetail")?;
    let folder_id = folder_id(detail, &context)?;
    let mapping = l7_child(detail, "ServiceMappings").and_then(|m| l7_child(m, "HttpMapping"));

    let mut http_methods: BTreeSet<String> = mapping
        .and_then(|m| l7_child(m, "Verbs"))
        .map(|v| {
            v.children()
                .filter(|c| c.has_tag_name((L7_NAMESPACE, "Verb")))
                .filter_map(|c| c.text())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    if http_methods.iter().map(String::as_str).eq(DEFAULT_HTTP_METHODS) {
        http_methods.clear();
    }

    let defaults = service_default_properties();
    let mut properties = properties(detail);
    properties.remove("policyRevision");
    properties.retain(|k, v| defaults.get(k) != Some(&*v));

    Ok(Service {
        id: item.id.to_owned(),
        name: item.name.to_owned(),
        path: file_path(bundle, folder_id, &item.name, context.to_owned())?,
        folder_id: folder_id.to_owned(),
        policy_xml: policy_xml(item.resource, &context)?,
        url: mapping
            .and_then(|m| optional_text(m, "UrlPattern"))
            .unwrap_or_default(),
        http_methods,
        enabled: parsed_text(detail, "Enabled")?.unwrap_or(true),
        properties,
    })
}

/// Path of the policy with the given id
fn policy_path(bundle: &Bundle, id: &str, referrer: String) -> Result<String> {
    bundle
        .policy_by_id(id)
        .map(|p| p.path.to_owned())
        .ok_or_else(|| {
            EntityBuilderError::MissingReference {
                entity_type: EntityType::Policy,
                reference: id.to_owned(),
                referrer,
            }
            .into()
        })
}

fn policy_reference(item: &Item, bundle: &Bundle) -> Result<String> {
    let id = l7_child(item.resource, "PolicyReference")
        .and_then(|r| r.attribute("id"))
        .ok_or_else(|| ReadError::MissingElement {
            element: "PolicyReference".to_owned(),
            context: item.context(),
        })?;
    policy_path(bundle, id, item.context())
}

fn elements<'a, 'input>(
    node: Node<'a, 'input>,
    container: &str,
    local_name: &'static str,
) -> Vec<Node<'a, 'input>> {
    l7_child(node, container)
        .map(|c| {
            c.children()
                .filter(|n| n.has_tag_name((L7_NAMESPACE, local_name)))
                .collect()
        })
        .unwrap_or_default()
}

fn encass(item: &Item, bundle: &Bundle) -> Result<Encass> {
    let context = item.context();
    let resource = item.resource;

    let mut arguments = vec![];
    for argument in elements(resource, "EncapsulatedArguments", "EncapsulatedAssertionArgument")
    {
        let ordinal: u32 = parsed_text(argument, "Ordinal")?.unwrap_or(u32::MAX);
        arguments.push((
            ordinal,
            EncassArgument {
                name: required_text(argument, "ArgumentName", &context)?,
                argument_type: required_text(argument, "ArgumentType", &context)?,
                gui_label: optional_text(argument, "GuiLabel"),
                gui_prompt: parsed_text(argument, "GuiPrompt")?.unwrap_or(false),
            },
        ));
    }
    arguments.sort_by_key(|(ordinal, _)| *ordinal);

    let results = elements(resource, "EncapsulatedResults", "EncapsulatedAssertionResult")
        .into_iter()
        .map(|r| {
            Ok(EncassResult {
                name: required_text(r, "ResultName", &context)?,
                result_type: required_text(r, "ResultType", &context)?,
            })
        })
        .collect::<Result<_>>()?;

    Ok(Encass {
        id: item.id.to_owned(),
        name: item.name.to_owned(),
        guid: required_text(resource, "Guid", &context)?,
        policy: policy_reference(item, bundle)?,
        arguments: arguments.into_iter().map(|(_, a)| a).collect(),
        results,
        properties: properties(resource),
    })
}

fn policy_backed_service(item: &Item, bundle: &Bundle) -> Result<PolicyBackedService> {
    let context = item.context();
    let operations = elements(
        item.resource,
        "PolicyBackedServiceOperations",
        "PolicyBackedServiceOperation",
    )
    .into_iter()
    .map(|o| {
        let operation_name = required_text(o, "OperationName", &context)?;
        let policy_id = required_text(o, "PolicyId", &context)?;
        Ok(PolicyBackedServiceOperation {
            policy: policy_path(
                bundle,
                &policy_id,
                format!("operation `{operation_name}` of {context}"),
            )?,
            operation_name,
        })
    })
    .collect::<Result<_>>()?;

    Ok(PolicyBackedService {
        id: item.id.to_owned(),
        name: item.name.to_owned(),
        interface_name: required_text(item.resource, "InterfaceName", &context)?,
        operations,
    })
}

fn listen_port(item: &Item, bundle: &Bundle) -> Result<ListenPort> {
    let context = item.context();
    let resource = item.resource;
    let target_service = match l7_child(resource, "TargetServiceReference")
        .and_then(|t| t.attribute("id"))
    {
        Some(id) => Some(
            bundle
                .service_by_id(id)
                .map(|s| s.path.to_owned())
                .ok_or_else(|| EntityBuilderError::MissingReference {
                    entity_type: EntityType::Service,
                    reference: id.to_owned(),
                    referrer: context.to_owned(),
                })?,
        ),
        None => None,
    };

    Ok(ListenPort {
        id: item.id.to_owned(),
        name: item.name.to_owned(),
        port: parsed_text(resource, "Port")?.ok_or_else(|| ReadError::MissingElement {
            element: "Port".to_owned(),
            context: context.to_owned(),
        })?,
        protocol: required_text(resource, "Protocol", &context)?,
        enabled: parsed_text(resource, "Enabled")?.unwrap_or(true),
        enabled_features: elements(resource, "EnabledFeatures", "StringValue")
            .into_iter()
            .filter_map(|f| f.text())
            .map(str::to_owned)
            .collect(),
        target_service,
        properties: properties(resource),
    })
}

fn pool_size(properties: &mut Properties, key: &str, default: u32) -> Result<u32> {
    match properties.remove(key) {
        None => Ok(default),
        Some(PropertyValue::Integer(i)) => u32::try_from(i).map_err(|_| {
            ReadError::InvalidValue {
                element: key.to_owned(),
                value: i.to_string(),
            }
            .into()
        }),
        Some(other) => Err(ReadError::InvalidValue {
            element: key.to_owned(),
            value: other.to_string(),
        }
        .into()),
    }
}

fn jdbc_connection(item: &Item) -> Result<JdbcConnection> {
    let context = item.context();
    let resource = item.resource;
    let extension = detail(item, "Extension")?;

    let mut properties = properties(resource);
    let maximum_pool_size = pool_size(&mut properties, "maximumPoolSize", 15)?;
    let minimum_pool_size = pool_size(&mut properties, "minimumPoolSize", 3)?;

    let mut connection_properties: BTreeMap<String, String> =
        l7_child(extension, "ConnectionProperties")
            .map(read_properties)
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();

    Ok(JdbcConnection {
        id: item.id.to_owned(),
        name: item.name.to_owned(),
        driver_class: required_text(extension, "DriverClass", &context)?,
        jdbc_url: required_text(extension, "JdbcUrl", &context)?,
        user: connection_properties.remove("user"),
        password: connection_properties.remove("password"),
        minimum_pool_size,
        maximum_pool_size,
        enabled: parsed_text(resource, "Enabled")?.unwrap_or(true),
        properties,
        connection_properties,
    })
}

fn cassandra_connection(item: &Item, bundle: &Bundle) -> Result<CassandraConnection> {
    let context = item.context();
    let resource = item.resource;
    let stored_password = match optional_text(resource, "PasswordId") {
        Some(id) => Some(
            bundle
                .stored_passwords
                .values()
                .find(|p| p.id == id)
                .map(|p| p.name.to_owned())
                .ok_or_else(|| EntityBuilderError::MissingReference {
                    entity_type: EntityType::StoredPassword,
                    reference: id.to_owned(),
                    referrer: context.to_owned(),
                })?,
        ),
        None => None,
    };

    Ok(CassandraConnection {
        id: item.id.to_owned(),
        name: item.name.to_owned(),
        keyspace: required_text(resource, "Keyspace", &context)?,
        contact_points: required_text(resource, "ContactPoint", &context)?,
        port: parsed_text(resource, "Port")?.unwrap_or(9042),
        username: optional_text(resource, "Username"),
        stored_password,
        compression: optional_text(resource, "Compression").unwrap_or_else(|| "NONE".to_owned()),
        ssl: parsed_text(resource, "Ssl")?.unwrap_or(false),
        enabled: parsed_text(resource, "Enabled")?.unwrap_or(true),
        properties: properties(resource),
    })
}

fn private_key(item: &Item) -> PrivateKey {
    let resource = item.resource;
    let (keystore, alias) = match item.id.split_once(':') {
        Some((keystore, alias)) => (keystore.to_owned(), alias.to_owned()),
        None => (DEFAULT_KEYSTORE_ID.to_owned(), item.name.to_owned()),
    };
    let mut properties = properties(resource);
    PrivateKey {
        id: item.id.to_owned(),
        alias: resource.attribute("alias").map(str::to_owned).unwrap_or(alias),
        keystore: resource
            .attribute("keystoreId")
            .map(str::to_owned)
            .unwrap_or(keystore),
        algorithm: properties
            .remove("keyAlgorithm")
            .map(|a| a.to_string())
            .unwrap_or_else(|| "RSA".to_owned()),
    }
}

fn scheduled_task(item: &Item, bundle: &Bundle) -> Result<ScheduledTask> {
    let resource = item.resource;
    Ok(ScheduledTask {
        id: item.id.to_owned(),
        name: item.name.to_owned(),
        policy: policy_reference(item, bundle)?,
        job_type: optional_text(resource, "JobType").unwrap_or_else(|| "Recurring".to_owned()),
        cron_expression: optional_text(resource, "CronExpression"),
        execution_date: optional_text(resource, "ExecutionDate"),
        one_node: parsed_text(resource, "OneNode")?.unwrap_or(false),
        execute_on_create: parsed_text(resource, "ExecuteOnCreate")?.unwrap_or(false),
        properties: properties(resource),
    })
}
