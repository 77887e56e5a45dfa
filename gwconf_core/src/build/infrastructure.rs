//! Builders for folders and the infrastructure entities that policies use.

use anyhow::{anyhow, Result};

use super::{named, Entity, EntityBuilder, IdGenerator, FAIL_ON_NEW, MAP_BY, MAP_TO};
use crate::{
    bundle::{
        Bundle, CassandraConnection, EntityType, GatewayEntity, JdbcConnection, ListenPort,
        PropertyValue, ROOT_FOLDER_ID,
    },
    error::EntityBuilderError,
    xml::{properties_element, property_element, Element},
};

/// Builds one entity per bean with a fixed conversion.
fn build_each<'b, E, I, F>(entities: I, element: F) -> Result<Vec<Entity>>
where
    E: GatewayEntity + 'b,
    I: IntoIterator<Item = &'b E>,
    F: Fn(&E) -> Result<Element>,
{
    entities
        .into_iter()
        .map(|e| Ok(Entity::new(E::ENTITY_TYPE, e.name(), e.id(), element(e)?)))
        .collect()
}

/// Folders, parents before children. The root folder always exists on the
/// gateway, so it is only mapped.
#[derive(Clone, Copy, Debug, Default)]
pub struct FolderEntityBuilder;

impl EntityBuilder for FolderEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::Folder
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        Ok(bundle
            .folder_tree
            .top_down()
            .into_iter()
            .map(|f| match &f.parent_folder_id {
                None => Entity::mapping_only(EntityType::Folder, &f.name, ROOT_FOLDER_ID)
                    .with_mapping_property(FAIL_ON_NEW, true),
                Some(parent) => Entity::new(
                    EntityType::Folder,
                    &f.name,
                    &f.id,
                    Element::l7("Folder")
                        .with_attr("folderId", parent)
                        .with_attr("id", &f.id)
                        .with_child(Element::l7_text("Name", &f.name)),
                ),
            })
            .collect())
    }
}

/// Cluster properties, as plain name/value items.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterPropertyEntityBuilder;

impl EntityBuilder for ClusterPropertyEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::ClusterProperty
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        build_each(bundle.cluster_properties.values(), |p| {
            Ok(named("ClusterProperty", &p.id, &p.name)
                .with_child(Element::l7_text("Value", &p.value)))
        })
    }
}

/// Environment properties are expected to already exist on the target
/// gateway. Each one becomes a mapping onto the cluster property of the same
/// name, and the deployment fails if it is missing.
pub struct EnvironmentPropertyEntityBuilder<'a> {
    ids: &'a dyn IdGenerator,
}

impl<'a> EnvironmentPropertyEntityBuilder<'a> {
    /// Mapping ids come from `ids`
    pub fn new(ids: &'a dyn IdGenerator) -> Self {
        Self { ids }
    }
}

impl EntityBuilder for EnvironmentPropertyEntityBuilder<'_> {
    fn entity_type(&self) -> EntityType {
        EntityType::ClusterProperty
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        Ok(bundle
            .environment_properties
            .keys()
            .map(|name| {
                Entity::mapping_only(EntityType::ClusterProperty, name, self.ids.generate_id())
                    .with_mapping_property(MAP_BY, "name")
                    .with_mapping_property(MAP_TO, name.as_str())
                    .with_mapping_property(FAIL_ON_NEW, true)
            })
            .collect())
    }
}

/// Listen ports. The target service is resolved to its id.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListenPortEntityBuilder;

impl ListenPortEntityBuilder {
    fn element(bundle: &Bundle, port: &ListenPort) -> Result<Element> {
        let target = match &port.target_service {
            Some(path) => {
                let service = bundle.services.get(path).ok_or_else(|| {
                    anyhow!(EntityBuilderError::MissingReference {
                        entity_type: EntityType::Service,
                        reference: path.to_owned(),
                        referrer: format!("listen port `{}`", port.name),
                    })
                })?;
                Some(Element::l7("TargetServiceReference").with_attr("id", &service.id))
            }
            None => None,
        };

        let mut features = Element::l7("EnabledFeatures");
        for feature in &port.enabled_features {
            features.push(Element::l7_text("StringValue", feature));
        }

        Ok(named("ListenPort", &port.id, &port.name)
            .with_child(Element::l7_text("Enabled", port.enabled.to_string()))
            .with_child(Element::l7_text("Protocol", &port.protocol))
            .with_child(Element::l7_text("Port", port.port.to_string()))
            .with_child(features)
            .with_optional_child(target)
            .with_optional_child(properties_element(&port.properties)))
    }
}

impl EntityBuilder for ListenPortEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::ListenPort
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        build_each(bundle.listen_ports.values(), |p| Self::element(bundle, p))
    }
}

/// JDBC connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct JdbcConnectionEntityBuilder;

impl JdbcConnectionEntityBuilder {
    fn element(connection: &JdbcConnection) -> Element {
        let mut properties = connection.properties.clone();
        properties.insert(
            "maximumPoolSize".to_owned(),
            PropertyValue::Integer(connection.maximum_pool_size.into()),
        );
        properties.insert(
            "minimumPoolSize".to_owned(),
            PropertyValue::Integer(connection.minimum_pool_size.into()),
        );

        let mut connection_properties = Element::l7("ConnectionProperties");
        let credentials = [
            ("user", connection.user.as_deref()),
            ("password", connection.password.as_deref()),
        ];
        for (key, value) in credentials {
            if let Some(value) = value {
                connection_properties.push(property_element(key, &value.into()));
            }
        }
        for (key, value) in &connection.connection_properties {
            connection_properties.push(property_element(key, &value.as_str().into()));
        }

        named("JDBCConnection", &connection.id, &connection.name)
            .with_child(Element::l7_text("Enabled", connection.enabled.to_string()))
            .with_optional_child(properties_element(&properties))
            .with_child(
                Element::l7("Extension")
                    .with_child(Element::l7_text("DriverClass", &connection.driver_class))
                    .with_child(Element::l7_text("JdbcUrl", &connection.jdbc_url))
                    .with_child(connection_properties),
            )
    }
}

impl EntityBuilder for JdbcConnectionEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::JdbcConnection
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        build_each(bundle.jdbc_connections.values(), |c| Ok(Self::element(c)))
    }
}

/// Cassandra connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct CassandraConnectionEntityBuilder;

impl CassandraConnectionEntityBuilder {
    fn element(bundle: &Bundle, connection: &CassandraConnection) -> Result<Element> {
        let password_id = match &connection.stored_password {
            Some(name) => {
                let password = bundle.stored_passwords.get(name).ok_or_else(|| {
                    anyhow!(EntityBuilderError::MissingReference {
                        entity_type: EntityType::StoredPassword,
                        reference: name.to_owned(),
                        referrer: format!("Cassandra connection `{}`", connection.name),
                    })
                })?;
                Some(Element::l7_text("PasswordId", &password.id))
            }
            None => None,
        };

        Ok(named("CassandraConnection", &connection.id, &connection.name)
            .with_child(Element::l7_text("Keyspace", &connection.keyspace))
            .with_child(Element::l7_text("ContactPoint", &connection.contact_points))
            .with_child(Element::l7_text("Port", connection.port.to_string()))
            .with_optional_child(
                connection
                    .username
                    .as_ref()
                    .map(|u| Element::l7_text("Username", u)),
            )
            .with_optional_child(password_id)
            .with_child(Element::l7_text("Compression", &connection.compression))
            .with_child(Element::l7_text("Ssl", connection.ssl.to_string()))
            .with_child(Element::l7_text("Enabled", connection.enabled.to_string()))
            .with_optional_child(properties_element(&connection.properties)))
    }
}

impl EntityBuilder for CassandraConnectionEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::CassandraConnection
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        build_each(bundle.cassandra_connections.values(), |c| {
            Self::element(bundle, c)
        })
    }
}

/// Identity providers.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityProviderEntityBuilder;

impl EntityBuilder for IdentityProviderEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::IdentityProvider
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        build_each(bundle.identity_providers.values(), |p| {
            Ok(named("IdentityProvider", &p.id, &p.name)
                .with_child(Element::l7_text(
                    "IdentityProviderType",
                    p.provider_type.gateway_type(),
                ))
                .with_optional_child(properties_element(&p.properties)))
        })
    }
}

/// Trusted certificates, with the DER inlined.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrustedCertEntityBuilder;

impl EntityBuilder for TrustedCertEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::TrustedCert
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        build_each(bundle.trusted_certs.values(), |c| {
            Ok(named("TrustedCertificate", &c.id, &c.name)
                .with_child(
                    Element::l7("CertificateData")
                        .with_child(Element::l7_text("Encoded", &c.encoded)),
                )
                .with_optional_child(properties_element(&c.properties)))
        })
    }
}

/// Private keys never travel in a bundle. They are mapped by
/// `keystore:alias` and must already exist.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrivateKeyEntityBuilder;

impl EntityBuilder for PrivateKeyEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::PrivateKey
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        Ok(bundle
            .private_keys
            .values()
            .map(|k| {
                Entity::mapping_only(
                    EntityType::PrivateKey,
                    &k.alias,
                    format!("{}:{}", k.keystore, k.alias),
                )
                .with_mapping_property(FAIL_ON_NEW, true)
            })
            .collect())
    }
}

/// Stored passwords, secret included.
#[derive(Clone, Copy, Debug, Default)]
pub struct StoredPasswordEntityBuilder;

impl EntityBuilder for StoredPasswordEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::StoredPassword
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        build_each(bundle.stored_passwords.values(), |p| {
            Ok(named("StoredPassword", &p.id, &p.name)
                .with_child(Element::l7_text("Password", &p.password))
                .with_optional_child(properties_element(&p.properties)))
        })
    }
}

/// Generic entities, with their value XML passed through.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericEntityBuilder;

impl EntityBuilder for GenericEntityBuilder {
    fn entity_type(&self) -> EntityType {
        EntityType::GenericEntity
    }

    fn build(&self, bundle: &Bundle) -> Result<Vec<Entity>> {
        build_each(bundle.generic_entities.values(), |g| {
            Ok(named("GenericEntity", &g.id, &g.name)
                .with_optional_child(
                    g.description
                        .as_ref()
                        .map(|d| Element::l7_text("Description", d)),
                )
                .with_child(Element::l7_text("EntityClassName", &g.entity_class_name))
                .with_child(Element::l7_text("Enabled", g.enabled.to_string()))
                .with_child(Element::l7_text("ValueXml", &g.value_xml)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build::{tests::root, SequentialIdGenerator},
        bundle::{BundleEntity, Folder, PrivateKey, Service, StoredPassword},
    };

    #[test]
    fn folders_are_built_parents_first() -> Result<()> {
        let mut bundle = Bundle::default();
        bundle.add(BundleEntity::Folder(root()));
        bundle.add(BundleEntity::Folder(Folder {
            id: "b".to_owned(),
            name: "inner".to_owned(),
            parent_folder_id: Some("a".to_owned()),
        }));
        bundle.add(BundleEntity::Folder(Folder {
            id: "a".to_owned(),
            name: "outer".to_owned(),
            parent_folder_id: Some(ROOT_FOLDER_ID.to_owned()),
        }));
        bundle.rebuild_folder_tree()?;

        let entities = FolderEntityBuilder.build(&bundle)?;
        let ids: Vec<_> = entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![ROOT_FOLDER_ID, "a", "b"]);
        assert!(entities[0].is_mapping_only());
        assert_eq!(
            entities[0].mapping_properties,
            vec![(FAIL_ON_NEW.to_owned(), PropertyValue::Boolean(true))]
        );
        assert_eq!(entities[2].xml.as_ref().unwrap().attr("folderId"), Some("a"));
        Ok(())
    }

    #[test]
    fn environment_properties_map_onto_existing_ones() -> Result<()> {
        let mut bundle = Bundle::default();
        bundle
            .environment_properties
            .insert("gateway.db.url".to_owned(), "jdbc:postgresql://db".to_owned());
        let ids = SequentialIdGenerator::default();

        let entities = EnvironmentPropertyEntityBuilder::new(&ids).build(&bundle)?;
        assert_eq!(entities.len(), 1);
        assert!(entities[0].is_mapping_only());
        assert_eq!(
            entities[0].mapping_properties,
            vec![
                (MAP_BY.to_owned(), "name".into()),
                (MAP_TO.to_owned(), "gateway.db.url".into()),
                (FAIL_ON_NEW.to_owned(), true.into()),
            ]
        );
        Ok(())
    }

    #[test]
    fn listen_port_target_must_exist() -> Result<()> {
        let mut bundle = Bundle::default();
        bundle.add(BundleEntity::ListenPort(ListenPort {
            id: "lp".to_owned(),
            name: "orders-port".to_owned(),
            port: 9080,
            protocol: "http".to_owned(),
            target_service: Some("orders.xml".to_owned()),
            ..Default::default()
        }));
        let err = ListenPortEntityBuilder.build(&bundle).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EntityBuilderError>(),
            Some(EntityBuilderError::MissingReference {
                entity_type: EntityType::Service,
                ..
            })
        ));

        bundle.add(BundleEntity::Service(Service {
            id: "svc".to_owned(),
            path: "orders.xml".to_owned(),
            ..Default::default()
        }));
        let entities = ListenPortEntityBuilder.build(&bundle)?;
        let target = entities[0]
            .xml
            .as_ref()
            .and_then(|x| x.child("l7:TargetServiceReference"))
            .unwrap();
        assert_eq!(target.attr("id"), Some("svc"));
        Ok(())
    }

    #[test]
    fn cassandra_refers_to_its_password_by_id() -> Result<()> {
        let mut bundle = Bundle::default();
        bundle.add(BundleEntity::StoredPassword(StoredPassword {
            id: "pw".to_owned(),
            name: "cassandra".to_owned(),
            password: "secret".to_owned(),
            ..Default::default()
        }));
        bundle.add(BundleEntity::CassandraConnection(CassandraConnection {
            id: "cc".to_owned(),
            name: "events".to_owned(),
            keyspace: "events".to_owned(),
            contact_points: "cassandra.local".to_owned(),
            port: 9042,
            stored_password: Some("cassandra".to_owned()),
            compression: "LZ4".to_owned(),
            enabled: true,
            ..Default::default()
        }));
        let entities = CassandraConnectionEntityBuilder.build(&bundle)?;
        let xml = entities[0].xml.as_ref().unwrap();
        assert_eq!(xml.child("l7:PasswordId").unwrap().text(), "pw");
        assert_eq!(xml.child("l7:Compression").unwrap().text(), "LZ4");
        Ok(())
    }

    #[test]
    fn jdbc_pool_sizes_become_properties() -> Result<()> {
        let mut bundle = Bundle::default();
        bundle.add(BundleEntity::JdbcConnection(JdbcConnection {
            id: "j".to_owned(),
            name: "orders-db".to_owned(),
            driver_class: "org.postgresql.Driver".to_owned(),
            jdbc_url: "jdbc:postgresql://db/orders".to_owned(),
            user: Some("orders".to_owned()),
            password: Some("${secpass.orders.plaintext}".to_owned()),
            minimum_pool_size: 3,
            maximum_pool_size: 15,
            enabled: true,
            ..Default::default()
        }));
        let entities = JdbcConnectionEntityBuilder.build(&bundle)?;
        let xml = entities[0].xml.as_ref().unwrap();
        let pool: Vec<_> = xml
            .child("l7:Properties")
            .unwrap()
            .elements()
            .filter_map(|p| p.attr("key"))
            .collect();
        assert_eq!(pool, vec!["maximumPoolSize", "minimumPoolSize"]);
        let connection_properties = xml
            .child("l7:Extension")
            .and_then(|e| e.child("l7:ConnectionProperties"))
            .unwrap();
        assert_eq!(connection_properties.elements().count(), 2);
        Ok(())
    }

    #[test]
    fn private_keys_are_mapped_by_keystore_and_alias() -> Result<()> {
        let mut bundle = Bundle::default();
        bundle.add(BundleEntity::PrivateKey(PrivateKey::new("ssl")));
        let entities = PrivateKeyEntityBuilder.build(&bundle)?;
        assert_eq!(entities[0].id, "00000000000000000000000000000002:ssl");
        assert!(entities[0].is_mapping_only());
        Ok(())
    }
}
