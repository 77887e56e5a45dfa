//! Entity beans.
//!
//! Most beans are also the on-disk representation of the entity: fields that
//! are derived from the file layout (ids, names used as map keys, paths) are
//! skipped by serde, everything else is written to the config files as-is.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use super::{BundleEntity, EntityType, GatewayEntity};
use crate::error::ReadError;

/// Vendor-specific extension attributes of an entity.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A single typed property value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// `<l7:BooleanValue>`
    Boolean(bool),
    /// `<l7:IntegerValue>` or `<l7:LongValue>`
    Integer(i64),
    /// `<l7:StringValue>`
    String(String),
}

impl Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(val: &str) -> Self {
        PropertyValue::String(val.to_owned())
    }
}

impl From<bool> for PropertyValue {
    fn from(val: bool) -> Self {
        PropertyValue::Boolean(val)
    }
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn bool_is_false(v: &bool) -> bool {
    !v
}

/// A folder. The parent is referenced by id; the root folder has none.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Folder {
    /// Folder id
    pub id: String,
    /// Folder name
    pub name: String,
    /// Parent folder id. `None` only for the root folder.
    pub parent_folder_id: Option<String>,
}

/// A standalone policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Policy {
    /// Policy id
    pub id: String,
    /// Policy GUID, referenced by include assertions
    pub guid: String,
    /// Policy name
    pub name: String,
    /// Folder-relative file path, including the `.xml` extension
    pub path: String,
    /// Id of the owning folder
    pub folder_id: String,
    /// Raw policy XML
    pub policy_xml: String,
    /// Tag for global and internal policies
    pub tag: Option<String>,
    /// Subtag, for tags that need one
    pub subtag: Option<String>,
    /// Paths of the policies this one includes. Populated while building.
    pub dependencies: BTreeSet<String>,
}

/// Tags that make a policy an internal policy rather than a global one.
pub const INTERNAL_POLICY_TAGS: [&str; 4] = [
    "audit-sink",
    "audit-lookup",
    "audit-viewer",
    "debug-trace",
];

/// The kind of a standalone policy, as the gateway sees it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyType {
    /// Includable fragment
    Include,
    /// Global policy fragment, run for every message
    Global,
    /// Internal use policy
    Internal,
}

impl Policy {
    /// Work out the gateway policy type from the tag.
    pub fn policy_type(&self) -> PolicyType {
        match self.tag.as_deref() {
            None => PolicyType::Include,
            Some(t) if INTERNAL_POLICY_TAGS.contains(&t) => PolicyType::Internal,
            Some(_) => PolicyType::Global,
        }
    }
}

impl Display for PolicyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyType::Include => write!(f, "Include"),
            PolicyType::Global => write!(f, "Global"),
            PolicyType::Internal => write!(f, "Internal"),
        }
    }
}

/// A published service. Its policy body lives in `policy_xml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service id
    #[serde(skip)]
    pub id: String,
    /// Service name, the file name without `.xml`
    #[serde(skip)]
    pub name: String,
    /// Folder-relative path of the policy file backing the service
    #[serde(skip)]
    pub path: String,
    /// Id of the owning folder
    #[serde(skip)]
    pub folder_id: String,
    /// Raw policy XML of the service
    #[serde(skip)]
    pub policy_xml: String,
    /// Resolution url pattern
    pub url: String,
    /// Allowed HTTP verbs. Empty means the gateway defaults.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub http_methods: BTreeSet<String>,
    /// Whether the service resolves requests
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,
    /// Vendor-specific extension attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// An encapsulated assertion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encass {
    /// Encass id
    #[serde(skip)]
    pub id: String,
    /// Encass name, the map key
    #[serde(skip)]
    pub name: String,
    /// Kept in the config because policies reference encasses by GUID.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub guid: String,
    /// Path of the backing policy
    pub policy: String,
    /// Inputs, in prompt order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<EncassArgument>,
    /// Outputs set by the backing policy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<EncassResult>,
    /// Vendor-specific extension attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// An encass input argument
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncassArgument {
    /// Argument name
    pub name: String,
    /// Data type, e.g. `string`
    #[serde(rename = "type")]
    pub argument_type: String,
    /// Label shown when prompting for the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gui_label: Option<String>,
    /// Whether to prompt for the value
    #[serde(default, skip_serializing_if = "bool_is_false")]
    pub gui_prompt: bool,
}

/// An encass output
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncassResult {
    /// Result name
    pub name: String,
    /// Data type, e.g. `message`
    #[serde(rename = "type")]
    pub result_type: String,
}

/// A policy-backed service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBackedService {
    /// Service id
    #[serde(skip)]
    pub id: String,
    /// Service name, the map key
    #[serde(skip)]
    pub name: String,
    /// Fully qualified name of the implemented interface
    pub interface_name: String,
    /// Implemented operations
    #[serde(default)]
    pub operations: Vec<PolicyBackedServiceOperation>,
}

/// One operation of a policy-backed service, implemented by a policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBackedServiceOperation {
    /// Interface method name
    pub operation_name: String,
    /// Path of the implementing policy
    pub policy: String,
}

/// A cluster property. Written to a flat properties file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterProperty {
    /// Property id
    pub id: String,
    /// Property name, without the `gateway.` prefix
    pub name: String,
    /// Property value
    pub value: String,
}

/// A listen port.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenPort {
    /// Port id
    #[serde(skip)]
    pub id: String,
    /// Port name, the map key
    #[serde(skip)]
    pub name: String,
    /// TCP port
    pub port: u16,
    /// Protocol, e.g. `HTTPS`
    pub protocol: String,
    /// Whether the port accepts connections
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,
    /// Features enabled on the port, e.g. `Published service message input`
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub enabled_features: BTreeSet<String>,
    /// Path of the service all traffic on this port is routed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
    /// Vendor-specific extension attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// Ports the gateway creates on install. Never exported.
pub const DEFAULT_LISTEN_PORTS: [u16; 4] = [8080, 8443, 9443, 2124];

/// A JDBC connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JdbcConnection {
    /// Connection id
    #[serde(skip)]
    pub id: String,
    /// Connection name, referenced by `L7p:ConnectionName`
    #[serde(skip)]
    pub name: String,
    /// JDBC driver class
    pub driver_class: String,
    /// JDBC url
    pub jdbc_url: String,
    /// Database user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Usually a stored password reference, e.g. `${secpass.db.plaintext}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connection pool lower bound
    #[serde(default = "default_min_pool")]
    pub minimum_pool_size: u32,
    /// Connection pool upper bound
    #[serde(default = "default_max_pool")]
    pub maximum_pool_size: u32,
    /// Whether the connection is enabled
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,
    /// Vendor-specific extension attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    /// Driver-specific connection properties
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connection_properties: BTreeMap<String, String>,
}

fn default_min_pool() -> u32 {
    3
}

fn default_max_pool() -> u32 {
    15
}

/// A Cassandra connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraConnection {
    /// Connection id
    #[serde(skip)]
    pub id: String,
    /// Connection name, referenced by `L7p:ConnectionName`
    #[serde(skip)]
    pub name: String,
    /// Keyspace
    pub keyspace: String,
    /// Comma separated contact points
    pub contact_points: String,
    /// Native protocol port
    pub port: u16,
    /// Login user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Name of the stored password used to authenticate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_password: Option<String>,
    /// Wire compression, `NONE`, `LZ4` or `SNAPPY`
    #[serde(default = "default_compression")]
    pub compression: String,
    /// Whether to connect over TLS
    #[serde(default, skip_serializing_if = "bool_is_false")]
    pub ssl: bool,
    /// Whether the connection is enabled
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,
    /// Vendor-specific extension attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

fn default_compression() -> String {
    "NONE".to_owned()
}

/// The supported identity provider subtypes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityProviderType {
    /// LDAP directory
    #[default]
    Ldap,
    /// LDAP directory used for binding only
    BindOnlyLdap,
    /// Federated identities, trusted through certificates
    Federated,
    /// Identities checked by a policy
    PolicyBacked,
}

impl IdentityProviderType {
    /// The type string used in the management schema
    pub fn gateway_type(&self) -> &'static str {
        match self {
            IdentityProviderType::Ldap => "LDAP",
            IdentityProviderType::BindOnlyLdap => "BIND_ONLY_LDAP",
            IdentityProviderType::Federated => "FEDERATED",
            IdentityProviderType::PolicyBacked => "POLICY_BACKED",
        }
    }
}

impl FromStr for IdentityProviderType {
    type Err = ReadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LDAP" => Ok(IdentityProviderType::Ldap),
            "BIND_ONLY_LDAP" => Ok(IdentityProviderType::BindOnlyLdap),
            "FEDERATED" => Ok(IdentityProviderType::Federated),
            "POLICY_BACKED" => Ok(IdentityProviderType::PolicyBacked),
            other => Err(ReadError::InvalidValue {
                element: "IdentityProviderType".to_owned(),
                value: other.to_owned(),
            }),
        }
    }
}

/// An identity provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProvider {
    /// Provider id
    #[serde(skip)]
    pub id: String,
    /// Provider name, the map key
    #[serde(skip)]
    pub name: String,
    /// Provider subtype
    #[serde(rename = "type")]
    pub provider_type: IdentityProviderType,
    /// Vendor-specific extension attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// A trusted certificate. The certificate itself lives in its own file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedCert {
    /// Certificate id
    #[serde(skip)]
    pub id: String,
    /// Certificate name, also the certificate file name
    #[serde(skip)]
    pub name: String,
    /// Base64-encoded DER
    #[serde(skip)]
    pub encoded: String,
    /// Vendor-specific extension attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// The default gateway keystore
pub const DEFAULT_KEYSTORE_ID: &str = "00000000000000000000000000000002";

/// A private key entry in a gateway keystore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKey {
    /// `keystore:alias`
    #[serde(skip)]
    pub id: String,
    /// Alias within the keystore
    #[serde(skip)]
    pub alias: String,
    /// Keystore id
    #[serde(default = "default_keystore")]
    pub keystore: String,
    /// Key algorithm
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

fn default_keystore() -> String {
    DEFAULT_KEYSTORE_ID.to_owned()
}

fn default_algorithm() -> String {
    "RSA".to_owned()
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self {
            id: String::new(),
            alias: String::new(),
            keystore: default_keystore(),
            algorithm: default_algorithm(),
        }
    }
}

impl PrivateKey {
    /// A key in the default keystore
    pub fn new<S: Into<String>>(alias: S) -> Self {
        let alias = alias.into();
        Self {
            id: format!("{DEFAULT_KEYSTORE_ID}:{alias}"),
            alias,
            keystore: default_keystore(),
            algorithm: default_algorithm(),
        }
    }
}

/// A stored password. Only name and password survive the properties file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredPassword {
    /// Password id
    pub id: String,
    /// Password name, referenced as `${secpass.<name>.plaintext}`
    pub name: String,
    /// The secret
    pub password: String,
    /// Vendor-specific extension attributes
    pub properties: Properties,
}

/// A scheduled task that runs a policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    /// Task id
    #[serde(skip)]
    pub id: String,
    /// Task name, the map key
    #[serde(skip)]
    pub name: String,
    /// Path of the policy to run
    pub policy: String,
    /// `Recurring` or `One time`
    #[serde(default = "default_job_type")]
    pub job_type: String,
    /// Schedule for recurring tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// When a one time task runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_date: Option<String>,
    /// Run on one cluster node only
    #[serde(default, skip_serializing_if = "bool_is_false")]
    pub one_node: bool,
    /// Also run when the task is created
    #[serde(default, skip_serializing_if = "bool_is_false")]
    pub execute_on_create: bool,
    /// Vendor-specific extension attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

fn default_job_type() -> String {
    "Recurring".to_owned()
}

/// A generic entity, kept as opaque XML.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericEntity {
    /// Entity id
    #[serde(skip)]
    pub id: String,
    /// Entity name, the file name
    #[serde(skip)]
    pub name: String,
    /// Written as the directory name, not in the file
    #[serde(skip)]
    pub entity_class_name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the entity is enabled
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,
    /// The entity's own XML configuration
    pub value_xml: String,
}

macro_rules! impl_gateway_entity {
    ($t:ident, $entity_type:expr, name: $name:ident, key: $key:ident) => {
        impl GatewayEntity for $t {
            const ENTITY_TYPE: EntityType = $entity_type;

            fn id(&self) -> &str {
                &self.id
            }

            fn set_id(&mut self, id: String) {
                self.id = id;
            }

            fn name(&self) -> &str {
                &self.$name
            }

            fn key(&self) -> &str {
                &self.$key
            }

            fn into_bundle_entity(self) -> BundleEntity {
                BundleEntity::$t(self)
            }
        }
    };
}

impl_gateway_entity!(Folder, EntityType::Folder, name: name, key: id);
impl_gateway_entity!(Policy, EntityType::Policy, name: name, key: path);
impl_gateway_entity!(Service, EntityType::Service, name: name, key: path);
impl_gateway_entity!(Encass, EntityType::Encass, name: name, key: name);
impl_gateway_entity!(
    PolicyBackedService,
    EntityType::PolicyBackedService,
    name: name,
    key: name
);
impl_gateway_entity!(ClusterProperty, EntityType::ClusterProperty, name: name, key: name);
impl_gateway_entity!(ListenPort, EntityType::ListenPort, name: name, key: name);
impl_gateway_entity!(JdbcConnection, EntityType::JdbcConnection, name: name, key: name);
impl_gateway_entity!(
    CassandraConnection,
    EntityType::CassandraConnection,
    name: name,
    key: name
);
impl_gateway_entity!(IdentityProvider, EntityType::IdentityProvider, name: name, key: name);
impl_gateway_entity!(TrustedCert, EntityType::TrustedCert, name: name, key: name);
impl_gateway_entity!(PrivateKey, EntityType::PrivateKey, name: alias, key: alias);
impl_gateway_entity!(StoredPassword, EntityType::StoredPassword, name: name, key: name);
impl_gateway_entity!(ScheduledTask, EntityType::ScheduledTask, name: name, key: name);
impl_gateway_entity!(GenericEntity, EntityType::GenericEntity, name: name, key: name);
