//! Typed failures.
//!
//! Everything fallible in this crate returns [`anyhow::Result`]. The errors
//! below are the ones a caller may want to tell apart, so they are raised as
//! typed values and can be recovered with `downcast_ref`.

use thiserror::Error;

use crate::bundle::EntityType;

/// Failures while filtering a bundle down to a folder subtree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityFilterError {
    /// A force-included entity doesn't exist in the source bundle.
    #[error("{entity_type} `{name}` was explicitly included but doesn't exist in the bundle")]
    MissingEntity {
        /// Type of the missing entity
        entity_type: EntityType,
        /// The name that was asked for
        name: String,
    },
    /// The export root doesn't exist.
    #[error("folder `{0}` doesn't exist in the bundle")]
    FolderNotFound(String),
}

/// Failures while turning a bundle into deployable XML.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityBuilderError {
    /// A reference matched nothing.
    #[error("could not find {entity_type} `{reference}` referenced by {referrer}")]
    MissingReference {
        /// Type of the referenced entity
        entity_type: EntityType,
        /// The reference as written
        reference: String,
        /// Who made the reference
        referrer: String,
    },
    /// A reference matched several entities.
    #[error(
        "{entity_type} reference `{reference}` in {referrer} is ambiguous, it matches: {}",
        candidates.join(", ")
    )]
    AmbiguousReference {
        /// Type of the referenced entity
        entity_type: EntityType,
        /// The reference as written
        reference: String,
        /// Who made the reference
        referrer: String,
        /// Everything the reference matched
        candidates: Vec<String>,
    },
    /// Policies include each other.
    #[error("policy include cycle: {}", cycle.join(" -> "))]
    IncludeCycle {
        /// Paths of every policy on the cycle, in include order
        cycle: Vec<String>,
    },
    /// The policy XML couldn't be processed.
    #[error("invalid policy `{path}`: {message}")]
    InvalidPolicy {
        /// The policy path
        path: String,
        /// What went wrong
        message: String,
    },
}

/// Failures while assembling the set of entity filters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two filters for the same entity type.
    #[error("a filter for {0} is already registered")]
    DuplicateFilter(EntityType),
    /// A filter depends on a type nothing filters.
    #[error("the {filter} filter depends on {dependency}, which has no filter")]
    MissingDependency {
        /// The filter declaring the dependency
        filter: EntityType,
        /// The unregistered dependency
        dependency: EntityType,
    },
    /// Filters depend on each other.
    #[error("filter dependencies form a cycle between: {}", members.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", "))]
    Cycle {
        /// The filters on the cycle
        members: Vec<EntityType>,
    },
}

/// Schema violations in a gateway bundle or a project file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    /// A required element is absent.
    #[error("missing element `{element}` in {context}")]
    MissingElement {
        /// Local name of the element
        element: String,
        /// Where it was expected
        context: String,
    },
    /// An entity type this tool doesn't model.
    #[error("unsupported entity type `{0}`")]
    UnsupportedType(String),
    /// A value outside the allowed set.
    #[error("invalid value `{value}` for `{element}`")]
    InvalidValue {
        /// What was being read
        element: String,
        /// The offending value
        value: String,
    },
}
