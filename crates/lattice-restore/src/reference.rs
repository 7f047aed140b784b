//! Identity of the restore being executed

use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use lattice_common::crd::LatticeRestore;

/// Which LatticeRestore an operation belongs to
///
/// Passed to collaborators so they can label created objects and attach
/// messages to the right restore.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RestoreRef {
    /// Namespace of the LatticeRestore
    pub namespace: String,
    /// Name of the LatticeRestore
    pub name: String,
    /// UID of the LatticeRestore, when known
    pub uid: Option<String>,
}

impl RestoreRef {
    /// Reference by namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
        }
    }

    /// Reference to an existing resource
    pub fn from_resource(restore: &LatticeRestore) -> Self {
        Self {
            namespace: restore
                .namespace()
                .unwrap_or_else(|| lattice_common::LATTICE_SYSTEM_NAMESPACE.to_string()),
            name: restore.name_any(),
            uid: restore.uid(),
        }
    }

    /// Object reference suitable for Kubernetes Events
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(format!("{}/v1alpha1", lattice_common::LATTICE_API_GROUP)),
            kind: Some("LatticeRestore".to_string()),
            namespace: Some(self.namespace.clone()),
            name: Some(self.name.clone()),
            uid: self.uid.clone(),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for RestoreRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
