//! Ownership metadata linking mirrors back to their sources.
//!
//! Every object the engine creates carries a managed-by label (so watches
//! can select it) and annotations naming exactly one source. Annotations
//! are used for the source identity because object names may exceed the
//! label value length limit.

use std::fmt;

use kubemirror_core::{Object, ObjectKey, Selector};

/// Label holding the id of the controller that owns an object.
pub const MANAGED_BY_LABEL: &str = "kubemirror.io/managed-by";
/// Annotation holding the kind of the source object.
pub const SOURCE_KIND_ANNOTATION: &str = "kubemirror.io/source-kind";
/// Annotation holding the namespace of the source object.
pub const SOURCE_NAMESPACE_ANNOTATION: &str = "kubemirror.io/source-namespace";
/// Annotation holding the name of the source object.
pub const SOURCE_NAME_ANNOTATION: &str = "kubemirror.io/source-name";

/// Identity of the local object a mirror was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub kind: String,
    pub key: ObjectKey,
}

impl SourceRef {
    pub fn new(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self {
            kind: kind.into(),
            key,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// Provenance tagger for one controller instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    controller: String,
}

impl Provenance {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
        }
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Record `source` as the origin of `object`.
    pub fn tag(&self, object: &mut Object, source: &SourceRef) {
        object
            .meta
            .labels
            .insert(MANAGED_BY_LABEL.to_string(), self.controller.clone());
        let annotations = &mut object.meta.annotations;
        annotations.insert(SOURCE_KIND_ANNOTATION.to_string(), source.kind.clone());
        annotations.insert(
            SOURCE_NAMESPACE_ANNOTATION.to_string(),
            source.key.namespace.clone(),
        );
        annotations.insert(SOURCE_NAME_ANNOTATION.to_string(), source.key.name.clone());
    }

    /// Whether `object` was produced by this controller from `source`.
    pub fn matches(&self, object: &Object, source: &SourceRef) -> bool {
        self.source_of(object).as_ref() == Some(source)
    }

    /// Reverse lookup of the source recorded on an object owned by this
    /// controller. Objects owned by other controllers yield `None`.
    pub fn source_of(&self, object: &Object) -> Option<SourceRef> {
        let managed_by = object.meta.labels.get(MANAGED_BY_LABEL)?;
        if managed_by != &self.controller {
            return None;
        }
        let annotations = &object.meta.annotations;
        let kind = annotations.get(SOURCE_KIND_ANNOTATION)?;
        let namespace = annotations.get(SOURCE_NAMESPACE_ANNOTATION)?;
        let name = annotations.get(SOURCE_NAME_ANNOTATION)?;
        Some(SourceRef::new(
            kind.clone(),
            ObjectKey::new(namespace.clone(), name.clone()),
        ))
    }

    /// Selector for every object owned by this controller.
    pub fn selector(&self) -> Selector {
        Selector::everything().with_label(MANAGED_BY_LABEL, self.controller.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubemirror_core::ResourceType;

    fn widget(ns: &str, name: &str) -> Object {
        Object::new(ResourceType::new("example.com", "v1", "Widget"), &ObjectKey::new(ns, name))
    }

    fn source() -> SourceRef {
        SourceRef::new("Widget", ObjectKey::new("team-a", "cfg"))
    }

    #[test]
    fn test_tag_then_match() {
        let provenance = Provenance::new("Widget.v1.example.com");
        let mut mirror = widget("team-a-mirror", "cfg-copy");
        provenance.tag(&mut mirror, &source());

        assert!(provenance.matches(&mirror, &source()));
        assert_eq!(provenance.source_of(&mirror), Some(source()));
        assert!(provenance.selector().matches(&mirror));
    }

    #[test]
    fn test_untagged_object_is_foreign() {
        let provenance = Provenance::new("Widget.v1.example.com");
        let foreign = widget("team-a-mirror", "cfg-copy");
        assert!(!provenance.matches(&foreign, &source()));
        assert_eq!(provenance.source_of(&foreign), None);
    }

    #[test]
    fn test_other_source_does_not_match() {
        let provenance = Provenance::new("Widget.v1.example.com");
        let mut mirror = widget("team-a-mirror", "cfg-copy");
        provenance.tag(&mut mirror, &SourceRef::new("Widget", ObjectKey::new("team-a", "other")));
        assert!(!provenance.matches(&mirror, &source()));

        let mut secret = widget("team-a-mirror", "cfg-copy");
        provenance.tag(&mut secret, &SourceRef::new("Secret", ObjectKey::new("team-a", "cfg")));
        assert!(!provenance.matches(&secret, &source()));
    }

    #[test]
    fn test_other_controller_does_not_match() {
        let ours = Provenance::new("Widget.v1.example.com");
        let theirs = Provenance::new("Widget.v1.example.com-staging");
        let mut mirror = widget("team-a-mirror", "cfg-copy");
        theirs.tag(&mut mirror, &source());

        assert!(!ours.matches(&mirror, &source()));
        assert_eq!(ours.source_of(&mirror), None);
        assert!(!ours.selector().matches(&mirror));
    }

    #[test]
    fn test_missing_annotation_is_foreign() {
        let provenance = Provenance::new("c");
        let mut mirror = widget("ns", "n");
        provenance.tag(&mut mirror, &source());
        mirror.meta.annotations.remove(SOURCE_NAME_ANNOTATION);
        assert!(!provenance.matches(&mirror, &source()));
    }
}
