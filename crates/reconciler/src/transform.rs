//! Naming and scope rules for mirrored objects.

use kubemirror_core::{MirrorConfig, ObjectKey};

/// Pure mapping from local identities to remote identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTransformer {
    namespace_prefix: String,
    namespace_suffix: String,
    name_suffix: String,
    secret_name_suffix: String,
}

impl NameTransformer {
    /// Create a transformer. An empty prefix makes every namespace eligible.
    pub fn new(
        namespace_prefix: impl Into<String>,
        namespace_suffix: impl Into<String>,
        name_suffix: impl Into<String>,
    ) -> Self {
        Self {
            namespace_prefix: namespace_prefix.into(),
            namespace_suffix: namespace_suffix.into(),
            name_suffix: name_suffix.into(),
            secret_name_suffix: String::new(),
        }
    }

    /// Build from the controller configuration.
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::new(
            config.namespace_prefix.clone(),
            config.local_namespace_suffix.clone(),
            config.remote_resource_suffix.clone(),
        )
        .with_secret_name_suffix(config.secret_name_suffix.clone())
    }

    /// Suffix for mirrored secret names. Empty keeps names identical.
    pub fn with_secret_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.secret_name_suffix = suffix.into();
        self
    }

    /// Whether objects in `namespace` are mirrored.
    pub fn eligible(&self, namespace: &str) -> bool {
        namespace.starts_with(&self.namespace_prefix)
    }

    pub fn target_namespace(&self, namespace: &str) -> String {
        format!("{namespace}{}", self.namespace_suffix)
    }

    pub fn target_name(&self, name: &str) -> String {
        format!("{name}{}", self.name_suffix)
    }

    /// Remote identity of the mirror for a source key.
    pub fn target_key(&self, key: &ObjectKey) -> ObjectKey {
        ObjectKey::new(self.target_namespace(&key.namespace), self.target_name(&key.name))
    }

    /// Remote identity of a mirrored secret.
    pub fn secret_target_key(&self, namespace: &str, secret_name: &str) -> ObjectKey {
        ObjectKey::new(
            self.target_namespace(namespace),
            format!("{secret_name}{}", self.secret_name_suffix),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubemirror_core::ResourceType;
    use proptest::prelude::*;

    fn transformer() -> NameTransformer {
        NameTransformer::new("team-", "-mirror", "-copy")
    }

    #[test]
    fn test_eligible_with_prefix() {
        let t = transformer();
        assert!(t.eligible("team-a"));
        assert!(!t.eligible("other-b"));
        assert!(!t.eligible("team"));
    }

    #[test]
    fn test_empty_prefix_accepts_everything() {
        let t = NameTransformer::new("", "-mirror", "");
        assert!(t.eligible("kube-system"));
        assert!(t.eligible(""));
    }

    #[test]
    fn test_target_key() {
        let target = transformer().target_key(&ObjectKey::new("team-a", "cfg"));
        assert_eq!(target, ObjectKey::new("team-a-mirror", "cfg-copy"));
    }

    #[test]
    fn test_secret_names_identical_by_default() {
        let t = transformer();
        assert_eq!(t.secret_target_key("team-a", "creds"), ObjectKey::new("team-a-mirror", "creds"));

        let renamed = transformer().with_secret_name_suffix("-copy");
        assert_eq!(
            renamed.secret_target_key("team-a", "creds"),
            ObjectKey::new("team-a-mirror", "creds-copy")
        );
    }

    #[test]
    fn test_from_config() {
        let mut config = MirrorConfig::new(ResourceType::new("example.com", "v1", "Widget"));
        config.namespace_prefix = "team-".into();
        config.local_namespace_suffix = "-mirror".into();
        config.remote_resource_suffix = "-copy".into();
        assert_eq!(NameTransformer::from_config(&config), transformer());
    }

    proptest! {
        #[test]
        fn target_name_appends_suffix(name in "[a-z0-9][a-z0-9-]{0,40}") {
            let t = transformer();
            prop_assert_eq!(t.target_name(&name), format!("{name}-copy"));
            prop_assert_eq!(t.target_namespace(&name), format!("{name}-mirror"));
        }

        #[test]
        fn target_key_is_injective(
            a_ns in "[a-z]{1,8}", a_name in "[a-z]{1,8}",
            b_ns in "[a-z]{1,8}", b_name in "[a-z]{1,8}",
        ) {
            let t = transformer();
            let a = ObjectKey::new(a_ns, a_name);
            let b = ObjectKey::new(b_ns, b_name);
            prop_assert_eq!(t.target_key(&a) == t.target_key(&b), a == b);
        }

        #[test]
        fn transform_is_stable(ns in "[a-z-]{1,20}", name in "[a-z-]{1,20}") {
            let t = transformer();
            let key = ObjectKey::new(ns, name);
            prop_assert_eq!(t.target_key(&key), t.target_key(&key));
        }
    }
}
