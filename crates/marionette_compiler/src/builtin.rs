//! Builtin resource types and metaparameters.

/// Attributes accepted by every resource
pub const METAPARAMS: &[&str] = &[
    "alias", "audit", "before", "loglevel", "noop", "notify", "require", "schedule", "stage",
    "subscribe", "tag",
];

/// Metaparameters that become relationship edges
pub const RELATIONSHIP_METAPARAMS: &[&str] = &["before", "notify", "require", "subscribe"];

/// Metaparameters copied from containers to contained resources
pub const INHERITED_METAPARAMS: &[&str] = &["noop", "schedule", "loglevel", "audit"];

/// A resource type implemented outside the language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinType {
    /// Canonical name
    pub name: &'static str,
    /// Attribute that defaults to the title
    pub namevar: &'static str,
    /// Accepted attributes besides the metaparameters
    pub attributes: &'static [&'static str],
    /// Two instances with the same title conflict
    pub isomorphic: bool,
}

impl BuiltinType {
    /// Whether `attribute` may be set on this type
    #[must_use]
    pub fn accepts(&self, attribute: &str) -> bool {
        attribute == "name"
            || attribute == self.namevar
            || self.attributes.contains(&attribute)
            || is_metaparam(attribute)
    }
}

/// Whether `name` is a metaparameter
#[must_use]
pub fn is_metaparam(name: &str) -> bool {
    METAPARAMS.contains(&name)
}

/// Builtin type by canonical name
#[must_use]
pub fn builtin_type(name: &str) -> Option<&'static BuiltinType> {
    BUILTIN_TYPES.iter().find(|t| t.name == name)
}

/// Whether two resources of `type_name` with one title are the same
/// resource; everything but a non-isomorphic builtin is
#[must_use]
pub fn is_isomorphic(type_name: &str) -> bool {
    builtin_type(type_name).is_none_or(|t| t.isomorphic)
}

/// All builtin types
pub static BUILTIN_TYPES: &[BuiltinType] = &[
    BuiltinType {
        name: "file",
        namevar: "path",
        attributes: &[
            "ensure", "owner", "group", "mode", "content", "source", "target", "recurse",
            "recurselimit", "purge", "force", "backup", "replace", "links", "checksum", "ignore",
            "show_diff", "sourceselect", "validate_cmd", "seltype", "selrange", "selrole",
            "seluser",
        ],
        isomorphic: true,
    },
    BuiltinType {
        name: "exec",
        namevar: "command",
        attributes: &[
            "creates", "cwd", "environment", "group", "logoutput", "onlyif", "path", "provider",
            "refresh", "refreshonly", "returns", "timeout", "tries", "try_sleep", "umask",
            "unless", "user",
        ],
        isomorphic: false,
    },
    BuiltinType {
        name: "package",
        namevar: "name",
        attributes: &[
            "ensure", "source", "provider", "install_options", "uninstall_options",
            "responsefile", "adminfile", "configfiles", "category", "description", "flavor",
            "instance", "platform", "root", "status", "vendor",
        ],
        isomorphic: true,
    },
    BuiltinType {
        name: "service",
        namevar: "name",
        attributes: &[
            "ensure", "enable", "binary", "control", "hasrestart", "hasstatus", "manifest",
            "path", "pattern", "provider", "restart", "start", "status", "stop", "flags",
        ],
        isomorphic: true,
    },
    BuiltinType {
        name: "user",
        namevar: "name",
        attributes: &[
            "ensure", "uid", "gid", "groups", "home", "shell", "comment", "managehome",
            "password", "password_min_age", "password_max_age", "system", "membership", "expiry",
            "provider", "purge_ssh_keys",
        ],
        isomorphic: true,
    },
    BuiltinType {
        name: "group",
        namevar: "name",
        attributes: &["ensure", "gid", "members", "system", "provider", "auth_membership"],
        isomorphic: true,
    },
    BuiltinType {
        name: "notify",
        namevar: "name",
        attributes: &["message", "withpath"],
        isomorphic: true,
    },
    BuiltinType {
        name: "cron",
        namevar: "name",
        attributes: &[
            "ensure", "command", "user", "minute", "hour", "monthday", "month", "weekday",
            "environment", "special", "target",
        ],
        isomorphic: true,
    },
    BuiltinType {
        name: "host",
        namevar: "name",
        attributes: &["ensure", "ip", "host_aliases", "comment", "target"],
        isomorphic: true,
    },
    BuiltinType {
        name: "mount",
        namevar: "name",
        attributes: &[
            "ensure", "device", "fstype", "options", "pass", "dump", "atboot", "remounts",
            "target", "blockdevice",
        ],
        isomorphic: true,
    },
    BuiltinType {
        name: "stage",
        namevar: "name",
        attributes: &[],
        isomorphic: true,
    },
    BuiltinType {
        name: "schedule",
        namevar: "name",
        attributes: &["range", "period", "periodmatch", "repeat", "weekday"],
        isomorphic: true,
    },
    BuiltinType {
        name: "tidy",
        namevar: "path",
        attributes: &["age", "backup", "matches", "recurse", "rmdirs", "size", "type"],
        isomorphic: true,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let file = builtin_type("file").unwrap();
        assert!(file.accepts("mode"));
        assert!(file.accepts("path"));
        assert!(file.accepts("require"));
        assert!(!file.accepts("bogus"));
        assert!(builtin_type("apache::vhost").is_none());
    }

    #[test]
    fn test_exec_is_not_isomorphic() {
        assert!(!builtin_type("exec").unwrap().isomorphic);
        assert!(builtin_type("stage").unwrap().isomorphic);
    }

    #[test]
    fn test_metaparam_tables_are_subsets() {
        for name in RELATIONSHIP_METAPARAMS.iter().chain(INHERITED_METAPARAMS) {
            assert!(is_metaparam(name), "{} is not a metaparameter", name);
        }
    }
}
