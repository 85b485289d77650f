use bsj_common::{BsjError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::shard_spec::ShardSpec;

/// A named sharded collection and the field it is joined on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDef {
    pub name: String,
    /// Shard path pattern, see [`ShardSpec`].
    pub spec: String,
    pub key: String,
    #[serde(default)]
    pub description: String,
}

impl CollectionDef {
    pub fn shard_spec(&self) -> Result<ShardSpec> {
        self.spec.parse()
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    collections: BTreeMap<String, CollectionDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            collections: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, collection: CollectionDef) {
        self.collections.insert(collection.name.clone(), collection);
    }

    pub fn get(&self, name: &str) -> Result<&CollectionDef> {
        self.collections
            .get(name)
            .ok_or_else(|| BsjError::InvalidConfig(format!("unknown collection: {name}")))
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionDef> {
        self.collections.values()
    }

    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let collections: Vec<CollectionDef> =
            serde_json::from_str(&s).map_err(|e| BsjError::InvalidConfig(e.to_string()))?;
        let mut cat = Catalog::new();
        for c in collections {
            cat.register(c);
        }
        Ok(cat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_collections() {
        let defs: Vec<CollectionDef> = serde_json::from_str(
            r#"[
                {"name": "uniref50", "spec": "data/uniref50", "key": "accession"},
                {"name": "pfam", "spec": "data/pfam/regions@4", "key": "uniprot_acc"}
            ]"#,
        )
        .expect("parse");
        let mut cat = Catalog::new();
        for d in defs {
            cat.register(d);
        }
        let pfam = cat.get("pfam").expect("pfam");
        assert!(matches!(
            pfam.shard_spec().expect("spec"),
            ShardSpec::Counted { count: 4, .. }
        ));
        assert!(cat.get("hippie").is_err());
        assert_eq!(cat.collections().count(), 2);
    }
}
