use indexmap::IndexMap;
use std::sync::Arc;

/// Items that are stored in a map keyed by their own name.
pub trait Named {
    fn name(&self) -> &str;
}

/// Serde adapter that stores an `IndexMap<String, Arc<T>>` as a list of `T`, using
/// [`Named::name`] as the key. Use as `#[serde(with = "named_map")]`.
pub mod named_map {
    use serde::de::{self, Deserialize, Deserializer};
    use serde::ser::Serializer;
    use serde::Serialize;
    use super::*;

    pub fn serialize<T, S>(
        map: &IndexMap<String, Arc<T>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
        where T: Serialize, S: Serializer
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, T, D>(
        deserializer: D,
    ) -> Result<IndexMap<String, Arc<T>>, D::Error>
        where T: Deserialize<'de> + Named, D: Deserializer<'de>
    {
        let items = Vec::<T>::deserialize(deserializer)?;
        let mut map = IndexMap::with_capacity(items.len());
        for item in items {
            let name = item.name().to_owned();
            if map.insert(name.clone(), Arc::new(item)).is_some() {
                return Err(de::Error::custom(format!("duplicate name {:?}", name)));
            }
        }
        Ok(map)
    }
}
