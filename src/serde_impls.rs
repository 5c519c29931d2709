use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt::{self, Formatter};
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

use crate::{HashSet, HashSetRef, HashTable, HashTableRef};

struct MapVisitor<K, V, S> {
    _marker: PhantomData<HashTable<K, V, S>>,
}

impl<K, V, S> Serialize for HashTableRef<'_, K, V, S>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
    S: BuildHasher,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_map(self)
    }
}

impl<K, V, S> Serialize for HashTable<K, V, S>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
    S: BuildHasher,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        self.pin().serialize(serializer)
    }
}

impl<'de, K, V, S> Deserialize<'de> for HashTable<K, V, S>
where
    K: Deserialize<'de> + Hash + Eq,
    V: Deserialize<'de>,
    S: Default + BuildHasher,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(MapVisitor {
            _marker: PhantomData,
        })
    }
}

impl<'de, K, V, S> Visitor<'de> for MapVisitor<K, V, S>
where
    K: Deserialize<'de> + Hash + Eq,
    V: Deserialize<'de>,
    S: Default + BuildHasher,
{
    type Value = HashTable<K, V, S>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a map")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let table = HashTable::with_capacity_and_hasher(
            access.size_hint().unwrap_or_default(),
            S::default(),
        );

        // Later duplicates are dropped, keeping the first occurrence.
        while let Some((key, value)) = access.next_entry()? {
            table.add(key, value);
        }

        Ok(table)
    }
}

struct SetVisitor<K, S> {
    _marker: PhantomData<HashSet<K, S>>,
}

impl<K, S> Serialize for HashSetRef<'_, K, S>
where
    K: Serialize + Hash + Eq,
    S: BuildHasher,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        serializer.collect_seq(self)
    }
}

impl<K, S> Serialize for HashSet<K, S>
where
    K: Serialize + Hash + Eq,
    S: BuildHasher,
{
    fn serialize<Sr>(&self, serializer: Sr) -> Result<Sr::Ok, Sr::Error>
    where
        Sr: Serializer,
    {
        self.pin().serialize(serializer)
    }
}

impl<'de, K, S> Deserialize<'de> for HashSet<K, S>
where
    K: Deserialize<'de> + Hash + Eq,
    S: Default + BuildHasher,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(SetVisitor {
            _marker: PhantomData,
        })
    }
}

impl<'de, K, S> Visitor<'de> for SetVisitor<K, S>
where
    K: Deserialize<'de> + Hash + Eq,
    S: Default + BuildHasher,
{
    type Value = HashSet<K, S>;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "a set")
    }

    fn visit_seq<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: SeqAccess<'de>,
    {
        let set = HashSet::with_capacity_and_hasher(
            access.size_hint().unwrap_or_default(),
            S::default(),
        );

        while let Some(key) = access.next_element()? {
            set.insert(key);
        }

        Ok(set)
    }
}

#[cfg(test)]
mod test {
    use crate::{HashSet, HashTable};

    #[test]
    fn test_map() {
        let table: HashTable<u8, u8> = HashTable::new();

        table.add(0, 4);
        table.add(1, 3);
        table.add(2, 2);
        table.add(3, 1);
        table.add(4, 0);

        let serialized = serde_json::to_string(&table).unwrap();
        let deserialized: HashTable<u8, u8> = serde_json::from_str(&serialized).unwrap();

        assert_eq!(table, deserialized);
    }

    #[test]
    fn test_set() {
        let set: HashSet<u8> = HashSet::new();

        set.insert(0);
        set.insert(1);
        set.insert(2);
        set.insert(3);
        set.insert(4);

        let serialized = serde_json::to_string(&set).unwrap();
        let deserialized: HashSet<u8> = serde_json::from_str(&serialized).unwrap();

        assert_eq!(set, deserialized);
    }
}
