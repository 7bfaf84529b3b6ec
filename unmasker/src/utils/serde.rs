use serde::{Deserialize, Deserializer};

/// Deserializes a field that can be either a single value or a list of values. A single value is
/// returned as a list with one element, so `"a"` and `["a"]` are equivalent.
pub fn deserialize_single_or_vec<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SingleOrVec<T> {
        Single(T),
        Vec(Vec<T>),
    }

    match Option::<SingleOrVec<T>>::deserialize(deserializer)? {
        Some(SingleOrVec::Vec(vec)) => Ok(Some(vec)),
        Some(SingleOrVec::Single(single)) => Ok(Some(vec![single])),
        None => Ok(None),
    }
}
