use serde::{Deserialize, Deserializer, Serializer, de::Error as SerdeError};

/// Numbers rendered as decimal strings, so JSON consumers never lose precision.
pub mod quoted {
    use std::{fmt::Display, str::FromStr};

    use super::{Deserialize, Deserializer, SerdeError, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value
            .parse::<T>()
            .map_err(|err| SerdeError::custom(format!("invalid number {value:?}: {err}")))
    }
}
