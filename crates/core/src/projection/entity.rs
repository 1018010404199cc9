//! Entity trait, provenance and id conventions.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Creation/update block stamps carried by every projected entity.
///
/// `created_block_id` is set once; `updated_block_id` only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub created_block_id: u64,
    pub updated_block_id: u64,
}

impl Provenance {
    /// Provenance of an entity first seen at `block`.
    pub fn at(block: u64) -> Self {
        Self {
            created_block_id: block,
            updated_block_id: block,
        }
    }

    /// Advance the update stamp, never backwards.
    pub fn touch(&mut self, block: u64) {
        self.updated_block_id = self.updated_block_id.max(block);
    }
}

/// A projected row, stored as a JSON document under `(KIND, id)`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Table-like kind name (e.g. `Instruction`).
    const KIND: &'static str;

    /// Deterministic id derived from natural keys.
    fn id(&self) -> &str;

    fn provenance(&self) -> &Provenance;

    fn provenance_mut(&mut self) -> &mut Provenance;
}

/// Implement [`Entity`] for a struct with `id: String` and
/// `provenance: Provenance` fields.
#[macro_export]
macro_rules! impl_entity {
    ($ty:ty, $kind:literal) => {
        impl $crate::projection::Entity for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> &str {
                &self.id
            }

            fn provenance(&self) -> &$crate::projection::Provenance {
                &self.provenance
            }

            fn provenance_mut(&mut self) -> &mut $crate::projection::Provenance {
                &mut self.provenance
            }
        }
    };
}

/// Join id parts with `/`. Empty parts are skipped so optional trailing
/// parts never leave a dangling separator.
pub fn compose_id<S: AsRef<str>>(parts: &[S]) -> String {
    let mut id = String::new();
    for part in parts.iter().map(AsRef::as_ref).filter(|p| !p.is_empty()) {
        if !id.is_empty() {
            id.push('/');
        }
        id.push_str(part);
    }
    id
}

/// Serde adapter for `u128` balances stored as decimal strings.
///
/// JSON numbers lose precision past 2^53; reading accepts either form.
pub mod amount {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => s.parse().map_err(de::Error::custom),
            Repr::Num(n) => Ok(n as u128),
        }
    }

    /// Same as the parent module for `Option<u128>`.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<u128>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u128>, D::Error> {
            #[derive(Deserialize)]
            struct Wrap(#[serde(with = "super")] u128);

            Ok(Option::<Wrap>::deserialize(deserializer)?.map(|w| w.0))
        }
    }
}
