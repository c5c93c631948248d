//! Entity batches exchanged with the ingress endpoint.
//!
//! The wire form is a JSON array of entity objects. A leading element with
//! `"id": "@context"` carries the namespace context and a trailing element with
//! `"id": "@continuation"` carries a continuation token; neither is an entity.
//! The context is dropped when a batch is written back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const CONTEXT_ID: &str = "@context";
const CONTINUATION_ID: &str = "@continuation";

/// A single entity.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Entity {
    pub id: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded: Option<u64>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub refs: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// An ordered batch of entities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityCollection {
    pub context: Option<Value>,
    pub entities: Vec<Entity>,
    pub continuation: Option<Value>,
}

/// Failure to decode or encode a batch.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a json array of entities")]
    NotAnArray,

    #[error("element {index} is not a valid entity: {source}")]
    Entity {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl EntityCollection {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Decode a batch from its JSON array form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EntityError> {
        let Value::Array(elements) = serde_json::from_slice::<Value>(bytes)? else {
            return Err(EntityError::NotAnArray);
        };

        let mut collection = EntityCollection::default();
        for (index, element) in elements.into_iter().enumerate() {
            match element.get("id").and_then(Value::as_str) {
                Some(CONTEXT_ID) => collection.context = Some(element),
                Some(CONTINUATION_ID) => collection.continuation = Some(element),
                _ => {
                    let entity = serde_json::from_value(element)
                        .map_err(|source| EntityError::Entity { index, source })?;
                    collection.entities.push(entity);
                }
            }
        }
        Ok(collection)
    }

    /// Encode the batch as a JSON array, omitting the context.
    pub fn to_vec(&self) -> Result<Vec<u8>, EntityError> {
        let mut elements = Vec::with_capacity(self.entities.len() + 1);
        for entity in &self.entities {
            elements.push(serde_json::to_value(entity)?);
        }
        if let Some(continuation) = &self.continuation {
            elements.push(continuation.clone());
        }
        Ok(serde_json::to_vec(&elements)?)
    }
}
