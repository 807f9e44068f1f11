//! Batched relation loading.

use crate::entity::{Record, Related};
use crate::key::ForeignKey;
use crate::mapper::DataMapper;
use crate::query::EntityQuery;
use relmap_core::{ColumnMap, Result};
use std::cell::OnceCell;
use std::fmt;

/// Answers one relation for every owner of a batch from a single query.
///
/// Related records are indexed by their key once, either at construction
/// (`immediate`) or on the first `get_result`. Owners then look up their
/// records by exact key equality.
pub struct RelationLoader {
    query: Option<EntityQuery>,
    foreign_key: ForeignKey,
    inverse: bool,
    many: bool,
    hidden_columns: Vec<String>,
    loaded: OnceCell<Vec<(ColumnMap, Record)>>,
}

impl RelationLoader {
    /// `inverse` is set when the owner row holds the key (`BelongsTo`).
    /// `hidden_columns` are selected only to index results and are stripped
    /// from the related rows afterwards.
    pub(crate) fn new(
        query: EntityQuery,
        foreign_key: ForeignKey,
        inverse: bool,
        many: bool,
        hidden_columns: Vec<String>,
        immediate: bool,
    ) -> Result<Self> {
        let loader = Self {
            query: Some(query),
            foreign_key,
            inverse,
            many,
            hidden_columns,
            loaded: OnceCell::new(),
        };
        if immediate {
            loader.load()?;
        }
        Ok(loader)
    }

    /// A loader for a batch whose keys are all NULL: it never queries.
    pub(crate) fn empty(foreign_key: ForeignKey, inverse: bool, many: bool) -> Self {
        Self {
            query: None,
            foreign_key,
            inverse,
            many,
            hidden_columns: Vec::new(),
            loaded: OnceCell::from(Vec::new()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    fn load(&self) -> Result<&[(ColumnMap, Record)]> {
        if let Some(loaded) = self.loaded.get() {
            return Ok(loaded.as_slice());
        }

        let records = match &self.query {
            Some(query) => query.all(&[])?,
            None => Vec::new(),
        };
        tracing::debug!(
            related = records.len(),
            inverse = self.inverse,
            "Relation loader fetched batch"
        );

        let mut indexed = Vec::with_capacity(records.len());
        for record in records {
            let data = record.data_mapper();
            let raw = data.get_raw_columns();
            let key = if self.inverse {
                self.foreign_key.value_map(&raw)
            } else {
                self.foreign_key.extract_value_map(&raw)
            };
            if !self.hidden_columns.is_empty() {
                data.remove_raw_columns(&self.hidden_columns);
            }
            indexed.push((key, record));
        }

        Ok(self.loaded.get_or_init(|| indexed).as_slice())
    }

    /// The related records of `owner`.
    pub fn get_result(&self, owner: &DataMapper) -> Result<Related> {
        let raw = owner.get_raw_columns();
        let key = if self.inverse {
            self.foreign_key.extract_value_map(&raw)
        } else {
            self.foreign_key.value_map(&raw)
        };

        let mut matches = self
            .load()?
            .iter()
            .filter(|(candidate, _)| *candidate == key)
            .map(|(_, record)| record.clone());

        Ok(if self.many {
            Related::Many(matches.collect())
        } else {
            Related::One(matches.next())
        })
    }
}

impl fmt::Debug for RelationLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationLoader")
            .field("foreign_key", &self.foreign_key)
            .field("inverse", &self.inverse)
            .field("many", &self.many)
            .field("hidden_columns", &self.hidden_columns)
            .field("loaded", &self.loaded.get().map(Vec::len))
            .finish_non_exhaustive()
    }
}
