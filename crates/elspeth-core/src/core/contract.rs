// elspeth-core/src/core/contract.rs
// ============================================================================
// Module: Elspeth Schema Contracts
// Description: Field metadata, dual-name resolution, locking, merge, and checkpointing.
// Purpose: Provide an immutable typed contract for row shapes flowing through nodes.
// Dependencies: crate::core::hashing, serde
// ============================================================================

//! ## Overview
//! A [`SchemaContract`] is an immutable value type describing the fields a
//! node's output rows carry. It provides O(1) lookup by normalized name,
//! original name, or full field metadata via hand-built indices computed
//! once at construction — the same "frozen record with explicit indices"
//! shape used elsewhere in this crate for other read-mostly value types.
//!
//! Ported from the reference Python implementation's `SchemaContract` /
//! `FieldContract` (see DESIGN.md); field-type identity is represented as a
//! closed enum rather than a runtime `type` object.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;

// ============================================================================
// SECTION: Field Kind
// ============================================================================

/// Closed set of primitive field kinds a contract can describe.
///
/// Replaces the reference implementation's reliance on Python's runtime
/// `type` object: arbitrary-precision integers normalize to `Int`, numpy and
/// pandas numeric primitives normalize to their nearest kind here,
/// `pandas.Timestamp` normalizes to `DateTime`, and anything else normalizes
/// to `Any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Integer value.
    Int,
    /// Floating point value.
    Float,
    /// Boolean value.
    Bool,
    /// UTF-8 string.
    Str,
    /// UTC timestamp.
    DateTime,
    /// Explicit absence (`None`), distinct from a missing key.
    NoneType,
    /// Unconstrained; type validation is skipped for this field.
    Any,
}

/// Where a field's presence in the contract originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Declared explicitly in configuration.
    Declared,
    /// Inferred from an observed row value.
    Inferred,
}

// ============================================================================
// SECTION: FieldContract
// ============================================================================

/// Metadata for a single field within a [`SchemaContract`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldContract {
    /// Canonical field name used for contract lookups and hashing.
    pub normalized_name: String,
    /// Name as it appeared at the point of declaration or observation.
    pub original_name: String,
    /// Field type kind.
    pub kind: FieldKind,
    /// Whether the field must be present on every row.
    pub required: bool,
    /// Whether this field was declared or inferred.
    pub source: FieldSource,
}

// ============================================================================
// SECTION: SchemaMode
// ============================================================================

/// Controls how a contract treats fields not already known to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Only declared fields are permitted; extras are violations.
    Fixed,
    /// Declared minimum plus inferred extras allowed on first observation.
    Flexible,
    /// All fields are inferred from data.
    Observed,
}

impl SchemaMode {
    /// Precedence used when merging two contracts at a coalesce point:
    /// `Fixed > Flexible > Observed`.
    const fn precedence(self) -> u8 {
        match self {
            Self::Fixed => 2,
            Self::Flexible => 1,
            Self::Observed => 0,
        }
    }
}

// ============================================================================
// SECTION: Violations
// ============================================================================

/// A single contract violation observed while validating a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// A required field was absent from the row.
    MissingField {
        /// The field's normalized name.
        field: String,
    },
    /// A field's value did not match its declared kind.
    TypeMismatch {
        /// The field's normalized name.
        field: String,
        /// The kind the contract declares.
        expected: FieldKind,
    },
    /// A key present on the row has no corresponding field in a `Fixed` contract.
    ExtraField {
        /// The offending key, as it appeared on the row.
        field: String,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised mutating or resolving a [`SchemaContract`].
#[derive(Debug, Error)]
pub enum ContractError {
    /// A lookup key did not resolve to any known field.
    #[error("unknown field: {0}")]
    UnknownField(String),
    /// `with_field` was called on a contract that is already locked.
    #[error("contract is locked; cannot add field {0}")]
    Locked(String),
    /// `with_field` was called with a name already present in the contract.
    #[error("field already present: {0}")]
    DuplicateField(String),
    /// Canonical hashing failed while computing a version hash.
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Raised when two contracts cannot be merged at a coalesce point.
#[derive(Debug, Error)]
#[error("cannot merge field {field}: incompatible kinds {left:?} and {right:?}")]
pub struct ContractMergeError {
    /// The conflicting field's normalized name.
    pub field: String,
    /// Kind carried by the left-hand contract.
    pub left: FieldKind,
    /// Kind carried by the right-hand contract.
    pub right: FieldKind,
}

/// Raised when a checkpointed contract fails hash verification on restore.
#[derive(Debug, Error)]
#[error("schema contract checkpoint hash mismatch: expected {expected}, found {found}")]
pub struct ContractIntegrityError {
    /// Hash recorded at checkpoint time.
    pub expected: String,
    /// Hash recomputed on restore.
    pub found: String,
}

// ============================================================================
// SECTION: SchemaContract
// ============================================================================

/// Per-node immutable typed contract over row shape.
///
/// Lookups by normalized name, original name, and full field metadata are
/// all O(1) via indices built once in [`SchemaContract::new`] /
/// [`SchemaContract::with_field`] — mirroring the reference corpus's
/// "immutable value types with hand-built indices" pattern for read-mostly
/// domain records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContract {
    mode: SchemaMode,
    fields: Vec<FieldContract>,
    locked: bool,
    #[serde(skip)]
    by_normalized: BTreeMap<String, usize>,
    #[serde(skip)]
    by_original: BTreeMap<String, usize>,
}

impl SchemaContract {
    /// Creates a new, unlocked contract with no fields.
    #[must_use]
    pub fn new(mode: SchemaMode) -> Self {
        Self {
            mode,
            fields: Vec::new(),
            locked: false,
            by_normalized: BTreeMap::new(),
            by_original: BTreeMap::new(),
        }
    }

    fn rebuild_indices(&mut self) {
        self.by_normalized.clear();
        self.by_original.clear();
        for (idx, field) in self.fields.iter().enumerate() {
            self.by_normalized.insert(field.normalized_name.clone(), idx);
            self.by_original.insert(field.original_name.clone(), idx);
        }
    }

    /// Returns the contract's mode.
    #[must_use]
    pub const fn mode(&self) -> SchemaMode {
        self.mode
    }

    /// Returns whether the contract is locked against new fields.
    #[must_use]
    pub const fn locked(&self) -> bool {
        self.locked
    }

    /// Returns the contract's fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldContract] {
        &self.fields
    }

    /// Resolves either an original or normalized key to its normalized name.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::UnknownField`] if `key` matches no field.
    pub fn resolve_name(&self, key: &str) -> Result<&str, ContractError> {
        self.get_field(key).map(|field| field.normalized_name.as_str())
    }

    /// Looks up a field by either its normalized or original name.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::UnknownField`] if `key` matches no field.
    pub fn get_field(&self, key: &str) -> Result<&FieldContract, ContractError> {
        let idx = self
            .by_normalized
            .get(key)
            .or_else(|| self.by_original.get(key))
            .ok_or_else(|| ContractError::UnknownField(key.to_string()))?;
        Ok(&self.fields[*idx])
    }

    /// Looks up a field by either name, returning `None` instead of erroring.
    #[must_use]
    pub fn find_field(&self, key: &str) -> Option<&FieldContract> {
        self.get_field(key).ok()
    }

    /// Returns a new contract with an additional field.
    ///
    /// Inferred fields are never marked required. Rejected if the contract
    /// is locked or the name is already present.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::Locked`] or [`ContractError::DuplicateField`].
    pub fn with_field(
        &self,
        normalized_name: impl Into<String>,
        original_name: impl Into<String>,
        kind: FieldKind,
        source: FieldSource,
    ) -> Result<Self, ContractError> {
        let normalized_name = normalized_name.into();
        if self.locked {
            return Err(ContractError::Locked(normalized_name));
        }
        if self.by_normalized.contains_key(&normalized_name) {
            return Err(ContractError::DuplicateField(normalized_name));
        }
        let required = matches!(source, FieldSource::Declared);
        let mut next = self.clone();
        next.fields.push(FieldContract {
            normalized_name,
            original_name: original_name.into(),
            kind,
            required,
            source,
        });
        next.rebuild_indices();
        Ok(next)
    }

    /// Returns a new contract that is locked against further field addition.
    #[must_use]
    pub fn with_locked(&self) -> Self {
        let mut next = self.clone();
        next.locked = true;
        next
    }

    /// Validates a row's keys and value kinds against this contract.
    #[must_use]
    pub fn validate(&self, row: &BTreeMap<String, Value>) -> Vec<Violation> {
        let mut violations = Vec::new();

        for field in &self.fields {
            let Some(value) = row
                .get(&field.normalized_name)
                .or_else(|| row.get(&field.original_name))
            else {
                if field.required {
                    violations.push(Violation::MissingField {
                        field: field.normalized_name.clone(),
                    });
                }
                continue;
            };
            if field.kind == FieldKind::Any {
                continue;
            }
            if matches!(value, Value::Null) {
                continue;
            }
            if !value_matches_kind(value, field.kind) {
                violations.push(Violation::TypeMismatch {
                    field: field.normalized_name.clone(),
                    expected: field.kind,
                });
            }
        }

        if self.mode == SchemaMode::Fixed {
            for key in row.keys() {
                if self.find_field(key).is_none() {
                    violations.push(Violation::ExtraField { field: key.clone() });
                }
            }
        }

        violations
    }

    /// Merges two contracts at a coalesce point.
    ///
    /// Mode precedence: `Fixed > Flexible > Observed`. A field present in
    /// both inputs must carry an identical kind. A field present in only one
    /// input becomes non-required in the merge. The merge is locked if
    /// either input is locked. `Declared` source wins over `Inferred`.
    ///
    /// # Errors
    ///
    /// Returns [`ContractMergeError`] if a shared field's kind disagrees.
    pub fn merge(&self, other: &Self) -> Result<Self, ContractMergeError> {
        let mode = if self.mode.precedence() >= other.mode.precedence() {
            self.mode
        } else {
            other.mode
        };

        let mut merged = Self::new(mode);
        let mut seen: BTreeMap<String, FieldContract> = BTreeMap::new();

        for field in self.fields.iter().chain(other.fields.iter()) {
            match seen.get_mut(&field.normalized_name) {
                None => {
                    seen.insert(field.normalized_name.clone(), field.clone());
                }
                Some(existing) => {
                    if existing.kind != field.kind {
                        return Err(ContractMergeError {
                            field: field.normalized_name.clone(),
                            left: existing.kind,
                            right: field.kind,
                        });
                    }
                    existing.required = existing.required && field.required;
                    if field.source == FieldSource::Declared {
                        existing.source = FieldSource::Declared;
                    }
                }
            }
        }

        // A field present in only one input must become non-required, even
        // though the loop above already starts it at its own requiredness.
        for field in seen.values_mut() {
            let in_self = self.by_normalized.contains_key(&field.normalized_name);
            let in_other = other.by_normalized.contains_key(&field.normalized_name);
            if !(in_self && in_other) {
                field.required = false;
            }
        }

        for field in seen.into_values() {
            merged.fields.push(field);
        }
        merged.rebuild_indices();
        merged.locked = self.locked || other.locked;
        Ok(merged)
    }

    /// Computes a deterministic 32 hex-character hash over
    /// `{mode, locked, sorted fields}`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if canonicalization fails.
    pub fn version_hash(&self) -> Result<String, HashError> {
        let mut sorted = self.fields.clone();
        sorted.sort_by(|a, b| a.normalized_name.cmp(&b.normalized_name));
        let shape = CheckpointShape {
            mode: self.mode,
            locked: self.locked,
            fields: sorted,
        };
        let digest = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &shape)?;
        Ok(digest.value[.. 32].to_string())
    }

    /// Serializes this contract to a checkpoint-safe representation carrying
    /// its own integrity hash.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if canonicalization fails.
    pub fn to_checkpoint_format(&self) -> Result<ContractCheckpoint, HashError> {
        let hash = self.version_hash()?;
        Ok(ContractCheckpoint {
            mode: self.mode,
            locked: self.locked,
            fields: self.fields.clone(),
            version_hash: hash,
        })
    }

    /// Restores a contract from a checkpoint, verifying its integrity hash.
    ///
    /// # Errors
    ///
    /// Returns [`ContractIntegrityError`] if the recomputed hash disagrees
    /// with the one recorded at checkpoint time, or [`HashError`] if
    /// recomputation itself fails.
    pub fn from_checkpoint(checkpoint: ContractCheckpoint) -> Result<Self, ContractIntegrityError> {
        let mut restored = Self::new(checkpoint.mode);
        restored.fields = checkpoint.fields;
        restored.locked = checkpoint.locked;
        restored.rebuild_indices();
        let recomputed = restored
            .version_hash()
            .map_err(|_| ContractIntegrityError {
                expected: checkpoint.version_hash.clone(),
                found: "<hash computation failed>".to_string(),
            })?;
        if recomputed != checkpoint.version_hash {
            return Err(ContractIntegrityError {
                expected: checkpoint.version_hash,
                found: recomputed,
            });
        }
        Ok(restored)
    }
}

/// Shape hashed by [`SchemaContract::version_hash`].
#[derive(Debug, Serialize)]
struct CheckpointShape {
    mode: SchemaMode,
    locked: bool,
    fields: Vec<FieldContract>,
}

/// Checkpoint-safe representation of a [`SchemaContract`], carrying its own
/// integrity hash for verification on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractCheckpoint {
    mode: SchemaMode,
    locked: bool,
    fields: Vec<FieldContract>,
    version_hash: String,
}

/// Returns whether `value`'s runtime shape matches `kind`.
fn value_matches_kind(value: &Value, kind: FieldKind) -> bool {
    match kind {
        FieldKind::Int => value.is_i64() || value.is_u64(),
        FieldKind::Float => value.is_f64() || value.is_i64() || value.is_u64(),
        FieldKind::Bool => value.is_boolean(),
        FieldKind::Str => value.is_string(),
        FieldKind::DateTime => value.is_string(),
        FieldKind::NoneType => value.is_null(),
        FieldKind::Any => true,
    }
}

// ============================================================================
// SECTION: PipelineRow
// ============================================================================

/// Immutable row snapshot paired with the contract that describes it.
///
/// Access by normalized or original name is O(1) via the contract's own
/// indices; mutation is not provided on this type by design (the reference
/// implementation's `PipelineRow.__setitem__` raises — here, there simply is
/// no setter. Callers that need a modified row construct a new one).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRow {
    data: BTreeMap<String, Value>,
    contract: SchemaContract,
}

impl PipelineRow {
    /// Creates a new pipeline row over `data`, described by `contract`.
    #[must_use]
    pub const fn new(data: BTreeMap<String, Value>, contract: SchemaContract) -> Self {
        Self {
            data,
            contract,
        }
    }

    /// Returns the contract describing this row.
    #[must_use]
    pub const fn contract(&self) -> &SchemaContract {
        &self.contract
    }

    /// Looks up a value by normalized or original field name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        let normalized = self.contract.resolve_name(key).ok()?;
        self.data.get(normalized).or_else(|| self.data.get(key))
    }

    /// Returns whether `key` (normalized or original) is present on the row.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the row's raw data as a plain map, keyed by whatever name each
    /// value was stored under.
    #[must_use]
    pub const fn to_dict(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Returns an iterator over the row's normalized field names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.contract.fields().iter().map(|field| field.normalized_name.as_str())
    }
}
