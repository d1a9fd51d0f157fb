//! Command model.
//!
//! An [`Operation`] is the wire-independent record a translator builds at
//! ingress. It travels through the consensus log as a JSON record:
//!
//! ```text
//! {"kind": <u8 tag>, "targets": ["name", ...], "values": [u32, ...]}
//! ```
//!
//! `kind` and `targets` are required, `values` defaults to empty, and
//! unknown fields are ignored. At the state-machine boundary the record is
//! decoded once and converted into a [`Command`], whose variants carry
//! exactly the fields their kind needs. That conversion is the only place
//! target and value counts are checked.

use crate::core::error::{BasaltError, BasaltResult};
use serde::{Deserialize, Serialize};

/// Operation kind. Tags are stable and appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpKind {
    Add = 0,
    AddMany = 1,
    Remove = 2,
    Drop = 3,
    Clear = 4,
    Exists = 5,
    Card = 6,
    Inter = 7,
    InterStore = 8,
    Union = 9,
    UnionStore = 10,
    Xor = 11,
    XorStore = 12,
    Diff = 13,
    DiffStore = 14,
}

/// Whether a kind goes through propose or through linearizable read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Write,
    Read,
}

impl OpKind {
    /// Every kind in tag order.
    pub const ALL: [OpKind; 15] = [
        OpKind::Add,
        OpKind::AddMany,
        OpKind::Remove,
        OpKind::Drop,
        OpKind::Clear,
        OpKind::Exists,
        OpKind::Card,
        OpKind::Inter,
        OpKind::InterStore,
        OpKind::Union,
        OpKind::UnionStore,
        OpKind::Xor,
        OpKind::XorStore,
        OpKind::Diff,
        OpKind::DiffStore,
    ];

    /// Look up a kind by wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Write or read classification.
    pub fn class(self) -> OpClass {
        match self {
            OpKind::Exists | OpKind::Card | OpKind::Inter | OpKind::Union | OpKind::Xor
            | OpKind::Diff => OpClass::Read,
            _ => OpClass::Write,
        }
    }

    /// Binary RPC method name, without the service prefix.
    pub fn method(self) -> &'static str {
        match self {
            OpKind::Add => "Add",
            OpKind::AddMany => "AddMany",
            OpKind::Remove => "Remove",
            OpKind::Drop => "RemoveBitmap",
            OpKind::Clear => "ClearBitmap",
            OpKind::Exists => "Exists",
            OpKind::Card => "Card",
            OpKind::Inter => "Inter",
            OpKind::InterStore => "InterStore",
            OpKind::Union => "Union",
            OpKind::UnionStore => "UnionStore",
            OpKind::Xor => "Xor",
            OpKind::XorStore => "XorStore",
            OpKind::Diff => "Diff",
            OpKind::DiffStore => "DiffStore",
        }
    }

    /// Look up a kind by RPC method name.
    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.method() == method)
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// JSON record as it appears in the log.
#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    kind: u8,
    targets: Vec<String>,
    #[serde(default)]
    values: Vec<u32>,
}

/// Untyped operation: a kind with its raw targets and values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub targets: Vec<String>,
    pub values: Vec<u32>,
}

impl Operation {
    /// Create an operation.
    pub fn new(kind: OpKind, targets: Vec<String>, values: Vec<u32>) -> Self {
        Self {
            kind,
            targets,
            values,
        }
    }

    /// Encode as a wire record.
    pub fn encode(&self) -> BasaltResult<Vec<u8>> {
        let record = WireRecord {
            kind: self.kind.tag(),
            targets: self.targets.clone(),
            values: self.values.clone(),
        };
        serde_json::to_vec(&record)
            .map_err(|e| BasaltError::internal(format!("encode operation: {}", e)))
    }

    /// Decode a wire record.
    pub fn decode(bytes: &[u8]) -> BasaltResult<Self> {
        let record: WireRecord = serde_json::from_slice(bytes)
            .map_err(|e| BasaltError::malformed(format!("decode failed: {}", e)))?;
        let kind = OpKind::from_tag(record.kind)
            .ok_or_else(|| BasaltError::unsupported(format!("unknown kind tag {}", record.kind)))?;
        Ok(Self {
            kind,
            targets: record.targets,
            values: record.values,
        })
    }

    /// Convert into a typed command, checking target and value counts.
    pub fn into_command(self) -> BasaltResult<Command> {
        Command::try_from(self)
    }
}

/// Typed, validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { name: String, value: u32 },
    AddMany { name: String, values: Vec<u32> },
    Remove { name: String, value: u32 },
    Drop { name: String },
    Clear { name: String },
    Exists { name: String, value: u32 },
    Card { name: String },
    Inter { names: Vec<String> },
    InterStore { dest: String, names: Vec<String> },
    Union { names: Vec<String> },
    UnionStore { dest: String, names: Vec<String> },
    Xor { left: String, right: String },
    XorStore { dest: String, left: String, right: String },
    Diff { left: String, right: String },
    DiffStore { dest: String, left: String, right: String },
}

fn count_mismatch(op: &Operation) -> BasaltError {
    BasaltError::malformed(format!(
        "{} does not accept {} target(s) and {} value(s)",
        op.kind,
        op.targets.len(),
        op.values.len()
    ))
}

impl TryFrom<Operation> for Command {
    type Error = BasaltError;

    fn try_from(op: Operation) -> BasaltResult<Command> {
        let command = match (op.kind, op.targets.as_slice(), op.values.as_slice()) {
            (OpKind::Add, [name], [value]) => Command::Add {
                name: name.clone(),
                value: *value,
            },
            (OpKind::AddMany, [name], values) if !values.is_empty() => Command::AddMany {
                name: name.clone(),
                values: values.to_vec(),
            },
            (OpKind::Remove, [name], [value]) => Command::Remove {
                name: name.clone(),
                value: *value,
            },
            (OpKind::Drop, [name], []) => Command::Drop { name: name.clone() },
            (OpKind::Clear, [name], []) => Command::Clear { name: name.clone() },
            (OpKind::Exists, [name], [value]) => Command::Exists {
                name: name.clone(),
                value: *value,
            },
            (OpKind::Card, [name], []) => Command::Card { name: name.clone() },
            (OpKind::Inter, names, []) if names.len() >= 2 => Command::Inter {
                names: names.to_vec(),
            },
            (OpKind::Union, names, []) if names.len() >= 2 => Command::Union {
                names: names.to_vec(),
            },
            (OpKind::InterStore, [dest, names @ ..], []) if names.len() >= 2 => {
                Command::InterStore {
                    dest: dest.clone(),
                    names: names.to_vec(),
                }
            }
            (OpKind::UnionStore, [dest, names @ ..], []) if names.len() >= 2 => {
                Command::UnionStore {
                    dest: dest.clone(),
                    names: names.to_vec(),
                }
            }
            (OpKind::Xor, [left, right], []) => Command::Xor {
                left: left.clone(),
                right: right.clone(),
            },
            (OpKind::Diff, [left, right], []) => Command::Diff {
                left: left.clone(),
                right: right.clone(),
            },
            (OpKind::XorStore, [dest, left, right], []) => Command::XorStore {
                dest: dest.clone(),
                left: left.clone(),
                right: right.clone(),
            },
            (OpKind::DiffStore, [dest, left, right], []) => Command::DiffStore {
                dest: dest.clone(),
                left: left.clone(),
                right: right.clone(),
            },
            _ => return Err(count_mismatch(&op)),
        };
        Ok(command)
    }
}

impl Command {
    /// Kind of this command.
    pub fn kind(&self) -> OpKind {
        match self {
            Command::Add { .. } => OpKind::Add,
            Command::AddMany { .. } => OpKind::AddMany,
            Command::Remove { .. } => OpKind::Remove,
            Command::Drop { .. } => OpKind::Drop,
            Command::Clear { .. } => OpKind::Clear,
            Command::Exists { .. } => OpKind::Exists,
            Command::Card { .. } => OpKind::Card,
            Command::Inter { .. } => OpKind::Inter,
            Command::InterStore { .. } => OpKind::InterStore,
            Command::Union { .. } => OpKind::Union,
            Command::UnionStore { .. } => OpKind::UnionStore,
            Command::Xor { .. } => OpKind::Xor,
            Command::XorStore { .. } => OpKind::XorStore,
            Command::Diff { .. } => OpKind::Diff,
            Command::DiffStore { .. } => OpKind::DiffStore,
        }
    }

    /// Write or read classification.
    pub fn class(&self) -> OpClass {
        self.kind().class()
    }

    /// Flatten back into an untyped operation.
    pub fn to_operation(&self) -> Operation {
        let kind = self.kind();
        let (targets, values) = match self {
            Command::Add { name, value }
            | Command::Remove { name, value }
            | Command::Exists { name, value } => (vec![name.clone()], vec![*value]),
            Command::AddMany { name, values } => (vec![name.clone()], values.clone()),
            Command::Drop { name } | Command::Clear { name } | Command::Card { name } => {
                (vec![name.clone()], Vec::new())
            }
            Command::Inter { names } | Command::Union { names } => (names.clone(), Vec::new()),
            Command::InterStore { dest, names } | Command::UnionStore { dest, names } => {
                let mut targets = Vec::with_capacity(names.len() + 1);
                targets.push(dest.clone());
                targets.extend(names.iter().cloned());
                (targets, Vec::new())
            }
            Command::Xor { left, right } | Command::Diff { left, right } => {
                (vec![left.clone(), right.clone()], Vec::new())
            }
            Command::XorStore { dest, left, right } | Command::DiffStore { dest, left, right } => {
                (vec![dest.clone(), left.clone(), right.clone()], Vec::new())
            }
        };
        Operation::new(kind, targets, values)
    }

    /// Encode as a wire record.
    pub fn encode(&self) -> BasaltResult<Vec<u8>> {
        self.to_operation().encode()
    }

    /// Decode and validate a wire record.
    pub fn decode(bytes: &[u8]) -> BasaltResult<Self> {
        Operation::decode(bytes)?.into_command()
    }
}

/// Typed result of a read command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Membership answer.
    Bool(bool),
    /// Cardinality.
    Count(u64),
    /// Ascending, deduplicated values.
    Values(Vec<u32>),
}

impl QueryResult {
    /// Resolve as a membership answer.
    pub fn into_bool(self) -> BasaltResult<bool> {
        match self {
            QueryResult::Bool(b) => Ok(b),
            other => Err(unexpected("bool", &other)),
        }
    }

    /// Resolve as a cardinality.
    pub fn into_count(self) -> BasaltResult<u64> {
        match self {
            QueryResult::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }

    /// Resolve as a value list.
    pub fn into_values(self) -> BasaltResult<Vec<u32>> {
        match self {
            QueryResult::Values(v) => Ok(v),
            other => Err(unexpected("values", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &QueryResult) -> BasaltError {
    BasaltError::internal(format!("expected {} result, got {:?}", wanted, got))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: OpKind, targets: &[&str], values: &[u32]) -> Operation {
        Operation::new(
            kind,
            targets.iter().map(|s| s.to_string()).collect(),
            values.to_vec(),
        )
    }

    #[test]
    fn test_tags_are_stable() {
        for (i, kind) in OpKind::ALL.iter().enumerate() {
            assert_eq!(kind.tag() as usize, i);
            assert_eq!(OpKind::from_tag(i as u8), Some(*kind));
        }
        assert_eq!(OpKind::from_tag(15), None);
        assert_eq!(OpKind::DiffStore.tag(), 14);
    }

    #[test]
    fn test_classes() {
        let reads: Vec<OpKind> = OpKind::ALL
            .iter()
            .copied()
            .filter(|k| k.class() == OpClass::Read)
            .collect();
        assert_eq!(
            reads,
            vec![
                OpKind::Exists,
                OpKind::Card,
                OpKind::Inter,
                OpKind::Union,
                OpKind::Xor,
                OpKind::Diff
            ]
        );
    }

    #[test]
    fn test_method_lookup() {
        assert_eq!(OpKind::from_method("RemoveBitmap"), Some(OpKind::Drop));
        assert_eq!(OpKind::from_method("ClearBitmap"), Some(OpKind::Clear));
        assert_eq!(OpKind::from_method("Drop"), None);
    }

    #[test]
    fn test_wire_record_roundtrip() {
        let original = op(OpKind::InterStore, &["dst", "a", "b", "c"], &[]);
        let bytes = original.encode().unwrap();
        assert_eq!(Operation::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn test_values_default_and_unknown_fields() {
        let decoded =
            Operation::decode(br#"{"kind":3,"targets":["x"],"extra":"ignored"}"#).unwrap();
        assert_eq!(decoded, op(OpKind::Drop, &["x"], &[]));
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let err = Operation::decode(br#"{"kind":0,"values":[1]}"#).unwrap_err();
        assert!(matches!(err, BasaltError::MalformedCommand { .. }));

        let err = Operation::decode(b"not json").unwrap_err();
        assert!(matches!(err, BasaltError::MalformedCommand { .. }));
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let err = Operation::decode(br#"{"kind":99,"targets":["x"]}"#).unwrap_err();
        assert!(matches!(err, BasaltError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_count_mismatches() {
        let bad = [
            op(OpKind::Add, &["a"], &[]),
            op(OpKind::Add, &["a", "b"], &[1]),
            op(OpKind::Add, &["a"], &[1, 2]),
            op(OpKind::AddMany, &["a"], &[]),
            op(OpKind::Drop, &[], &[]),
            op(OpKind::Card, &["a"], &[1]),
            op(OpKind::Inter, &["a"], &[]),
            op(OpKind::Union, &[], &[]),
            op(OpKind::Xor, &["a", "b", "c"], &[]),
            op(OpKind::Diff, &["a"], &[]),
            op(OpKind::InterStore, &["d", "a"], &[]),
            op(OpKind::XorStore, &["d", "a"], &[]),
            op(OpKind::DiffStore, &["d", "a", "b", "c"], &[]),
        ];
        for o in bad {
            let err = o.clone().into_command().unwrap_err();
            assert!(
                matches!(err, BasaltError::MalformedCommand { .. }),
                "{:?} -> {:?}",
                o,
                err
            );
        }
    }

    #[test]
    fn test_store_destination_is_first_target() {
        let cmd = op(OpKind::UnionStore, &["d", "a", "b", "c"], &[])
            .into_command()
            .unwrap();
        assert_eq!(
            cmd,
            Command::UnionStore {
                dest: "d".into(),
                names: vec!["a".into(), "b".into(), "c".into()]
            }
        );
        assert_eq!(cmd.to_operation().targets, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn test_query_result_json_shapes() {
        assert_eq!(serde_json::to_string(&QueryResult::Bool(true)).unwrap(), "true");
        assert_eq!(serde_json::to_string(&QueryResult::Count(4)).unwrap(), "4");
        assert_eq!(
            serde_json::to_string(&QueryResult::Values(vec![2, 3])).unwrap(),
            "[2,3]"
        );
        assert!(QueryResult::Count(1).into_bool().is_err());
    }
}
