use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use taskweave_core::{FailureCause, SubtaskStatus, TaskweaveError, TaskweaveResult};

/// JSON key marking an input object as a symbolic reference.
pub const REF_KEY: &str = "$ref";

/// Segment that may prefix a reference path without changing its meaning.
const RESULT_SEGMENT: &str = "result";

/// A parsed `<producer_id>.<path>` reference.
///
/// The grammar is a dot-separated list of keys or array indices. A leading
/// `result` segment is elided, so `extract.result.rows` and `extract.rows`
/// address the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicRef {
    raw: String,
    producer: String,
    path: Vec<String>,
}

impl SymbolicRef {
    /// Parse a reference string.
    pub fn parse(raw: &str) -> TaskweaveResult<Self> {
        let mut segments = raw.split('.');
        let producer = segments.next().unwrap_or_default().trim();
        if producer.is_empty() {
            return Err(TaskweaveError::MalformedGraph(format!(
                "Reference '{raw}' has no producer id"
            )));
        }

        let mut path: Vec<String> = segments.map(str::to_string).collect();
        if path.iter().any(|s| s.is_empty()) {
            return Err(TaskweaveError::MalformedGraph(format!(
                "Reference '{raw}' contains an empty path segment"
            )));
        }
        if path.first().map(String::as_str) == Some(RESULT_SEGMENT) {
            path.remove(0);
        }

        Ok(Self {
            raw: raw.to_string(),
            producer: producer.to_string(),
            path,
        })
    }

    /// The reference exactly as written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Id of the subtask whose result is referenced.
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Path into the producer's result, with any leading `result` removed.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Walk the path through `result` and return a copy of the addressed value.
    pub fn resolve_against(&self, result: &Value) -> Result<Value, String> {
        let mut current = result;
        for segment in &self.path {
            current = match current {
                Value::Object(map) => map
                    .get(segment)
                    .ok_or_else(|| format!("key '{segment}' not found"))?,
                Value::Array(items) => {
                    let index: usize = segment
                        .parse()
                        .map_err(|_| format!("segment '{segment}' is not an array index"))?;
                    items.get(index).ok_or_else(|| {
                        format!("index {index} out of bounds (len {})", items.len())
                    })?
                }
                other => {
                    return Err(format!(
                        "cannot descend into {} with segment '{segment}'",
                        json_kind(other)
                    ))
                }
            };
        }
        Ok(current.clone())
    }
}

impl std::fmt::Display for SymbolicRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One subtask input: a literal value or a reference to an earlier result.
///
/// On the wire a reference is the object `{"$ref": "producer.path"}`; any
/// other JSON value is a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Literal(Value),
    Reference(SymbolicRef),
}

impl InputValue {
    /// Literal input.
    pub fn literal(value: impl Into<Value>) -> Self {
        InputValue::Literal(value.into())
    }

    /// Reference input. Fails on a malformed reference string.
    pub fn reference(raw: &str) -> TaskweaveResult<Self> {
        Ok(InputValue::Reference(SymbolicRef::parse(raw)?))
    }

    /// Interpret a JSON value using the `$ref` convention.
    pub fn from_json(value: Value) -> TaskweaveResult<Self> {
        if let Value::Object(map) = &value {
            if map.len() == 1 {
                if let Some(Value::String(raw)) = map.get(REF_KEY) {
                    return Self::reference(raw);
                }
            }
        }
        Ok(InputValue::Literal(value))
    }

    /// The reference, if this input is one.
    pub fn as_reference(&self) -> Option<&SymbolicRef> {
        match self {
            InputValue::Reference(r) => Some(r),
            InputValue::Literal(_) => None,
        }
    }
}

impl Serialize for InputValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            InputValue::Literal(value) => value.serialize(serializer),
            InputValue::Reference(reference) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REF_KEY, reference.raw())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for InputValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        InputValue::from_json(value).map_err(serde::de::Error::custom)
    }
}

/// A decomposed unit of work.
///
/// `depends_on` is derived: the producers referenced by `inputs` plus any
/// declared ordering edges, minus edges severed by cycle-breaking. It is
/// recomputed whenever one of those changes and cannot be set directly.
#[derive(Debug, Clone, Serialize)]
pub struct Subtask {
    pub id: String,
    pub capability: String,
    inputs: BTreeMap<String, InputValue>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    ordering: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    severed: BTreeSet<String>,
    depends_on: BTreeSet<String>,
    status: SubtaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<FailureCause>,
    attempt_count: u32,
}

impl Subtask {
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            inputs: BTreeMap::new(),
            ordering: BTreeSet::new(),
            severed: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            status: SubtaskStatus::Pending,
            result: None,
            error: None,
            attempt_count: 0,
        }
    }

    /// Add or replace one input.
    pub fn with_input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(name.into(), value);
        self.recompute_dependencies();
        self
    }

    /// Replace all inputs.
    pub fn with_inputs(mut self, inputs: BTreeMap<String, InputValue>) -> Self {
        self.inputs = inputs;
        self.recompute_dependencies();
        self
    }

    /// Declare an ordering edge on `dependency` without referencing its result.
    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.ordering.insert(dependency.into());
        self.recompute_dependencies();
        self
    }

    pub fn inputs(&self) -> &BTreeMap<String, InputValue> {
        &self.inputs
    }

    pub fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    /// Every symbolic reference among the inputs.
    pub fn references(&self) -> impl Iterator<Item = &SymbolicRef> {
        self.inputs.values().filter_map(InputValue::as_reference)
    }

    pub fn status(&self) -> SubtaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&FailureCause> {
        self.error.as_ref()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Move to a non-terminal state.
    pub fn transition(&mut self, status: SubtaskStatus) {
        self.status = status;
    }

    /// Terminal success. Clears any previous error.
    pub fn complete(&mut self, result: Value) {
        self.status = SubtaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
    }

    /// Terminal failure. Clears any previous result.
    pub fn fail(&mut self, cause: FailureCause) {
        self.status = SubtaskStatus::Failed;
        self.error = Some(cause);
        self.result = None;
    }

    pub(crate) fn set_attempt_count(&mut self, attempts: u32) {
        self.attempt_count = attempts;
    }

    /// Drop the edge on `producer`. References to it stay in `inputs` and
    /// will fail resolution.
    pub(crate) fn sever(&mut self, producer: &str) {
        self.severed.insert(producer.to_string());
        self.recompute_dependencies();
    }

    fn recompute_dependencies(&mut self) {
        let referenced = self
            .inputs
            .values()
            .filter_map(InputValue::as_reference)
            .map(|r| r.producer().to_string());
        self.depends_on = referenced
            .chain(self.ordering.iter().cloned())
            .filter(|dep| !self.severed.contains(dep))
            .collect();
    }
}
