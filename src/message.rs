//! Request/response messages exchanged between clients and coordinators.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CallError;

/// Reserved method name for the prepare phase.
pub const METHOD_PREPARE: &str = "__PREPARE__";
/// Reserved method name for the commit phase.
pub const METHOD_COMMIT: &str = "__COMMIT__";
/// Reserved method name for rollback.
pub const METHOD_ROLLBACK: &str = "__ROLLBACK__";

/// Length of generated request ids.
pub const REQUEST_ID_LEN: usize = 12;

/// Generate a short request id: the trailing characters of a UUID v4.
pub fn new_request_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[id.len() - REQUEST_ID_LEN..].to_string()
}

/// Identity of a stateful operator instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperatorKey {
    pub type_name: String,
    pub instance_id: String,
}

impl OperatorKey {
    pub fn new(type_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for OperatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.type_name, self.instance_id)
    }
}

/// Commit protocol control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Prepare,
    Commit,
    Rollback,
}

impl Control {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Prepare => METHOD_PREPARE,
            Self::Commit => METHOD_COMMIT,
            Self::Rollback => METHOD_ROLLBACK,
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        match method {
            METHOD_PREPARE => Some(Self::Prepare),
            METHOD_COMMIT => Some(Self::Commit),
            METHOD_ROLLBACK => Some(Self::Rollback),
            _ => None,
        }
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method())
    }
}

/// Operators touched by a transaction, grouped by type name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvolvedOperators(BTreeMap<String, BTreeSet<String>>);

impl InvolvedOperators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operator. Returns `true` if it was not present yet.
    pub fn insert(&mut self, key: &OperatorKey) -> bool {
        self.0
            .entry(key.type_name.clone())
            .or_default()
            .insert(key.instance_id.clone())
    }

    /// Add every operator of `other`. Never removes entries.
    pub fn merge(&mut self, other: &InvolvedOperators) {
        for (type_name, ids) in &other.0 {
            self.0
                .entry(type_name.clone())
                .or_default()
                .extend(ids.iter().cloned());
        }
    }

    pub fn contains(&self, key: &OperatorKey) -> bool {
        self.0
            .get(&key.type_name)
            .is_some_and(|ids| ids.contains(&key.instance_id))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> impl Iterator<Item = OperatorKey> + '_ {
        self.0.iter().flat_map(|(type_name, ids)| {
            ids.iter()
                .map(move |id| OperatorKey::new(type_name.clone(), id.clone()))
        })
    }
}

/// Inbound request for an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub transaction_id: String,
    pub request_id: String,
    pub type_name: String,
    pub instance_id: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<u8>,
    /// Operators currently executing above this call in the same transaction.
    #[serde(default)]
    pub trail: Vec<OperatorKey>,
    /// Remaining deadline of the caller, if any.
    #[serde(default)]
    pub budget_ms: Option<u64>,
}

impl Request {
    /// Build a business call. Ids are assigned by the client at send time.
    pub fn call(
        type_name: impl Into<String>,
        instance_id: impl Into<String>,
        method: impl Into<String>,
        args: Vec<u8>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            instance_id: instance_id.into(),
            method: method.into(),
            args,
            ..Default::default()
        }
    }

    /// Build a control message for `key` within `transaction_id`.
    pub fn control(control: Control, key: &OperatorKey, transaction_id: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            type_name: key.type_name.clone(),
            instance_id: key.instance_id.clone(),
            method: control.method().to_string(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> OperatorKey {
        OperatorKey::new(self.type_name.clone(), self.instance_id.clone())
    }

    pub fn as_control(&self) -> Option<Control> {
        Control::parse(&self.method)
    }

    /// The outermost request of a transaction carries the transaction's id.
    pub fn is_root(&self) -> bool {
        self.transaction_id == self.request_id
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget_ms.map(Duration::from_millis)
    }

    /// Build the response to this request.
    pub fn respond(
        &self,
        involved: InvolvedOperators,
        result: std::result::Result<Vec<u8>, CallError>,
    ) -> Response {
        let (values, error) = match result {
            Ok(values) => (values, None),
            Err(err) => (Vec::new(), Some(err)),
        };
        Response {
            request_id: self.request_id.clone(),
            involved,
            values,
            error,
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}({}).{}",
            self.transaction_id, self.request_id, self.type_name, self.instance_id, self.method
        )
    }
}

/// Outbound response correlated to a request by `request_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    #[serde(default)]
    pub involved: InvolvedOperators,
    #[serde(default)]
    pub values: Vec<u8>,
    #[serde(default)]
    pub error: Option<CallError>,
}

impl Response {
    pub fn into_result(self) -> std::result::Result<Vec<u8>, CallError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.values),
        }
    }
}
