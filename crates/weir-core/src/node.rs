use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a blob in the resource store.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    /// Allocate a fresh identifier.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique node identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Created,
    Ready,
    Running,
    Success,
    Failed,
    Deprecated,
    MandatoryDeprecated,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Created => "CREATED",
            NodeStatus::Ready => "READY",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Success => "SUCCESS",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Deprecated => "DEPRECATED",
            NodeStatus::MandatoryDeprecated => "MANDATORY_DEPRECATED",
        };
        write!(f, "{}", s)
    }
}

/// File type tags accepted by input/output slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    File,
    Executable,
    Directory,
    CloudStorage,
}

/// ENUM parameter payload: candidate list plus selected index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumValue {
    pub values: Vec<String>,
    pub index: i64,
}

/// CODE parameter payload: the code text plus an editor mode hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeValue {
    pub value: String,
    #[serde(default)]
    pub mode: String,
}

/// Typed parameter value: one variant per parameter type tag.
///
/// An unknown tag fails at deserialization; execution code matches
/// exhaustively and never sees an unrecognized type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "parameter_type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterValue {
    Text(String),
    Bool(bool),
    Int(i64),
    Enum(EnumValue),
    ListStr(Vec<String>),
    ListInt(Vec<i64>),
    Code(CodeValue),
}

/// A named, typed parameter of a node.
///
/// The mutability/visibility flags belong to the surrounding editor; the
/// engine only reads the effective value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(flatten)]
    pub value: ParameterValue,
    #[serde(default)]
    pub mutable_type: bool,
    #[serde(default)]
    pub publicable: bool,
    #[serde(default)]
    pub removable: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: ParameterValue) -> Self {
        Self {
            name: name.into(),
            value,
            mutable_type: false,
            publicable: false,
            removable: false,
        }
    }
}

/// A bound input value referencing a stored resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputValue {
    pub resource_id: ResourceId,
}

/// A typed input slot with cardinality bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub name: String,
    pub file_types: Vec<FileType>,
    #[serde(default = "default_count")]
    pub min_count: usize,
    #[serde(default = "default_count")]
    pub max_count: usize,
    #[serde(default)]
    pub values: Vec<InputValue>,
}

impl Input {
    /// Single-cardinality inputs materialize to a scalar path.
    pub fn is_single(&self) -> bool {
        self.min_count == 1 && self.max_count == 1
    }

    pub fn accepts(&self, file_type: FileType) -> bool {
        self.file_types.contains(&file_type)
    }
}

fn default_count() -> usize {
    1
}

/// A declared output or log slot.
///
/// `resource_id` stays null until collection after an execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub file_type: FileType,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
}

impl Output {
    pub fn new(name: impl Into<String>, file_type: FileType) -> Self {
        Self {
            name: name.into(),
            file_type,
            resource_id: None,
        }
    }
}

/// Names of the three standard log slots every command node carries.
pub const LOG_STDOUT: &str = "stdout";
pub const LOG_STDERR: &str = "stderr";
pub const LOG_WORKER: &str = "worker";

/// The parameter holding the command body of a command node.
pub const PARAM_CMD: &str = "cmd";

/// A graph vertex describing one unit of declarative work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: NodeId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub base_node_name: String,
    pub node_status: NodeStatus,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub insertion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub logs: Vec<Output>,
}

impl Node {
    pub fn new(title: impl Into<String>, base_node_name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            title: title.into(),
            description: String::new(),
            base_node_name: base_node_name.into(),
            node_status: NodeStatus::Created,
            public: false,
            author: None,
            starred: false,
            insertion_date: Some(Utc::now()),
            update_date: Some(Utc::now()),
            parameters: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            logs: Vec::new(),
        }
    }

    /// The canonical fresh node for the bash-command executor kind:
    /// a `cmd` TEXT parameter, a `cacheable` BOOL, and the three standard
    /// log slots.
    pub fn default_command_node() -> Self {
        let mut node = Self::new("", "command");
        node.parameters = vec![
            Parameter::new(PARAM_CMD, ParameterValue::Text("bash -c \" \"".to_string())),
            Parameter::new("cacheable", ParameterValue::Bool(true)),
        ];
        node.logs = vec![
            Output::new(LOG_STDERR, FileType::File),
            Output::new(LOG_STDOUT, FileType::File),
            Output::new(LOG_WORKER, FileType::File),
        ];
        node
    }

    pub fn get_parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn get_output_by_name_mut(&mut self, name: &str) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|o| o.name == name)
    }

    pub fn get_log_by_name_mut(&mut self, name: &str) -> Option<&mut Output> {
        self.logs.iter_mut().find(|l| l.name == name)
    }

    /// Clone this node into a fresh run instance.
    ///
    /// The run gets its own identity and empty resource bindings; the
    /// original is untouched.
    pub fn clone_as_run(&self) -> Node {
        let mut run = self.clone();
        run.id = NodeId::new();
        run.insertion_date = Some(Utc::now());
        run.update_date = Some(Utc::now());
        for output in run.outputs.iter_mut().chain(run.logs.iter_mut()) {
            output.resource_id = None;
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_value_json_tagging() {
        let param = Parameter::new(
            "threads",
            ParameterValue::Enum(EnumValue {
                values: vec!["1".into(), "4".into(), "16".into()],
                index: 1,
            }),
        );

        let json = serde_json::to_value(&param).unwrap();
        assert_eq!(json["parameter_type"], "ENUM");
        assert_eq!(json["value"]["index"], 1);

        let back: Parameter = serde_json::from_value(json).unwrap();
        match back.value {
            ParameterValue::Enum(e) => assert_eq!(e.values.len(), 3),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_parameter_type_rejected() {
        let json = serde_json::json!({
            "name": "x",
            "parameter_type": "TUPLE",
            "value": [1, 2],
        });
        assert!(serde_json::from_value::<Parameter>(json).is_err());
    }

    #[test]
    fn test_file_type_wire_names() {
        assert_eq!(
            serde_json::to_value(FileType::CloudStorage).unwrap(),
            serde_json::json!("CLOUD_STORAGE")
        );
        assert_eq!(
            serde_json::to_value(NodeStatus::MandatoryDeprecated).unwrap(),
            serde_json::json!("MANDATORY_DEPRECATED")
        );
    }

    #[test]
    fn test_default_command_node_shape() {
        let node = Node::default_command_node();
        assert_eq!(node.node_status, NodeStatus::Created);
        assert!(node.get_parameter(PARAM_CMD).is_some());
        assert_eq!(node.logs.len(), 3);
        assert!(node.logs.iter().all(|l| l.resource_id.is_none()));
    }

    #[test]
    fn test_clone_as_run_resets_bindings() {
        let mut node = Node::default_command_node();
        node.outputs.push(Output {
            name: "out".into(),
            file_type: FileType::File,
            resource_id: Some(ResourceId::fresh()),
        });

        let run = node.clone_as_run();
        assert_ne!(run.id, node.id);
        assert!(run.outputs[0].resource_id.is_none());
        assert!(node.outputs[0].resource_id.is_some());
    }

    #[test]
    fn test_node_document_round_trip() {
        let mut node = Node::default_command_node();
        node.title = "count lines".into();
        node.inputs.push(Input {
            name: "corpus".into(),
            file_types: vec![FileType::File],
            min_count: 1,
            max_count: 1,
            values: vec![InputValue {
                resource_id: ResourceId("abc123".into()),
            }],
        });

        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back.title, "count lines");
        assert_eq!(back.inputs[0].values[0].resource_id.as_str(), "abc123");
    }
}
