use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stable task identifier as issued by the study backend.
///
/// Opaque: the id is written back in the JSON kind it arrived as, so `7`
/// stays a number and `"007"` stays a string. Equality only looks at the text.
#[derive(Debug, Clone)]
pub struct TaskId {
    value: String,
    numeric: bool,
}

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into().trim().to_string(),
            numeric: false,
        }
    }

    pub fn as_str(&self) -> &str {
        self.value.as_str()
    }

    fn number(value: i64) -> Self {
        Self {
            value: value.to_string(),
            numeric: true,
        }
    }
}

impl PartialEq for TaskId {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for TaskId {}

impl Hash for TaskId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<i64> for TaskId {
    fn from(value: i64) -> Self {
        Self::number(value)
    }
}

impl From<i32> for TaskId {
    fn from(value: i32) -> Self {
        Self::number(i64::from(value))
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value.parse::<i64>() {
            Ok(number) if self.numeric => serializer.serialize_i64(number),
            _ => serializer.serialize_str(&self.value),
        }
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(number) => TaskId::number(number),
            RawId::Text(text) => TaskId::new(text),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum TaskType {
    #[default]
    Text,
    Image,
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("image") {
            TaskType::Image
        } else {
            TaskType::Text
        }
    }
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Text => "text",
            TaskType::Image => "image",
        }
    }
}

/// Row returned by the task-list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub instructions: String,
    pub description: Option<String>,
    pub task_type: TaskType,
}

pub const EMPTY_DESCRIPTION: &str = "No description provided.";

impl Task {
    pub fn new(id: impl Into<TaskId>, title: &str, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            instructions: String::new(),
            description: None,
            task_type,
        }
    }

    pub fn is_image_task(&self) -> bool {
        self.task_type == TaskType::Image
    }

    pub fn description(&self) -> &str {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(EMPTY_DESCRIPTION)
    }
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        let title = record
            .title
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("Task {}", record.id));
        Self {
            id: record.id,
            title,
            instructions: record.task.unwrap_or_default(),
            description: record.description,
            task_type: record.task_type,
        }
    }
}
