use serde::{
  Deserialize,
  Serialize
};

pub type TaskId = i64;

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskDto {
  pub id:               TaskId,
  pub title:            String,
  pub task_time:        Option<String>,
  pub recurrence_type:  String,
  #[serde(default)]
  pub recurrence_value: Option<String>,
  pub reset_time:       Option<String>,
  pub created_at:       String
}

/// A task as it appears on one calendar day.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskViewDto {
  #[serde(flatten)]
  pub task:            TaskDto,
  pub completed:       bool,
  pub completion_date: String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct TaskCreate {
  pub title:            String,
  pub recurrence_type:  String,
  #[serde(default)]
  pub recurrence_value: Option<String>,
  #[serde(default)]
  pub task_time:        Option<String>,
  #[serde(default)]
  pub reset_time:       Option<String>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct TasksForDateArgs {
  pub date: String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct TaskIdArg {
  pub task_id: TaskId
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct TaskToggleArgs {
  pub task_id: TaskId,
  pub date:    String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct TitleSuggestArgs {
  pub query: String
}
