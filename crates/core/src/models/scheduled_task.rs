use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务定义，由迁移或配置写入，运行期只读
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    /// 负责执行该任务的下游组件
    pub component: String,
    pub depends_on: Vec<i64>,
    pub is_active: bool,
    /// 下发给执行方的默认参数
    pub parameters: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn new(id: i64, name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            component: component.into(),
            depends_on: Vec::new(),
            is_active: true,
            parameters: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<i64>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn has_dependencies(&self) -> bool {
        !self.depends_on.is_empty()
    }
}
