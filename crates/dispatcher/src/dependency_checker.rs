use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use scheduler_core::{
    models::{ExecutionStatus, ScheduledTask},
    traits::{ScheduledTaskRepository, TaskExecutionRepository},
    SchedulerError, SchedulerResult,
};

/// 任务依赖图，启动时从任务定义构建，运行期只读
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    tasks: HashMap<i64, ScheduledTask>,
    /// 被依赖任务 -> 依赖它的任务
    dependents: HashMap<i64, Vec<i64>>,
}

impl DependencyGraph {
    /// 构建依赖图。引用不存在的任务或存在环都属于配置错误。
    pub fn build(tasks: Vec<ScheduledTask>) -> SchedulerResult<Self> {
        let tasks: HashMap<i64, ScheduledTask> = tasks.into_iter().map(|t| (t.id, t)).collect();
        let mut dependents: HashMap<i64, Vec<i64>> = HashMap::new();

        for task in tasks.values() {
            for dep in &task.depends_on {
                if !tasks.contains_key(dep) {
                    return Err(SchedulerError::Configuration(format!(
                        "任务 {} 依赖不存在的任务 {}",
                        task.id, dep
                    )));
                }
                dependents.entry(*dep).or_default().push(task.id);
            }
        }
        for list in dependents.values_mut() {
            list.sort_unstable();
            list.dedup();
        }

        let graph = Self { tasks, dependents };
        let cycle = graph.find_cycle_members();
        if !cycle.is_empty() {
            return Err(SchedulerError::CircularDependency(cycle));
        }

        info!("依赖图构建完成，共 {} 个任务", graph.tasks.len());
        Ok(graph)
    }

    pub async fn load(task_repo: &dyn ScheduledTaskRepository) -> SchedulerResult<Self> {
        Self::build(task_repo.get_all().await?)
    }

    /// Kahn 拓扑排序后仍未处理的节点，即位于环上或依赖环的任务
    fn find_cycle_members(&self) -> Vec<i64> {
        let mut in_degree: HashMap<i64, usize> = self
            .tasks
            .values()
            .map(|t| (t.id, t.depends_on.iter().collect::<HashSet<_>>().len()))
            .collect();
        let mut queue: VecDeque<i64> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        while let Some(node) = queue.pop_front() {
            for dependent in self.dependents_of(node) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
            in_degree.remove(&node);
        }

        let mut remaining: Vec<i64> = in_degree.into_keys().collect();
        remaining.sort_unstable();
        remaining
    }

    pub fn task(&self, id: i64) -> Option<&ScheduledTask> {
        self.tasks.get(&id)
    }

    pub fn dependencies_of(&self, id: i64) -> &[i64] {
        self.tasks
            .get(&id)
            .map(|t| t.depends_on.as_slice())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, id: i64) -> &[i64] {
        self.dependents
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 所有直接与间接依赖，按ID排序
    pub fn transitive_dependencies(&self, id: i64) -> Vec<i64> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<i64> = self.dependencies_of(id).iter().copied().collect();
        while let Some(dep) = queue.pop_front() {
            if visited.insert(dep) {
                queue.extend(self.dependencies_of(dep).iter().copied());
            }
        }
        visited.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheckResult {
    pub can_execute: bool,
    pub blocking_dependencies: Vec<i64>,
}

/// 基于账本判断某任务在某逻辑日期的依赖是否全部成功
pub struct DependencyChecker {
    graph: Arc<DependencyGraph>,
    execution_repo: Arc<dyn TaskExecutionRepository>,
}

impl DependencyChecker {
    pub fn new(graph: Arc<DependencyGraph>, execution_repo: Arc<dyn TaskExecutionRepository>) -> Self {
        Self {
            graph,
            execution_repo,
        }
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub async fn check_dependencies(
        &self,
        task_id: i64,
        execution_date: DateTime<Utc>,
    ) -> SchedulerResult<DependencyCheckResult> {
        let mut blocking = Vec::new();

        for &dep_id in self.graph.dependencies_of(task_id) {
            if self.graph.task(dep_id).is_some_and(|dep| !dep.is_active) {
                debug!("依赖任务 {} 已停用，视为满足", dep_id);
                continue;
            }
            if !self.check_single_dependency(dep_id, execution_date).await? {
                blocking.push(dep_id);
            }
        }

        Ok(DependencyCheckResult {
            can_execute: blocking.is_empty(),
            blocking_dependencies: blocking,
        })
    }

    async fn check_single_dependency(
        &self,
        dep_task_id: i64,
        execution_date: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let executions = self
            .execution_repo
            .find_by_task_and_date(dep_task_id, execution_date)
            .await?;
        let succeeded = executions
            .iter()
            .any(|e| e.status == ExecutionStatus::Succeeded);

        if !succeeded {
            debug!(
                "依赖任务 {} 在 {} 没有成功的执行，不满足依赖条件",
                dep_task_id, execution_date
            );
        }
        Ok(succeeded)
    }

    /// 依赖未满足时返回 `DependencyUnsatisfied`
    pub async fn ensure_satisfied(
        &self,
        task_id: i64,
        execution_date: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let result = self.check_dependencies(task_id, execution_date).await?;
        if result.can_execute {
            Ok(())
        } else {
            Err(SchedulerError::DependencyUnsatisfied {
                task_id,
                blocking: result.blocking_dependencies,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_testing_utils::{reference_time, MockTaskExecutionRepository, TaskExecutionBuilder};

    fn task(id: i64, deps: Vec<i64>) -> ScheduledTask {
        ScheduledTask::new(id, format!("task_{id}"), "settlement").with_dependencies(deps)
    }

    #[test]
    fn test_build_graph_and_dependents() {
        let graph = DependencyGraph::build(vec![
            task(1, vec![]),
            task(3, vec![1]),
            task(7, vec![3]),
            task(8, vec![3, 1]),
        ])
        .unwrap();

        assert_eq!(graph.dependents_of(3), &[7, 8]);
        assert_eq!(graph.dependencies_of(8), &[3, 1]);
        assert_eq!(graph.transitive_dependencies(7), vec![1, 3]);
        assert!(graph.dependents_of(7).is_empty());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = DependencyGraph::build(vec![
            task(1, vec![]),
            task(2, vec![4]),
            task(3, vec![2]),
            task(4, vec![3]),
        ])
        .unwrap_err();

        match err {
            SchedulerError::CircularDependency(ids) => assert_eq!(ids, vec![2, 3, 4]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = DependencyGraph::build(vec![task(5, vec![5])]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_dependency_is_configuration_error() {
        let err = DependencyGraph::build(vec![task(7, vec![99])]).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }

    fn checker(
        tasks: Vec<ScheduledTask>,
        executions: &MockTaskExecutionRepository,
    ) -> DependencyChecker {
        let graph = Arc::new(DependencyGraph::build(tasks).unwrap());
        DependencyChecker::new(graph, Arc::new(executions.clone()))
    }

    #[tokio::test]
    async fn test_partial_success_blocks_on_remaining_dependencies() {
        let date = reference_time();
        let executions = MockTaskExecutionRepository::new();
        executions.insert(TaskExecutionBuilder::new(1, 11, date).succeeded().build());
        executions.insert(TaskExecutionBuilder::new(2, 12, date).failed().build());
        let checker = checker(
            vec![task(1, vec![]), task(2, vec![]), task(3, vec![]), task(4, vec![1, 2, 3])],
            &executions,
        );

        let result = checker.check_dependencies(4, date).await.unwrap();
        assert!(!result.can_execute);
        assert_eq!(result.blocking_dependencies, vec![2, 3]);

        let err = checker.ensure_satisfied(4, date).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::DependencyUnsatisfied { task_id: 4, ref blocking } if blocking == &vec![2, 3]
        ));
        assert!(err.is_expected());

        // 其他日期的成功不计入
        executions.insert(
            TaskExecutionBuilder::new(2, 12, date - chrono::Duration::days(1))
                .succeeded()
                .build(),
        );
        executions.insert(TaskExecutionBuilder::new(3, 13, date).succeeded().build());
        let result = checker.check_dependencies(4, date).await.unwrap();
        assert_eq!(result.blocking_dependencies, vec![2]);
    }

    #[tokio::test]
    async fn test_inactive_dependency_counts_as_satisfied() {
        let date = reference_time();
        let executions = MockTaskExecutionRepository::new();
        executions.insert(TaskExecutionBuilder::new(1, 11, date).succeeded().build());
        executions.insert(TaskExecutionBuilder::new(3, 13, date).succeeded().build());
        let checker = checker(
            vec![
                task(1, vec![]),
                task(2, vec![]).inactive(),
                task(3, vec![]),
                task(4, vec![1, 2, 3]),
            ],
            &executions,
        );

        let result = checker.check_dependencies(4, date).await.unwrap();
        assert_eq!(
            result,
            DependencyCheckResult {
                can_execute: true,
                blocking_dependencies: vec![],
            }
        );
        checker.ensure_satisfied(4, date).await.unwrap();
    }
}
