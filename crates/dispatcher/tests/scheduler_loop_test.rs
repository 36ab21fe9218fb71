#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use futures::future::join_all;

    use scheduler_core::models::{
        ExecutionStatus, MessageType, ScheduleStatus, ScheduledTask, TaskSchedule,
    };
    use scheduler_dispatcher::{
        DependencyChecker, DependencyGraph, ResponseHandler, ResponseOutcome, ScheduleEvaluator,
        ScheduleOutcome, TaskDispatcher, TaskScheduler,
    };
    use scheduler_infrastructure::MetricsCollector;
    use scheduler_testing_utils::{
        InMemoryDistributedLock, MockMessageQueue, MockTaskExecutionRepository,
        MockTaskScheduleRepository, ResponseBuilder, ScheduledTaskBuilder, TaskExecutionBuilder,
        TaskScheduleBuilder,
    };

    const REQUEST_QUEUE: &str = "task_requests";

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    /// 共享存储，多个副本通过克隆看到同一份状态
    struct Cluster {
        graph: Arc<DependencyGraph>,
        schedules: MockTaskScheduleRepository,
        executions: MockTaskExecutionRepository,
        lock: InMemoryDistributedLock,
        queue: MockMessageQueue,
    }

    impl Cluster {
        fn new(tasks: Vec<ScheduledTask>, schedules: Vec<TaskSchedule>) -> Self {
            Self {
                graph: Arc::new(DependencyGraph::build(tasks).unwrap()),
                schedules: MockTaskScheduleRepository::with_schedules(schedules),
                executions: MockTaskExecutionRepository::new(),
                lock: InMemoryDistributedLock::new(),
                queue: MockMessageQueue::new(),
            }
        }

        fn dispatcher(&self) -> Arc<TaskDispatcher> {
            Arc::new(TaskDispatcher::new(
                Arc::new(self.executions.clone()),
                Arc::new(self.queue.clone()),
                REQUEST_QUEUE.to_string(),
                Arc::new(MetricsCollector::new()),
            ))
        }

        fn replica(&self, instance_id: &str) -> TaskScheduler {
            let executions = Arc::new(self.executions.clone());
            TaskScheduler::new(
                Arc::new(ScheduleEvaluator::new(
                    Arc::new(self.schedules.clone()),
                    executions.clone(),
                )),
                Arc::new(DependencyChecker::new(self.graph.clone(), executions)),
                self.dispatcher(),
                Arc::new(self.lock.clone()),
                instance_id.to_string(),
                StdDuration::from_millis(10),
                Arc::new(MetricsCollector::new()),
            )
        }

        fn response_handler(&self) -> ResponseHandler {
            ResponseHandler::new(
                Arc::new(self.executions.clone()),
                self.dispatcher(),
                self.graph.clone(),
                5,
                Arc::new(MetricsCollector::new()),
            )
        }
    }

    fn single_daily_task(task_id: i64, schedule_id: i64) -> Cluster {
        Cluster::new(
            vec![ScheduledTaskBuilder::new(task_id).build()],
            vec![TaskScheduleBuilder::new(schedule_id, task_id)
                .with_next_run(at(2, 2, 0))
                .build()],
        )
    }

    #[tokio::test]
    async fn test_daily_schedule_dispatches_logical_date() {
        let cluster = single_daily_task(7, 1);
        let scheduler = cluster.replica("replica-a");

        let report = scheduler.tick(at(2, 2, 5)).await.unwrap();
        assert_eq!(report.dispatched, 1);

        let executions = cluster.executions.for_task(7);
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].execution_date, at(2, 0, 0));
        assert_eq!(executions[0].status, ExecutionStatus::Dispatched);
        assert_eq!(executions[0].attempt, 1);
        assert_eq!(cluster.schedules.get(1).unwrap().next_run, at(3, 2, 0));

        let requests = cluster.queue.messages(REQUEST_QUEUE);
        assert_eq!(requests.len(), 1);
        match &requests[0].message_type {
            MessageType::TaskRequest(request) => {
                assert_eq!(request.execution_id, executions[0].id);
                assert_eq!(request.execution_date, at(2, 0, 0));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_failure_advances_and_misses_period() {
        let cluster = single_daily_task(7, 1);
        cluster.queue.set_publish_failure(true);
        let scheduler = cluster.replica("replica-a");

        let outcome = scheduler
            .evaluate_schedule(&cluster.schedules.get(1).unwrap(), at(2, 2, 5))
            .await
            .unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Missed { .. }));

        // NextRun 已推进，执行记录已回滚
        assert_eq!(cluster.schedules.get(1).unwrap().next_run, at(3, 2, 0));
        assert_eq!(cluster.executions.count(), 0);

        // 同一时刻再次评估不会补发
        cluster.queue.set_publish_failure(false);
        let report = scheduler.tick(at(2, 2, 6)).await.unwrap();
        assert_eq!(report.evaluated, 0);
        assert_eq!(cluster.executions.count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_replicas_dispatch_exactly_once() {
        let cluster = single_daily_task(7, 1);
        let replicas: Vec<_> = (0..5)
            .map(|i| cluster.replica(&format!("replica-{i}")))
            .collect();

        let reports = join_all(replicas.iter().map(|r| r.tick(at(2, 2, 5)))).await;

        let mut dispatched = 0;
        for report in reports {
            let report = report.unwrap();
            assert_eq!(report.errors, 0);
            assert_eq!(report.evaluated, report.dispatched + report.lock_denied + report.skipped);
            dispatched += report.dispatched;
        }
        assert_eq!(dispatched, 1);
        assert_eq!(cluster.executions.count(), 1);
        assert_eq!(cluster.queue.messages(REQUEST_QUEUE).len(), 1);
        assert_eq!(cluster.schedules.get(1).unwrap().next_run, at(3, 2, 0));
        assert!(!cluster.lock.is_held(1));
    }

    #[tokio::test]
    async fn test_lock_held_by_other_process_denies_evaluation() {
        let cluster = single_daily_task(7, 42);
        cluster.lock.hold_externally(42);
        let scheduler = cluster.replica("replica-a");

        let outcome = scheduler
            .evaluate_schedule(&cluster.schedules.get(42).unwrap(), at(2, 2, 5))
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::LockDenied);
        assert_eq!(cluster.lock.denials(), 1);
        assert_eq!(cluster.schedules.get(42).unwrap().next_run, at(2, 2, 0));
        assert_eq!(cluster.executions.count(), 0);
    }

    #[tokio::test]
    async fn test_next_run_never_moves_backwards() {
        let cluster = Cluster::new(
            vec![ScheduledTaskBuilder::new(7).build()],
            vec![TaskScheduleBuilder::new(1, 7)
                .with_expression("hourly@15")
                .with_increment(Duration::hours(1))
                .with_next_run(at(2, 0, 15))
                .build()],
        );
        let scheduler = cluster.replica("replica-a");

        let mut previous = cluster.schedules.get(1).unwrap().next_run;
        let mut now = at(2, 0, 20);
        for _ in 0..12 {
            scheduler.tick(now).await.unwrap();
            let next_run = cluster.schedules.get(1).unwrap().next_run;
            assert!(next_run >= previous);
            previous = next_run;

            // 让本次执行成功结束，避免被判定为卡住
            for mut execution in cluster.executions.all() {
                execution.status = ExecutionStatus::Succeeded;
                cluster.executions.insert(execution);
            }
            now += Duration::minutes(37);
        }
        assert!(previous > at(2, 6, 0));
        assert!(cluster.executions.count() > 1);
    }

    #[tokio::test]
    async fn test_dependent_waits_for_successful_dependency() {
        let cluster = Cluster::new(
            vec![
                ScheduledTaskBuilder::new(3).with_name("settlement").build(),
                ScheduledTaskBuilder::new(7)
                    .with_name("reconciliation")
                    .with_dependencies(vec![3])
                    .build(),
            ],
            vec![
                TaskScheduleBuilder::new(1, 3).with_next_run(at(2, 2, 0)).build(),
                TaskScheduleBuilder::new(2, 7).with_next_run(at(2, 2, 0)).build(),
            ],
        );
        let scheduler = cluster.replica("replica-a");
        let handler = cluster.response_handler();
        let logical_date = at(2, 0, 0);

        let report = scheduler.tick(at(2, 2, 5)).await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.blocked, 1);
        assert_eq!(cluster.schedules.get(2).unwrap().next_run, at(2, 2, 0));

        // 任务 3 业务失败，任务 7 继续等待
        let upstream = cluster.executions.for_task(3).remove(0);
        let outcome = handler
            .process_message(&ResponseBuilder::business_failure(upstream.id, 1))
            .await
            .unwrap();
        assert_eq!(outcome, ResponseOutcome::Applied(ExecutionStatus::Failed));

        let report = scheduler.tick(at(2, 2, 10)).await.unwrap();
        assert_eq!(report.blocked, 1);
        assert!(cluster.executions.for_task(7).is_empty());

        // 人工重跑成功后依赖满足
        cluster.executions.insert(
            TaskExecutionBuilder::new(3, 1, logical_date)
                .dispatched_at(at(2, 3, 0))
                .succeeded()
                .build(),
        );
        let report = scheduler.tick(at(2, 3, 30)).await.unwrap();
        assert_eq!(report.dispatched, 1);

        let downstream = cluster.executions.for_task(7);
        assert_eq!(downstream.len(), 1);
        assert_eq!(downstream[0].execution_date, logical_date);
        assert_eq!(cluster.schedules.get(2).unwrap().next_run, at(3, 2, 0));
    }

    #[tokio::test]
    async fn test_multiple_dependencies_with_inactive_upstream() {
        let cluster = Cluster::new(
            vec![
                ScheduledTaskBuilder::new(1).with_name("card_settlement").build(),
                ScheduledTaskBuilder::new(2)
                    .with_name("legacy_settlement")
                    .inactive()
                    .build(),
                ScheduledTaskBuilder::new(3).with_name("wallet_settlement").build(),
                ScheduledTaskBuilder::new(4)
                    .with_name("daily_reconciliation")
                    .with_dependencies(vec![1, 2, 3])
                    .build(),
            ],
            vec![TaskScheduleBuilder::new(40, 4).with_next_run(at(2, 2, 0)).build()],
        );
        let scheduler = cluster.replica("replica-a");
        let logical_date = at(2, 0, 0);

        cluster.executions.insert(
            TaskExecutionBuilder::new(1, 10, logical_date)
                .dispatched_at(at(2, 0, 30))
                .succeeded()
                .build(),
        );

        // 只有任务 1 成功：任务 3 阻塞，停用的任务 2 不阻塞
        let outcome = scheduler
            .evaluate_schedule(&cluster.schedules.get(40).unwrap(), at(2, 2, 5))
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::DependencyBlocked { blocking: vec![3] });
        assert_eq!(cluster.schedules.get(40).unwrap().next_run, at(2, 2, 0));
        assert!(cluster.executions.for_task(4).is_empty());

        cluster.executions.insert(
            TaskExecutionBuilder::new(3, 30, logical_date)
                .dispatched_at(at(2, 1, 0))
                .succeeded()
                .build(),
        );
        let report = scheduler.tick(at(2, 2, 10)).await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.blocked, 0);

        let downstream = cluster.executions.for_task(4);
        assert_eq!(downstream.len(), 1);
        assert_eq!(downstream[0].execution_date, logical_date);
    }

    #[tokio::test]
    async fn test_hung_run_behind_newer_success_is_stuck() {
        let cluster = Cluster::new(
            vec![ScheduledTaskBuilder::new(7).build()],
            vec![TaskScheduleBuilder::new(1, 7)
                .with_expression("hourly@00")
                .with_increment(Duration::hours(1))
                .with_next_run(at(2, 10, 0))
                .with_max_run_time(Duration::hours(3))
                .build()],
        );
        let hung = TaskExecutionBuilder::new(7, 1, at(2, 4, 0))
            .with_status(ExecutionStatus::Running)
            .dispatched_at(at(2, 5, 0))
            .build();
        cluster.executions.insert(hung.clone());
        cluster.executions.insert(
            TaskExecutionBuilder::new(7, 1, at(2, 8, 0))
                .dispatched_at(at(2, 9, 0))
                .succeeded()
                .build(),
        );
        let scheduler = cluster.replica("replica-a");

        let outcome = scheduler
            .evaluate_schedule(&cluster.schedules.get(1).unwrap(), at(2, 10, 1))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ScheduleOutcome::Stuck { execution_id, .. } if execution_id == hung.id
        ));
        let schedule = cluster.schedules.get(1).unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Stuck);
        assert_eq!(schedule.next_run, at(2, 10, 0));
        assert_eq!(cluster.executions.count(), 2);
    }

    #[tokio::test]
    async fn test_stuck_schedule_is_flagged_then_recovers() {
        let cluster = single_daily_task(7, 1);
        let stale = TaskExecutionBuilder::new(7, 1, at(1, 0, 0))
            .with_status(ExecutionStatus::Running)
            .dispatched_at(at(1, 2, 0))
            .build();
        cluster.executions.insert(stale.clone());
        let scheduler = cluster.replica("replica-a");

        let outcome = scheduler
            .evaluate_schedule(&cluster.schedules.get(1).unwrap(), at(2, 2, 5))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ScheduleOutcome::Stuck { execution_id, .. } if execution_id == stale.id
        ));
        let schedule = cluster.schedules.get(1).unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Stuck);
        assert_eq!(schedule.next_run, at(2, 2, 0));
        assert_eq!(cluster.executions.count(), 1);

        // 卡住的执行结束后恢复派发
        let mut finished = stale;
        finished.status = ExecutionStatus::Failed;
        cluster.executions.insert(finished);

        let report = scheduler.tick(at(2, 2, 30)).await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(cluster.schedules.get(1).unwrap().status, ScheduleStatus::Active);
    }

    #[tokio::test]
    async fn test_inactive_task_advances_without_dispatch() {
        let cluster = Cluster::new(
            vec![ScheduledTaskBuilder::new(7).inactive().build()],
            vec![TaskScheduleBuilder::new(1, 7).with_next_run(at(2, 2, 0)).build()],
        );
        let scheduler = cluster.replica("replica-a");

        let outcome = scheduler
            .evaluate_schedule(&cluster.schedules.get(1).unwrap(), at(2, 2, 5))
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::TaskInactive);
        assert_eq!(cluster.schedules.get(1).unwrap().next_run, at(3, 2, 0));
        assert_eq!(cluster.executions.count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let cluster = single_daily_task(7, 1);
        let scheduler = Arc::new(cluster.replica("replica-a"));
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        // NextRun 早于当前时间，第一次轮询即派发
        let dispatched = scheduler_testing_utils::TestEnv::wait_for(
            || {
                let executions = cluster.executions.clone();
                async move { executions.count() >= 1 }
            },
            StdDuration::from_secs(2),
        )
        .await;
        assert!(dispatched);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
