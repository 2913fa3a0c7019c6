// crates/arborruntime/tests/task_spawn_test.rs

use arborcore::{EventKind, EventRecorder, LogLevel, NodeId, NodeStatus, Value};
use arborruntime::{
    context, ErrorMergeStrategy, ExecutionUnit, Outcome, Runnable, TaskOptions,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Child that sleeps, records the context it observed, then succeeds or fails
struct Worker {
    unit: ExecutionUnit,
    delay_ms: u64,
    fail_with: Option<&'static str>,
    observed: Mutex<Vec<NodeId>>,
}

impl Worker {
    fn new(name: &str, delay_ms: u64, fail_with: Option<&'static str>) -> Arc<Worker> {
        Arc::new(Self {
            unit: ExecutionUnit::new(name).unwrap(),
            delay_ms,
            fail_with,
            observed: Mutex::new(Vec::new()),
        })
    }

    fn observed(&self) -> Vec<NodeId> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runnable for Worker {
    fn unit(&self) -> &ExecutionUnit {
        &self.unit
    }

    async fn run(&self) -> anyhow::Result<Value> {
        self.observed
            .lock()
            .unwrap()
            .push(context::current("worker.start")?.unit_id());

        self.unit
            .step("work", async {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                let ctx = context::current("worker.step")?;
                self.observed.lock().unwrap().push(ctx.unit_id());
                ctx.log(LogLevel::Debug, "slept");
                match self.fail_with {
                    Some(message) => Err(anyhow::anyhow!(message)),
                    None => Ok(Value::from(self.unit.name())),
                }
            })
            .await
            .map_err(Into::into)
    }
}

fn as_runnables(workers: &[Arc<Worker>]) -> Vec<Arc<dyn Runnable>> {
    workers
        .iter()
        .map(|w| w.clone() as Arc<dyn Runnable>)
        .collect()
}

fn observed_root() -> (ExecutionUnit, Arc<EventRecorder>) {
    let root = ExecutionUnit::new("root").unwrap();
    let recorder = Arc::new(EventRecorder::new());
    root.add_observer(recorder.clone()).unwrap();
    (root, recorder)
}

#[tokio::test]
async fn test_concurrent_siblings_settle_before_error() {
    let (root, recorder) = observed_root();
    // B fails first in time, A and C are still in flight when it does
    let workers = vec![
        Worker::new("A", 40, None),
        Worker::new("B", 5, Some("boom")),
        Worker::new("C", 60, None),
    ];
    let children = as_runnables(&workers);

    let err = root
        .spawn(TaskOptions::concurrent(), || async move { anyhow::Ok(children) })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "boom");
    assert_eq!(workers[0].unit.status(), NodeStatus::Completed);
    assert_eq!(workers[1].unit.status(), NodeStatus::Failed);
    assert_eq!(workers[2].unit.status(), NodeStatus::Completed);
    assert_eq!(recorder.count("taskEnd"), 1);
    assert_eq!(recorder.count("taskStart"), 1);

    // successes survive the error
    assert_eq!(workers[0].unit.output(), Some(Value::from("A")));
    assert_eq!(workers[2].unit.output(), Some(Value::from("C")));

    // taskEnd comes after every sibling reached a terminal status
    let names = recorder.event_names();
    let task_end = names.iter().position(|n| *n == "taskEnd").unwrap();
    assert_eq!(task_end, names.len() - 1);
}

#[tokio::test]
async fn test_first_error_follows_listed_order() {
    let (root, _recorder) = observed_root();
    let workers = vec![
        Worker::new("slow-fail", 50, Some("first listed")),
        Worker::new("fast-fail", 1, Some("first finished")),
    ];
    let children = as_runnables(&workers);

    let err = root
        .spawn(TaskOptions::concurrent(), || async move { anyhow::Ok(children) })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "first listed");
}

#[tokio::test]
async fn test_merge_strategy_combines_failures() {
    let (root, _recorder) = observed_root();
    let workers = vec![
        Worker::new("x", 10, Some("disk")),
        Worker::new("y", 1, None),
        Worker::new("z", 5, Some("network")),
    ];
    let children = as_runnables(&workers);
    let options = TaskOptions::concurrent().with_merge(ErrorMergeStrategy::merged());

    let err = root
        .spawn(options, || async move { anyhow::Ok(children) })
        .await
        .unwrap_err();

    let wf = err.as_workflow().unwrap();
    assert_eq!(wf.message, "2 concurrent failures: disk; network");
    assert_eq!(wf.merged.len(), 2);
    assert_eq!(wf.merged[0].unit_id, workers[0].unit.id());
    assert_eq!(workers[1].unit.status(), NodeStatus::Completed);
}

#[tokio::test]
async fn test_report_keeps_every_outcome() {
    let (root, _recorder) = observed_root();
    let workers = vec![Worker::new("ok", 1, None), Worker::new("bad", 1, Some("no"))];
    let children = as_runnables(&workers);

    let report = root
        .spawn_report(TaskOptions::concurrent().with_name("pair"), || async move {
            anyhow::Ok(children)
        })
        .await
        .unwrap();

    assert_eq!(report.task, "pair");
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert!(matches!(&report.children[0].outcome, Outcome::Completed(v) if v.as_str() == Some("ok")));
    assert!(matches!(&report.children[1].outcome, Outcome::Failed(e) if e.message == "no"));
}

#[tokio::test]
async fn test_siblings_observe_their_own_context() {
    let (root, _recorder) = observed_root();
    let workers: Vec<_> = (0..5)
        .map(|i| Worker::new(&format!("w{}", i), 5 * (5 - i), None))
        .collect();
    let children = as_runnables(&workers);

    root.spawn(TaskOptions::concurrent(), || async move { anyhow::Ok(children) })
        .await
        .unwrap();

    for worker in &workers {
        let observed = worker.observed();
        assert_eq!(observed.len(), 2);
        assert!(observed.iter().all(|id| *id == worker.unit.id()));
    }
}

#[tokio::test]
async fn test_producer_runs_inside_parent_scope() {
    let (root, recorder) = observed_root();
    let worker = Worker::new("child", 1, None);
    let child: Arc<dyn Runnable> = worker.clone();

    let outputs = root
        .spawn(TaskOptions::default().with_name("plan"), || async move {
            let ctx = context::current("plan")?;
            assert_eq!(ctx.node().name, "task:plan");
            ctx.log(LogLevel::Info, "planned one child");
            anyhow::Ok(vec![child])
        })
        .await
        .unwrap();

    assert_eq!(outputs, vec![Value::from("child")]);
    assert_eq!(root.logs()[0].message, "planned one child");
    // the child's own logs bubble to the root's observers
    assert!(recorder
        .logs()
        .iter()
        .any(|l| l.unit_id == worker.unit.id() && l.message == "slept"));
}

#[tokio::test]
async fn test_nested_tasks_bubble_to_root() {
    struct Fanout {
        unit: ExecutionUnit,
    }

    #[async_trait]
    impl Runnable for Fanout {
        fn unit(&self) -> &ExecutionUnit {
            &self.unit
        }

        async fn run(&self) -> anyhow::Result<Value> {
            let leaves = vec![Worker::new("leaf-1", 1, None), Worker::new("leaf-2", 2, None)];
            let children = as_runnables(&leaves);
            let outputs = self
                .unit
                .spawn(TaskOptions::concurrent(), || async move { anyhow::Ok(children) })
                .await?;
            Ok(Value::from(outputs))
        }
    }

    let (root, recorder) = observed_root();
    let fanout: Arc<dyn Runnable> = Arc::new(Fanout {
        unit: ExecutionUnit::new("fanout").unwrap(),
    });
    let fanout_unit = fanout.unit().clone();

    let outputs = root
        .spawn(TaskOptions::default(), || async move { anyhow::Ok(vec![fanout]) })
        .await
        .unwrap();

    assert_eq!(
        outputs,
        vec![Value::Array(vec![Value::from("leaf-1"), Value::from("leaf-2")])]
    );
    assert_eq!(recorder.count("taskStart"), 2);
    assert_eq!(recorder.count("taskEnd"), 2);
    let leaf_attach = recorder.events().into_iter().any(|e| {
        matches!(&e.kind, EventKind::ChildAttached { parent, .. } if parent.id == fanout_unit.id())
    });
    assert!(leaf_attach);
    assert_eq!(root.node().len(), 4);
}

#[tokio::test]
async fn test_collaborator_reports_through_ambient_context() {
    /// Stand-in for an external model client that only knows the ambient context
    async fn model_call(prompt: &str) -> String {
        let reply = format!("echo {}", prompt);
        match context::try_current() {
            Some(ctx) => {
                ctx.log(LogLevel::Debug, format!("calling model: {}", prompt));
                ctx.step("model", async { anyhow::Ok(reply.clone()) })
                    .await
                    .unwrap_or(reply)
            }
            None => reply,
        }
    }

    let (root, recorder) = observed_root();
    let reply = root
        .step("ask", async { anyhow::Ok(model_call("hi").await) })
        .await
        .unwrap();

    assert_eq!(reply, "echo hi");
    assert_eq!(recorder.logs()[0].message, "calling model: hi");
    assert_eq!(recorder.logs()[0].unit_id, root.id());
    assert_eq!(
        recorder.event_names(),
        vec!["stepStart", "stepStart", "stepEnd", "stepEnd"]
    );
    // outside any scope the collaborator still works, it just cannot report
    assert_eq!(model_call("bye").await, "echo bye");
}

struct Panicking {
    unit: ExecutionUnit,
}

#[async_trait]
impl Runnable for Panicking {
    fn unit(&self) -> &ExecutionUnit {
        &self.unit
    }

    async fn run(&self) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        panic!("worker blew up");
    }
}

#[tokio::test]
async fn test_panicking_sibling_does_not_take_down_the_task() {
    let (root, recorder) = observed_root();
    let steady = Worker::new("A", 30, None);
    let panicking = Arc::new(Panicking {
        unit: ExecutionUnit::new("B").unwrap(),
    });
    let panicking_unit = panicking.unit.clone();
    let children: Vec<Arc<dyn Runnable>> = vec![steady.clone(), panicking];

    let err = root
        .spawn(TaskOptions::concurrent(), || async move { anyhow::Ok(children) })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "'B' panicked: worker blew up");
    assert_eq!(steady.unit.status(), NodeStatus::Completed);
    assert_eq!(steady.unit.output(), Some(Value::from("A")));
    assert_eq!(panicking_unit.status(), NodeStatus::Failed);
    assert_eq!(recorder.count("taskEnd"), 1);
    assert_eq!(recorder.count("error"), 1);
}

#[tokio::test]
async fn test_cancelled_in_flight_work_ends_cancelled() {
    struct Waiting {
        unit: ExecutionUnit,
    }

    #[async_trait]
    impl Runnable for Waiting {
        fn unit(&self) -> &ExecutionUnit {
            &self.unit
        }

        async fn run(&self) -> anyhow::Result<Value> {
            self.unit.cancelled().await;
            anyhow::bail!("stopped")
        }
    }

    let (root, _recorder) = observed_root();
    let waiting: Arc<dyn Runnable> = Arc::new(Waiting {
        unit: ExecutionUnit::new("waiting").unwrap(),
    });
    let waiting_unit = waiting.unit().clone();
    let quick = Worker::new("quick", 1, None);
    let children: Vec<Arc<dyn Runnable>> = vec![waiting, quick.clone()];

    let canceller = root.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let report = root
        .spawn_report(TaskOptions::concurrent(), || async move { anyhow::Ok(children) })
        .await
        .unwrap();

    assert_eq!(waiting_unit.status(), NodeStatus::Cancelled);
    assert_eq!(quick.unit.status(), NodeStatus::Completed);
    assert!(matches!(report.children[0].outcome, Outcome::Cancelled));
    assert_eq!(report.cancelled(), 1);
    assert_eq!(report.failed(), 0);
}
