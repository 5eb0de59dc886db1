//! Queue ordering and boundary behavior over real files

use proptest::prelude::*;
use tempfile::TempDir;

use overseer::queue::{Priority, QueueFile, QueueManager, TaskInput};
use overseer::state::OssPaths;

fn open(temp: &TempDir) -> QueueManager {
    QueueManager::open(&OssPaths::new(temp.path())).unwrap()
}

fn input(priority: Priority, label: &str) -> TaskInput {
    TaskInput {
        priority,
        source: "test".to_string(),
        anomaly_type: label.to_string(),
        prompt: format!("handle {}", label),
        suggested_agent: "debugger".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_next_pending_sequence() {
    let temp = TempDir::new().unwrap();
    let mut queue = open(&temp);

    queue.add(input(Priority::Medium, "a")).unwrap();
    queue.add(input(Priority::Critical, "b")).unwrap();
    queue.add(input(Priority::Low, "c")).unwrap();
    queue.add(input(Priority::Critical, "d")).unwrap();

    let mut drained = Vec::new();
    while let Some(task) = queue.next_pending().map(|t| t.id.clone()) {
        let removed = queue.remove(&task).unwrap();
        drained.push(removed.anomaly_type);
    }

    assert_eq!(drained, vec!["b", "d", "a", "c"]);
}

#[test]
fn test_overflow_lands_oldest_low_in_expired_archive() {
    let temp = TempDir::new().unwrap();
    let paths = OssPaths::new(temp.path());
    let mut queue = open(&temp).with_max_size(5);

    let mut first_id = None;
    for i in 0..6 {
        let task = queue.add(input(Priority::Low, &format!("t{}", i))).unwrap();
        first_id.get_or_insert(task.id);
    }

    assert_eq!(queue.tasks().len(), 5);

    let archive: QueueFile =
        serde_json::from_str(&std::fs::read_to_string(paths.queue_expired_file()).unwrap()).unwrap();
    assert_eq!(archive.version, "1.0");
    assert_eq!(archive.tasks.len(), 1);
    assert_eq!(archive.tasks[0].id, first_id.unwrap());
}

#[test]
fn test_live_file_rewritten_on_every_mutation() {
    let temp = TempDir::new().unwrap();
    let paths = OssPaths::new(temp.path());
    let mut queue = open(&temp);

    let read_count = || {
        serde_json::from_str::<QueueFile>(&std::fs::read_to_string(paths.queue_file()).unwrap())
            .unwrap()
            .tasks
            .len()
    };

    let task = queue.add(input(Priority::High, "x")).unwrap();
    assert_eq!(read_count(), 1);

    queue.remove(&task.id).unwrap();
    assert_eq!(read_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// After any add sequence the live queue is sorted by
    /// (priority rank, created_at) ascending.
    #[test]
    fn prop_queue_is_always_priority_then_age_sorted(ranks in proptest::collection::vec(0u8..4, 1..20)) {
        let temp = TempDir::new().unwrap();
        let mut queue = open(&temp);

        for (i, rank) in ranks.iter().enumerate() {
            let priority = match rank {
                0 => Priority::Critical,
                1 => Priority::High,
                2 => Priority::Medium,
                _ => Priority::Low,
            };
            queue.add(input(priority, &format!("t{}", i))).unwrap();
        }

        let tasks = queue.tasks();
        for pair in tasks.windows(2) {
            let left = (pair[0].priority.rank(), pair[0].created_at);
            let right = (pair[1].priority.rank(), pair[1].created_at);
            prop_assert!(left <= right, "queue out of order: {:?} before {:?}", left, right);
        }
    }
}
