//! Dispatcher cycles against the in-memory store and scripted submitters.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::Span;
use warehouse_state::{
    CycleUpdate, FlagOutcome, FlagStatus, FlagStore, MemoryFlagStore, NewFlag,
};
use warehouse_submit::{
    DispatchError, Dispatcher, DispatcherConfig, RawVerdict, StatusVocabulary, SubmitError,
    Submitter,
};

type Reply = Box<dyn Fn(&[String]) -> Result<Vec<RawVerdict>, SubmitError> + Send + Sync>;

struct ScriptedSubmitter {
    vocabulary: StatusVocabulary,
    reply: Reply,
    batches: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl Submitter for ScriptedSubmitter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    async fn submit(&self, batch: &[String]) -> Result<Vec<RawVerdict>, SubmitError> {
        self.batches.lock().unwrap().push(batch.to_vec());
        (self.reply)(batch)
    }
}

struct Harness {
    store: Arc<MemoryFlagStore>,
    dispatcher: Dispatcher,
    batches: Arc<Mutex<Vec<Vec<String>>>>,
}

fn harness(config: DispatcherConfig, vocabulary: StatusVocabulary, reply: Reply) -> Harness {
    let store = Arc::new(MemoryFlagStore::new());
    let batches = Arc::new(Mutex::new(Vec::new()));
    let submitter = ScriptedSubmitter {
        vocabulary,
        reply,
        batches: batches.clone(),
    };
    let dispatcher =
        Dispatcher::with_submitter(config, store.clone(), Box::new(submitter), Span::none());
    Harness {
        store,
        dispatcher,
        batches,
    }
}

fn reply_all(status: &'static str) -> Reply {
    Box::new(move |batch| Ok(batch.iter().map(|f| RawVerdict::new(f.as_str(), status)).collect()))
}

/// Insert flags created `age_secs` ago, one second apart, oldest last.
async fn seed(store: &MemoryFlagStore, values: &[&str], age_secs: i64) {
    let now = Utc::now();
    let flags: Vec<NewFlag> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let created = now - chrono::Duration::seconds(age_secs + i as i64);
            NewFlag::new(*v, "pwn.py", "10.60.1.1", "alice", created)
        })
        .collect();
    store.insert_flags(&flags).await.unwrap();
}

async fn outcome(store: &MemoryFlagStore, value: &str) -> Option<FlagOutcome> {
    store.get_flag(value).await.unwrap().unwrap().outcome
}

#[tokio::test]
async fn test_accepted_batch_resolves_rows() {
    let h = harness(
        DispatcherConfig::default(),
        StatusVocabulary::http(),
        reply_all("[OK] Accepted"),
    );
    seed(&h.store, &["A=", "B=", "C="], 1).await;

    let summary = h.dispatcher.run_cycle().await.unwrap();

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.submitted, 3);
    assert_eq!(summary.resolved, 3);
    assert!(!summary.backoff);
    for v in ["A=", "B=", "C="] {
        let rec = h.store.get_flag(v).await.unwrap().unwrap();
        assert_eq!(rec.status, FlagStatus::Submitted);
        assert_eq!(rec.outcome, Some(FlagOutcome::Success));
    }
    // Newest first within the batch.
    assert_eq!(h.batches.lock().unwrap()[0], vec!["A=", "B=", "C="]);

    let again = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(again.batches, 0);
    assert_eq!(h.store.commit_count(), 2);
}

#[tokio::test]
async fn test_line_vocabulary_maps_to_outcomes() {
    let statuses = [
        ("OK=", "OK"),
        ("DUP=", "DUP"),
        ("OLD=", "OLD"),
        ("OWN=", "OWN"),
        ("INV=", "INV"),
        ("ERR=", "ERR"),
        ("WAT=", "WAT"),
    ];
    let reply: Reply = Box::new(move |batch| {
        Ok(batch
            .iter()
            .map(|f| {
                let status = statuses.iter().find(|(v, _)| v == f).map(|(_, s)| *s).unwrap();
                RawVerdict::new(f.as_str(), status)
            })
            .collect())
    });
    let h = harness(DispatcherConfig::default(), StatusVocabulary::line(), reply);
    let values: Vec<&str> = statuses.iter().map(|(v, _)| *v).collect();
    seed(&h.store, &values, 1).await;

    let summary = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(summary.resolved, 5);

    assert_eq!(outcome(&h.store, "OK=").await, Some(FlagOutcome::Success));
    assert_eq!(outcome(&h.store, "DUP=").await, Some(FlagOutcome::Success));
    assert_eq!(outcome(&h.store, "OLD=").await, Some(FlagOutcome::Expired));
    assert_eq!(outcome(&h.store, "OWN=").await, Some(FlagOutcome::Rejected));
    assert_eq!(outcome(&h.store, "INV=").await, Some(FlagOutcome::Rejected));
    // Unavailable and unrecognised replies leave the flag pending.
    assert_eq!(outcome(&h.store, "ERR=").await, None);
    assert_eq!(outcome(&h.store, "WAT=").await, None);
}

#[tokio::test]
async fn test_empty_reply_backs_off_without_updates() {
    let h = harness(
        DispatcherConfig::default(),
        StatusVocabulary::http(),
        Box::new(|_| Ok(Vec::new())),
    );
    seed(&h.store, &["A=", "B="], 1).await;

    let summary = h.dispatcher.run_cycle().await.unwrap();

    assert!(summary.backoff);
    assert_eq!(summary.resolved, 0);
    assert_eq!(summary.expired, 0);
    let counts = h.store.count_by_status().await.unwrap();
    assert_eq!(counts.pending, 2);
}

#[tokio::test]
async fn test_network_failure_leaves_flags_for_next_cycle() {
    let failing = Arc::new(Mutex::new(true));
    let flag = failing.clone();
    let reply: Reply = Box::new(move |batch| {
        if *flag.lock().unwrap() {
            Err(SubmitError::Network {
                endpoint: "http://10.10.0.1:8080/flags".to_string(),
                reason: "connection refused".to_string(),
            })
        } else {
            Ok(batch.iter().map(|f| RawVerdict::new(f.as_str(), "accepted")).collect())
        }
    });
    let h = harness(DispatcherConfig::default(), StatusVocabulary::http(), reply);
    seed(&h.store, &["A="], 1).await;

    let first = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(first.batches, 1);
    assert_eq!(first.resolved, 0);
    assert!(!first.backoff);
    assert_eq!(outcome(&h.store, "A=").await, None);

    *failing.lock().unwrap() = false;
    let second = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(second.resolved, 1);
    assert_eq!(outcome(&h.store, "A=").await, Some(FlagOutcome::Success));
}

#[tokio::test]
async fn test_sweep_expires_aged_flags_even_when_submission_fails() {
    let h = harness(
        DispatcherConfig::default(),
        StatusVocabulary::http(),
        Box::new(|_| Ok(Vec::new())),
    );
    seed(&h.store, &["FRESH="], 1).await;
    seed(&h.store, &["STALE="], 700).await;

    let summary = h.dispatcher.run_cycle().await.unwrap();

    assert_eq!(summary.expired, 1);
    let stale = h.store.get_flag("STALE=").await.unwrap().unwrap();
    assert_eq!(stale.status, FlagStatus::Submitted);
    assert_eq!(stale.outcome, Some(FlagOutcome::Expired));
    assert_eq!(outcome(&h.store, "FRESH=").await, None);
    // The aged flag was never offered to the submitter.
    assert_eq!(h.batches.lock().unwrap()[0], vec!["FRESH="]);
}

#[tokio::test]
async fn test_batches_are_capped_per_cycle() {
    let config = DispatcherConfig {
        requests_per_interval: 2,
        batch_size: 2,
        ..Default::default()
    };
    let h = harness(config, StatusVocabulary::http(), reply_all("accepted"));
    seed(&h.store, &["E=", "D=", "C=", "B=", "A="], 1).await;

    let summary = h.dispatcher.run_cycle().await.unwrap();

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.submitted, 4);
    let batches = h.batches.lock().unwrap().clone();
    assert_eq!(batches, vec![vec!["E=", "D="], vec!["C=", "B="]]);
    assert_eq!(h.dispatcher.backlog().len(), 1);
    assert_eq!(outcome(&h.store, "A=").await, None);
}

#[tokio::test]
async fn test_leftover_backlog_is_not_submitted_after_aging_out() {
    let config = DispatcherConfig {
        requests_per_interval: 1,
        batch_size: 1,
        flag_lifetime_secs: 3,
        ..Default::default()
    };
    let h = harness(config, StatusVocabulary::http(), reply_all("accepted"));
    seed(&h.store, &["NEW=", "OLD="], 0).await;

    let first = h.dispatcher.run_cycle().await.unwrap();
    assert_eq!(first.batches, 1);
    assert_eq!(h.dispatcher.backlog().len(), 1);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let second = h.dispatcher.run_cycle().await.unwrap();

    assert_eq!(second.batches, 0);
    assert_eq!(second.resolved, 0);
    assert_eq!(second.expired, 1);
    assert_eq!(*h.batches.lock().unwrap(), vec![vec!["NEW=".to_string()]]);
    assert_eq!(outcome(&h.store, "OLD=").await, Some(FlagOutcome::Expired));
}

#[tokio::test]
async fn test_leftover_backlog_is_dropped_once_resolved_elsewhere() {
    let config = DispatcherConfig {
        requests_per_interval: 1,
        batch_size: 1,
        ..Default::default()
    };
    let h = harness(config, StatusVocabulary::http(), reply_all("accepted"));
    seed(&h.store, &["NEW=", "OLD="], 1).await;

    h.dispatcher.run_cycle().await.unwrap();
    let mut update = CycleUpdate::new(Utc::now() - chrono::Duration::seconds(600));
    update.resolve("OLD=", FlagOutcome::Rejected);
    h.store.apply_cycle(update).await.unwrap();

    let second = h.dispatcher.run_cycle().await.unwrap();

    assert_eq!(second.batches, 0);
    assert!(h.dispatcher.backlog().is_empty());
    assert_eq!(outcome(&h.store, "OLD=").await, Some(FlagOutcome::Rejected));
}

#[tokio::test]
async fn test_unknown_protocol_is_rejected_before_start() {
    let config = DispatcherConfig {
        protocol: "smoke-signals".to_string(),
        ..Default::default()
    };
    let result = Dispatcher::new(config, Arc::new(MemoryFlagStore::new()), Span::none());
    assert!(matches!(result, Err(DispatchError::UnknownProtocol { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_run_warms_up_then_paces_full_intervals_on_backoff() {
    let h = harness(
        DispatcherConfig::default(),
        StatusVocabulary::http(),
        Box::new(|_| Ok(Vec::new())),
    );
    seed(&h.store, &["A="], 1).await;

    // Warm-up is 5s: nothing happens before it.
    h.dispatcher.run(tokio::time::sleep(Duration::from_secs(4))).await;
    assert!(h.batches.lock().unwrap().is_empty());

    // Cycles at 5s, 25s and 45s of the second run.
    h.dispatcher.run(tokio::time::sleep(Duration::from_secs(46))).await;
    assert_eq!(h.batches.lock().unwrap().len(), 3);
}
