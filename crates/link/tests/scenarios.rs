use std::time::Duration;

use arqsim_core::{FaultFlags, FrameKind, Message};
use arqsim_link::{
    AuditEvent, Endpoint, FileAuditLog, LinkParams, MemoryAudit, Simulation, SimulationReport,
};

fn params() -> LinkParams {
    LinkParams {
        window_size: 4,
        timeout: Duration::from_secs(10),
        processing_time: Duration::from_millis(500),
        transmission_delay: Duration::from_secs(1),
        error_delay: Duration::from_secs(4),
        duplication_delay: Duration::from_millis(100),
        loss_rate: 0.0,
    }
}

fn faults(code: &str) -> FaultFlags {
    code.parse().expect("four fault bits")
}

fn messages(codes: &[&str]) -> Vec<Message> {
    codes
        .iter()
        .enumerate()
        .map(|(i, code)| Message::new(i as u32, format!("msg{i}"), faults(code)))
        .collect()
}

fn simulation(params: LinkParams, codes: &[&str], seed: u64) -> Simulation<MemoryAudit> {
    let _ = env_logger::builder().is_test(true).try_init();
    let sender = Endpoint::new(0, params.clone(), messages(codes))
        .expect("valid params")
        .with_seed(seed);
    let receiver = Endpoint::new(1, params, Vec::new())
        .expect("valid params")
        .with_seed(seed);
    let mut sim = Simulation::new(vec![sender, receiver], MemoryAudit::new()).expect("topology");
    sim.schedule_start(0, Duration::ZERO).expect("known node");
    sim
}

fn delivered(sim: &Simulation<MemoryAudit>) -> Vec<String> {
    sim.endpoint(1)
        .and_then(Endpoint::as_receiver)
        .expect("node 1 is the receiver")
        .delivered()
        .iter()
        .map(|payload| String::from_utf8_lossy(payload).into_owned())
        .collect()
}

fn sent_count(sim: &Simulation<MemoryAudit>) -> usize {
    sim.sink()
        .count(|e| matches!(e, AuditEvent::FrameSent { .. }))
}

fn report_secs(report: &SimulationReport) -> Option<f64> {
    report.finished_at.map(|at| at.as_secs_f64())
}

#[test]
fn test_clean_transfer() {
    let mut sim = simulation(params(), &["0000"; 4], 1);
    let report = sim.run();

    assert_eq!(report_secs(&report), Some(4.5));
    assert_eq!(delivered(&sim), vec!["msg0", "msg1", "msg2", "msg3"]);
    let sender = sim.endpoint(0).and_then(Endpoint::as_sender).expect("sender");
    assert_eq!(sender.stats().retransmissions, 0);
    assert_eq!(sender.stats().timeouts, 0);
    assert!(sender.is_complete());
    assert_eq!(sent_count(&sim), 4);
}

#[test]
fn test_lost_first_frame_recovers_after_timeout() {
    let mut sim = simulation(params(), &["0100", "0000", "0000", "0000"], 2);
    let report = sim.run();

    assert!(report.is_finished());
    let sender = sim.endpoint(0).and_then(Endpoint::as_sender).expect("sender");
    assert_eq!(sender.stats().timeouts, 1);
    assert_eq!(sender.stats().retransmissions, 4);
    assert!(sender.slots().iter().all(|slot| slot.faults.is_clean()));

    // frames 1..3 are taken before frame 0 shows up, then the resent window is taken again
    let got = delivered(&sim);
    assert_eq!(&got[got.len() - 4..], &["msg0", "msg1", "msg2", "msg3"]);

    let timeouts: Vec<_> = sim
        .sink()
        .records()
        .iter()
        .filter(|r| matches!(r.event, AuditEvent::Timeout { .. }))
        .map(|r| r.at)
        .collect();
    assert_eq!(timeouts, vec![Duration::from_millis(10_500)]);
}

#[test]
fn test_modified_frame_is_nacked_then_resent() {
    let mut sim = simulation(params(), &["0000", "1000", "0000", "0000"], 3);
    let report = sim.run();

    assert!(report.is_finished());
    assert_eq!(delivered(&sim), vec!["msg0", "msg1", "msg2", "msg3"]);

    let sender = sim.endpoint(0).and_then(Endpoint::as_sender).expect("sender");
    assert_eq!(sender.stats().nacks, 1);
    assert_eq!(sender.stats().timeouts, 1);

    let nacked: Vec<_> = sim
        .sink()
        .events_of(0)
        .filter_map(|e| match e {
            AuditEvent::ReplyReceived {
                kind: FrameKind::Nack,
                seq_num,
                ..
            } => Some(*seq_num),
            _ => None,
        })
        .collect();
    assert_eq!(nacked, vec![1]);

    let corrupted = sim
        .sink()
        .count(|e| matches!(e, AuditEvent::FrameReceived { corrupted: true, .. }));
    assert_eq!(corrupted, 1);
    let modified = sim.sink().count(|e| {
        matches!(e, AuditEvent::FrameSent { modified_bit: Some(_), .. })
    });
    assert_eq!(modified, 1);
}

#[test]
fn test_delayed_frame_arrives_last() {
    let mut sim = simulation(params(), &["0001", "0000", "0000", "0000"], 4);
    let report = sim.run();

    assert_eq!(report_secs(&report), Some(7.0));
    assert_eq!(delivered(&sim), vec!["msg1", "msg2", "msg3", "msg0"]);
    let sender = sim.endpoint(0).and_then(Endpoint::as_sender).expect("sender");
    assert_eq!(sender.stats().timeouts, 0);
}

#[test]
fn test_out_of_order_acks_still_terminate() {
    let params = LinkParams {
        window_size: 2,
        ..params()
    };
    let mut sim = simulation(params, &["0001", "0000", "0000"], 8);
    let report = sim.run_until(Duration::from_secs(600));

    // slot 1 is acked before the delayed slot 0, slot 2 goes out once slot 0 is acked
    assert_eq!(report.finished_at, Some(Duration::from_secs(10)));
    let sender = sim.endpoint(0).and_then(Endpoint::as_sender).expect("sender");
    assert!(sender.is_complete());
    assert_eq!(sender.window_base(), 2);
    assert_eq!(sender.stats().timeouts, 0);
    let terminated = sim
        .sink()
        .count(|e| matches!(e, AuditEvent::Terminated));
    assert_eq!(terminated, 1);
}

#[test]
fn test_duplicate_is_acked_but_not_delivered_twice() {
    let mut sim = simulation(params(), &["0010", "0000"], 5);
    let report = sim.run();

    assert_eq!(report_secs(&report), Some(4.0));
    assert_eq!(delivered(&sim), vec!["msg0", "msg1"]);

    let received_zero = sim
        .sink()
        .count(|e| matches!(e, AuditEvent::FrameReceived { seq_num: 0, .. }));
    assert_eq!(received_zero, 2);

    let ordinals: Vec<_> = sim
        .sink()
        .records()
        .iter()
        .filter_map(|r| match &r.event {
            AuditEvent::FrameSent {
                seq_num: 0,
                duplicate,
                ..
            } => Some(*duplicate),
            _ => None,
        })
        .collect();
    assert_eq!(ordinals, vec![1, 2]);

    let codes: Vec<_> = sim
        .sink()
        .records()
        .iter()
        .filter_map(|r| match &r.event {
            AuditEvent::ChannelError { faults } => Some(faults.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(codes, vec!["0010", "0000"]);
}

#[test]
fn test_total_reply_loss_never_terminates() {
    let params = LinkParams {
        loss_rate: 100.0,
        ..params()
    };
    let mut sim = simulation(params, &["0000"; 3], 6);
    let report = sim.run_until(Duration::from_secs(60));

    assert!(!report.is_finished());
    let sender = sim.endpoint(0).and_then(Endpoint::as_sender).expect("sender");
    assert!(sender.stats().timeouts >= 3);
    assert_eq!(sender.window_base(), 0);
    assert_eq!(sender.stats().acks, 0);

    let lost_replies = sim
        .sink()
        .count(|e| matches!(e, AuditEvent::ReplySent { lost: true, .. }));
    assert!(lost_replies > 0);
    let kept_replies = sim
        .sink()
        .count(|e| matches!(e, AuditEvent::ReplySent { lost: false, .. }));
    assert_eq!(kept_replies, 0);
}

#[test]
fn test_window_base_never_moves_back() {
    let params = LinkParams {
        loss_rate: 30.0,
        window_size: 3,
        ..params()
    };
    for seed in 0..5 {
        let mut sim = simulation(
            params.clone(),
            &["0000", "1000", "0100", "0010", "0001", "1100", "0000"],
            seed,
        );
        let mut last_base = 0;
        let mut limit = Duration::ZERO;
        while limit < Duration::from_secs(600) {
            limit += Duration::from_millis(250);
            let report = sim.run_until(limit);
            let base = sim
                .endpoint(0)
                .and_then(Endpoint::as_sender)
                .expect("sender")
                .window_base();
            assert!(base >= last_base, "seed {seed}: base went from {last_base} to {base}");
            last_base = base;
            if report.is_finished() {
                break;
            }
        }
    }
}

#[test]
fn test_same_seed_gives_same_trace() {
    let codes = ["1000", "0000", "1010", "0000", "1001"];
    let params = LinkParams {
        loss_rate: 20.0,
        ..params()
    };

    let mut first = simulation(params.clone(), &codes, 42);
    let mut second = simulation(params, &codes, 42);
    first.run_until(Duration::from_secs(300));
    second.run_until(Duration::from_secs(300));

    assert_eq!(first.sink().records(), second.sink().records());
}

#[test]
fn test_file_log_holds_one_line_per_record() {
    let path = std::env::temp_dir().join(format!("arqsim-scenario-{}.txt", std::process::id()));
    std::fs::write(&path, "left over from a previous run\n").expect("seed file");

    let sender = Endpoint::new(0, params(), messages(&["0000", "0010"]))
        .expect("valid params")
        .with_seed(7);
    let receiver = Endpoint::new(1, params(), Vec::new()).expect("valid params");
    let log = FileAuditLog::create(&path).expect("create log");
    let mut sim = Simulation::new(vec![sender, receiver], log).expect("topology");
    sim.schedule_start(0, Duration::ZERO).expect("known node");
    assert!(sim.run().is_finished());
    drop(sim);

    let text = std::fs::read_to_string(&path).expect("read log");
    let _ = std::fs::remove_file(&path);

    assert!(!text.contains("left over"));
    assert!(text.lines().all(|line| line.starts_with("At : ")));
    assert!(text.contains("Introducing channel error with code = 0010"));
    assert!(text.contains("Duplicate = 2"));
    assert!(text.contains("All frames acknowledged, terminating"));
}
