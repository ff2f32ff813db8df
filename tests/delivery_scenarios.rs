//! End-to-end sensor scenarios against a local fake collector.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use event_sensor::{
    DeliveryClient, DeliveryOutcome, EdgeDetector, EdgePolicy, EventSensor, LogSink,
    ScriptedSignal,
};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const DEVICE_ID: u32 = 7;

/// Collector that acknowledges while `accepting` is set and answers `NAK`
/// otherwise. Records every request line.
struct FakeCollector {
    addr: String,
    accepting: Arc<Mutex<bool>>,
    received: Arc<Mutex<Vec<String>>>,
}

impl FakeCollector {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepting = Arc::new(Mutex::new(true));
        let received = Arc::new(Mutex::new(Vec::new()));

        let mode = accepting.clone();
        let log = received.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (read_half, mut write_half) = stream.into_split();
                let mut line = String::new();
                if BufReader::new(read_half).read_line(&mut line).await.is_err() {
                    continue;
                }
                log.lock().unwrap().push(line);
                let reply: &[u8] = if *mode.lock().unwrap() { b"ACK\n" } else { b"NAK\n" };
                let _ = write_half.write_all(reply).await;
            }
        });

        Self {
            addr,
            accepting,
            received,
        }
    }

    fn set_accepting(&self, accepting: bool) {
        *self.accepting.lock().unwrap() = accepting;
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

fn sink_in(dir: &TempDir) -> LogSink {
    LogSink::new(
        dir.path().join("logfile.csv"),
        dir.path().join("logfile_unsent.csv"),
    )
}

fn sensor(levels: &[u8], addr: &str, sink: LogSink) -> EventSensor {
    let source = ScriptedSignal::new(levels.iter().map(|l| *l == 1), true);
    let detector = EdgeDetector::new(Box::new(source), EdgePolicy::Rising);
    let client = DeliveryClient::with_settings(addr, DEVICE_ID, Duration::from_millis(300), sink);
    EventSensor::from_parts(DEVICE_ID, detector, client, Duration::from_millis(10))
}

fn lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn fires_only_on_fourth_tick_with_default_message() {
    let dir = TempDir::new().unwrap();
    let collector = FakeCollector::start().await;
    let mut sensor = sensor(&[1, 1, 0, 1], &collector.addr, sink_in(&dir));

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(sensor.tick().await.unwrap());
    }

    assert_eq!(
        outcomes,
        vec![None, None, None, Some(DeliveryOutcome::Delivered)]
    );

    let primary = lines(&dir.path().join("logfile.csv"));
    assert_eq!(primary.len(), 1);
    assert!(primary[0].ends_with(&format!(",{},-", DEVICE_ID)));

    let received = collector.received();
    assert_eq!(received, vec![format!("LOG {}\n", primary[0])]);
}

#[tokio::test]
async fn unreachable_collector_records_backlog() {
    let dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut sensor = sensor(&[0, 1], &addr, sink_in(&dir));

    assert_eq!(sensor.tick().await.unwrap(), None);
    assert_eq!(sensor.tick().await.unwrap(), Some(DeliveryOutcome::Failed));
    assert!(sensor.client().pending_warning());

    let primary = lines(&dir.path().join("logfile.csv"));
    let unsent = lines(&dir.path().join("logfile_unsent.csv"));
    assert_eq!(primary.len(), 1);
    assert_eq!(unsent, primary);
}

#[tokio::test]
async fn warning_clears_backlog_flag_after_recovery() {
    let dir = TempDir::new().unwrap();
    let collector = FakeCollector::start().await;
    let mut sensor = sensor(&[0, 1, 0, 1], &collector.addr, sink_in(&dir));

    collector.set_accepting(false);
    sensor.tick().await.unwrap();
    assert_eq!(sensor.tick().await.unwrap(), Some(DeliveryOutcome::Failed));
    assert!(sensor.client().pending_warning());

    collector.set_accepting(true);
    sensor.tick().await.unwrap();
    assert_eq!(sensor.tick().await.unwrap(), Some(DeliveryOutcome::Delivered));
    assert!(!sensor.client().pending_warning());

    let primary = lines(&dir.path().join("logfile.csv"));
    let unsent = lines(&dir.path().join("logfile_unsent.csv"));
    assert_eq!(primary.len(), 2);
    assert_eq!(unsent, vec![primary[0].clone()]);

    let received = collector.received();
    assert_eq!(received.len(), 3);
    assert_eq!(received[1], format!("WARN {}\n", DEVICE_ID));
    assert_eq!(received[2], format!("LOG {}\n", primary[1]));
}

#[tokio::test]
async fn every_record_logged_once_in_order() {
    let dir = TempDir::new().unwrap();
    let collector = FakeCollector::start().await;
    let levels = [0, 1, 0, 1, 0, 1, 0, 1, 0, 1];
    let mut sensor = sensor(&levels, &collector.addr, sink_in(&dir));

    let mut failed = 0;
    for (tick, _) in levels.iter().enumerate() {
        // Collector down for the second and third event only.
        collector.set_accepting(!(3..=5).contains(&tick));
        if sensor.tick().await.unwrap() == Some(DeliveryOutcome::Failed) {
            failed += 1;
        }
    }

    let primary = lines(&dir.path().join("logfile.csv"));
    let unsent = lines(&dir.path().join("logfile_unsent.csv"));
    assert_eq!(primary.len(), 5);
    assert_eq!(failed, 2);
    assert_eq!(unsent, vec![primary[1].clone(), primary[2].clone()]);

    let stats = sensor.client().stats();
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.failed, 2);
}

#[tokio::test]
async fn configured_message_with_separators_stays_one_record() {
    let dir = TempDir::new().unwrap();
    let collector = FakeCollector::start().await;
    let source = ScriptedSignal::new([false, true], true);
    let detector = EdgeDetector::new(Box::new(source), EdgePolicy::Rising)
        .with_message(Some("gate,north\nLOG forged".to_string()));
    let client = DeliveryClient::with_settings(
        collector.addr.as_str(),
        DEVICE_ID,
        Duration::from_millis(300),
        sink_in(&dir),
    );
    let mut sensor = EventSensor::from_parts(DEVICE_ID, detector, client, Duration::from_millis(10));

    sensor.tick().await.unwrap();
    assert_eq!(sensor.tick().await.unwrap(), Some(DeliveryOutcome::Delivered));

    let primary = lines(&dir.path().join("logfile.csv"));
    assert_eq!(primary.len(), 1);
    assert_eq!(primary[0].split(',').count(), 4);
    assert!(primary[0].ends_with(",gate north LOG forged"));

    let received = collector.received();
    assert_eq!(received, vec![format!("LOG {}\n", primary[0])]);
}
